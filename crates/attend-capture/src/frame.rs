//! Frame type and JPEG decoding.

use image::{GrayImage, ImageFormat, RgbImage};

/// A decoded camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Colour pixels as delivered by the camera.
    pub image: RgbImage,
    /// Position of this frame in the stream, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Decode a complete JPEG payload.
    pub fn decode_jpeg(jpeg: &[u8], sequence: u64) -> Result<Self, FrameError> {
        if jpeg.is_empty() {
            return Err(FrameError::Empty);
        }
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8();
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self {
            image,
            sequence,
        })
    }

    /// Luma conversion used for detection and recognition.
    pub fn to_grayscale(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("JPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}
