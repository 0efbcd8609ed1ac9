use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clip the rectangle to an image of the given size.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRect::new(self.x, self.y, w, h))
    }

    /// Copy the region of interest out of a grayscale image.
    pub fn crop(&self, image: &GrayImage) -> Option<GrayImage> {
        let r = self.clamp_to(image.width(), image.height())?;
        Some(image::imageops::crop_imm(image, r.x, r.y, r.width, r.height).to_image())
    }
}

/// Recognizer output for a single face: predicted label id and its distance
/// to the nearest training sample (lower = more confident).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i32,
    pub distance: f64,
}

impl Prediction {
    /// A prediction is a positive identification when its distance is
    /// strictly below the confidence threshold.
    pub fn accepted(&self, threshold: f64) -> bool {
        self.distance < threshold
    }
}

/// A person known to the attendance ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub name: String,
    pub roll_number: String,
}

impl Identity {
    /// Parse a composite `"name_rollnumber"` key.
    ///
    /// Splits on the first underscore only, so roll numbers may themselves
    /// contain underscores. Keys without an underscore or with an empty half
    /// do not name an identity.
    pub fn from_label(key: &str) -> Option<Self> {
        let (name, roll_number) = key.split_once('_')?;
        if name.is_empty() || roll_number.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            roll_number: roll_number.to_string(),
        })
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.roll_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_splits_on_first_underscore() {
        let id = Identity::from_label("jane_doe_2021").unwrap();
        assert_eq!(id.name, "jane");
        assert_eq!(id.roll_number, "doe_2021");
    }

    #[test]
    fn test_identity_requires_separator() {
        assert!(Identity::from_label("nounderscore").is_none());
        assert!(Identity::from_label("_r01").is_none());
        assert!(Identity::from_label("alice_").is_none());
    }

    #[test]
    fn test_identity_display() {
        let id = Identity::from_label("alice_r01").unwrap();
        assert_eq!(id.to_string(), "alice (r01)");
    }

    #[test]
    fn test_prediction_threshold_is_strict() {
        let p = Prediction { label: 3, distance: 110.0 };
        assert!(!p.accepted(110.0));
        assert!(p.accepted(110.5));
    }

    #[test]
    fn test_clamp_to_bounds() {
        let r = FaceRect::new(90, 90, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(FaceRect::new(90, 90, 10, 10)));
        assert_eq!(FaceRect::new(100, 0, 5, 5).clamp_to(100, 100), None);
    }

    #[test]
    fn test_crop_region() {
        let mut img = GrayImage::new(10, 10);
        img.put_pixel(3, 4, image::Luma([200]));
        let roi = FaceRect::new(3, 4, 2, 2).crop(&img).unwrap();
        assert_eq!(roi.dimensions(), (2, 2));
        assert_eq!(roi.get_pixel(0, 0).0[0], 200);
        assert_eq!(roi.get_pixel(1, 1).0[0], 0);
    }
}
