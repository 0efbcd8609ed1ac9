//! Annotated preview of the latest processed frame.

use crate::engine::FaceAnnotation;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;

const KNOWN_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const BORDER_PX: u32 = 2;

/// Draw a box around every face (green when identified, red otherwise) and
/// save the result to `path`.
pub fn write_preview(frame: &RgbImage, faces: &[FaceAnnotation], path: &Path) -> Result<(), image::ImageError> {
    let mut canvas = frame.clone();
    annotate(&mut canvas, faces);
    canvas.save(path)
}

fn annotate(canvas: &mut RgbImage, faces: &[FaceAnnotation]) {
    for face in faces {
        let colour = if face.is_known() { KNOWN_COLOUR } else { UNKNOWN_COLOUR };
        let r = face.rect;
        for inset in 0..BORDER_PX {
            if r.width <= 2 * inset || r.height <= 2 * inset {
                break;
            }
            let rect = Rect::at((r.x + inset) as i32, (r.y + inset) as i32)
                .of_size(r.width - 2 * inset, r.height - 2 * inset);
            draw_hollow_rect_mut(canvas, rect, colour);
        }
    }
}
