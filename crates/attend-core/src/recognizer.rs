//! Local Binary Pattern Histogram (LBPH) face recognizer.
//!
//! Each training face is reduced to a concatenation of per-cell LBP
//! histograms; prediction returns the label of the nearest training sample
//! under the chi-square distance.

use crate::types::Prediction;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;
use thiserror::Error;

// --- Named constants (OpenCV LBPH defaults) ---
const LBPH_RADIUS: u32 = 1;
const LBPH_NEIGHBORS: u32 = 8;
const LBPH_GRID_X: u32 = 8;
const LBPH_GRID_Y: u32 = 8;
const LBP_EPSILON: f64 = f32::EPSILON as f64;
const CHI_SQUARE_EPSILON: f64 = f64::EPSILON;
/// Keeps the histogram (2^neighbors bins per cell) to a sane size.
const MAX_NEIGHBORS: u32 = 16;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (run `attend train` first)")]
    ModelNotFound(String),
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("model has no training samples")]
    EmptyModel,
    #[error("face {width}x{height} too small for a {grid_x}x{grid_y} LBP grid")]
    FaceTooSmall {
        width: u32,
        height: u32,
        grid_x: u32,
        grid_y: u32,
    },
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("histogram length {actual} does not match model ({expected})")]
    HistogramMismatch { expected: usize, actual: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that can identify a cropped grayscale face.
pub trait FaceRecognizer {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError>;
}

/// LBP operator and histogram grid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: LBPH_RADIUS,
            neighbors: LBPH_NEIGHBORS,
            grid_x: LBPH_GRID_X,
            grid_y: LBPH_GRID_Y,
        }
    }
}

impl LbphParams {
    fn validate(&self) -> Result<(), RecognizerError> {
        if self.radius == 0 {
            return Err(RecognizerError::InvalidParams("radius must be at least 1".into()));
        }
        if !(1..=MAX_NEIGHBORS).contains(&self.neighbors) {
            return Err(RecognizerError::InvalidParams(format!(
                "neighbors must be in 1..={MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(RecognizerError::InvalidParams(format!(
                "grid must be at least 1x1, got {}x{}",
                self.grid_x, self.grid_y
            )));
        }
        Ok(())
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    fn histogram_len(&self) -> usize {
        self.bins() * (self.grid_x * self.grid_y) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sample {
    label: i32,
    histogram: Vec<f32>,
}

/// Trained LBPH model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphRecognizer {
    params: LbphParams,
    samples: Vec<Sample>,
}

impl LbphRecognizer {
    /// Train with default parameters on `(face, label)` pairs.
    pub fn train(faces: &[(GrayImage, i32)]) -> Result<Self, RecognizerError> {
        Self::train_with(LbphParams::default(), faces)
    }

    pub fn train_with(params: LbphParams, faces: &[(GrayImage, i32)]) -> Result<Self, RecognizerError> {
        params.validate()?;
        if faces.is_empty() {
            return Err(RecognizerError::EmptyTrainingSet);
        }

        let samples = faces
            .iter()
            .map(|(face, label)| {
                Ok(Sample {
                    label: *label,
                    histogram: spatial_histogram(face, &params)?,
                })
            })
            .collect::<Result<Vec<_>, RecognizerError>>()?;

        tracing::info!(samples = samples.len(), ?params, "trained LBPH model");
        Ok(Self { params, samples })
    }

    /// Load a model previously written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, RecognizerError> {
        if !path.exists() {
            return Err(RecognizerError::ModelNotFound(path.display().to_string()));
        }
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        let model: Self = serde_json::from_reader(file)?;
        model.params.validate()?;

        let expected = model.params.histogram_len();
        if let Some(bad) = model.samples.iter().find(|s| s.histogram.len() != expected) {
            return Err(RecognizerError::HistogramMismatch {
                expected,
                actual: bad.histogram.len(),
            });
        }

        tracing::info!(
            path = %path.display(),
            samples = model.samples.len(),
            "loaded LBPH model"
        );
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), RecognizerError> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl FaceRecognizer for LbphRecognizer {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError> {
        let query = spatial_histogram(face, &self.params)?;

        let mut best: Option<Prediction> = None;
        for sample in &self.samples {
            let distance = chi_square(&sample.histogram, &query);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction {
                    label: sample.label,
                    distance,
                });
            }
        }

        best.ok_or(RecognizerError::EmptyModel)
    }
}

/// Extended (circular) LBP codes, one per interior pixel.
///
/// Output is `(width - 2r) x (height - 2r)`, row-major. Off-grid sample
/// points are bilinearly interpolated.
fn elbp(image: &GrayImage, radius: u32, neighbors: u32) -> (Vec<u32>, usize, usize) {
    let w = image.width() as usize;
    let h = image.height() as usize;
    let r = radius as usize;
    let out_w = w.saturating_sub(2 * r);
    let out_h = h.saturating_sub(2 * r);
    let mut codes = vec![0u32; out_w * out_h];
    let raw = image.as_raw();
    let px = |x: isize, y: isize| raw[y as usize * w + x as usize] as f64;

    for n in 0..neighbors {
        let angle = 2.0 * PI * n as f64 / neighbors as f64;
        let sx = radius as f64 * angle.cos();
        let sy = -(radius as f64) * angle.sin();

        let fx = sx.floor() as isize;
        let fy = sy.floor() as isize;
        let cx = sx.ceil() as isize;
        let cy = sy.ceil() as isize;
        let tx = sx - fx as f64;
        let ty = sy - fy as f64;

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for i in 0..out_h {
            for j in 0..out_w {
                let y = (i + r) as isize;
                let x = (j + r) as isize;
                let t = w1 * px(x + fx, y + fy)
                    + w2 * px(x + cx, y + fy)
                    + w3 * px(x + fx, y + cy)
                    + w4 * px(x + cx, y + cy);
                let center = px(x, y);
                if t > center || (t - center).abs() < LBP_EPSILON {
                    codes[i * out_w + j] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Concatenated per-cell LBP histograms, each normalised by its cell area.
fn spatial_histogram(face: &GrayImage, params: &LbphParams) -> Result<Vec<f32>, RecognizerError> {
    let (codes, lbp_w, lbp_h) = elbp(face, params.radius, params.neighbors);
    let cell_w = lbp_w / params.grid_x as usize;
    let cell_h = lbp_h / params.grid_y as usize;
    if cell_w == 0 || cell_h == 0 {
        return Err(RecognizerError::FaceTooSmall {
            width: face.width(),
            height: face.height(),
            grid_x: params.grid_x,
            grid_y: params.grid_y,
        });
    }

    let bins = params.bins();
    let cell_area = (cell_w * cell_h) as f32;
    let mut histogram = vec![0f32; params.histogram_len()];

    for gy in 0..params.grid_y as usize {
        for gx in 0..params.grid_x as usize {
            let offset = (gy * params.grid_x as usize + gx) * bins;
            let cell = &mut histogram[offset..offset + bins];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    cell[codes[y * lbp_w + x] as usize] += 1.0;
                }
            }
            for v in cell.iter_mut() {
                *v /= cell_area;
            }
        }
    }

    Ok(histogram)
}

/// Symmetric chi-square distance: `2 * sum((a - b)^2 / (a + b))`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&p, &q)| {
            let (p, q) = (p as f64, q as f64);
            let denom = p + q;
            if denom.abs() > CHI_SQUARE_EPSILON {
                (p - q).powi(2) / denom
            } else {
                0.0
            }
        })
        .sum();
    2.0 * sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(period: u32) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, _| if (x / period) % 2 == 0 { Luma([30]) } else { Luma([220]) })
    }

    fn checker(period: u32) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            if ((x / period) + (y / period)) % 2 == 0 { Luma([20]) } else { Luma([240]) }
        })
    }

    #[test]
    fn test_elbp_output_shape() {
        let img = GrayImage::new(10, 7);
        let (codes, w, h) = elbp(&img, 1, 8);
        assert_eq!((w, h), (8, 5));
        assert_eq!(codes.len(), 40);
    }

    #[test]
    fn test_elbp_uniform_sets_all_bits() {
        // Every neighbour equals the centre, which counts as "not darker".
        let img = GrayImage::from_pixel(5, 5, Luma([77]));
        let (codes, _, _) = elbp(&img, 1, 8);
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_elbp_bright_centre_clears_bits() {
        let mut img = GrayImage::from_pixel(3, 3, Luma([10]));
        img.put_pixel(1, 1, Luma([250]));
        let (codes, _, _) = elbp(&img, 1, 8);
        assert_eq!(codes, vec![0]);
    }

    #[test]
    fn test_spatial_histogram_cells_normalised() {
        let params = LbphParams::default();
        let hist = spatial_histogram(&stripes(3), &params).unwrap();
        assert_eq!(hist.len(), params.histogram_len());
        for cell in hist.chunks(params.bins()) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell sums to {total}");
        }
    }

    #[test]
    fn test_spatial_histogram_too_small() {
        let err = spatial_histogram(&GrayImage::new(6, 6), &LbphParams::default()).unwrap_err();
        assert!(matches!(err, RecognizerError::FaceTooSmall { .. }));
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let a = vec![0.25f32, 0.5, 0.25, 0.0];
        assert_eq!(chi_square(&a, &a), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint() {
        // (1-0)^2/1 + (0-1)^2/1 = 2, doubled
        assert!((chi_square(&[1.0, 0.0], &[0.0, 1.0]) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_predict_nearest_label() {
        let model = LbphRecognizer::train(&[(stripes(2), 0), (checker(4), 1)]).unwrap();

        let p = model.predict(&stripes(2)).unwrap();
        assert_eq!(p.label, 0);
        assert!(p.distance.abs() < 1e-9);

        let p = model.predict(&checker(4)).unwrap();
        assert_eq!(p.label, 1);
    }

    #[test]
    fn test_train_empty_set() {
        assert!(matches!(
            LbphRecognizer::train(&[]),
            Err(RecognizerError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.json");
        let model = LbphRecognizer::train(&[(stripes(2), 4), (checker(4), 9)]).unwrap();
        model.save(&path).unwrap();

        let loaded = LbphRecognizer::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.params, LbphParams::default());
        assert_eq!(loaded.predict(&checker(4)).unwrap().label, 9);
    }

    #[test]
    fn test_load_rejects_degenerate_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.json");
        for params in [
            r#"{"radius":1,"neighbors":8,"grid_x":0,"grid_y":8}"#,
            r#"{"radius":0,"neighbors":8,"grid_x":8,"grid_y":8}"#,
            r#"{"radius":1,"neighbors":0,"grid_x":8,"grid_y":8}"#,
            r#"{"radius":1,"neighbors":40,"grid_x":8,"grid_y":8}"#,
        ] {
            let json = format!(r#"{{"params":{params},"samples":[{{"label":0,"histogram":[]}}]}}"#);
            std::fs::write(&path, json).unwrap();
            let err = LbphRecognizer::load(&path).unwrap_err();
            assert!(matches!(err, RecognizerError::InvalidParams(_)), "{params}: {err}");
        }
    }

    #[test]
    fn test_train_rejects_zero_grid() {
        let params = LbphParams {
            grid_y: 0,
            ..LbphParams::default()
        };
        let err = LbphRecognizer::train_with(params, &[(stripes(2), 0)]).unwrap_err();
        assert!(matches!(err, RecognizerError::InvalidParams(_)));
    }

    #[test]
    fn test_load_missing_model() {
        let err = LbphRecognizer::load(Path::new("/nonexistent/trainer.json")).unwrap_err();
        assert!(matches!(err, RecognizerError::ModelNotFound(_)));
    }
}
