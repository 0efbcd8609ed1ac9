//! `attend train`: fit the LBPH model on the preprocessed faces.

use anyhow::{bail, Context, Result};
use attend_core::labels::{normalize_label, LabelAssigner};
use attend_core::{DetectParams, FaceDetector, LbphRecognizer};
use image::GrayImage;
use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

const DETECT_PARAMS: DetectParams = DetectParams::new(1.3, 5);
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Output locations of a training run.
pub struct TrainOutputs<'a> {
    pub labels: &'a Path,
    pub model: &'a Path,
    pub detection_log: &'a Path,
}

/// One row of `face_detection_log.csv`.
#[derive(Debug, Serialize)]
struct DetectionLogRow {
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Label")]
    label: String,
    #[serde(rename = "Faces_Detected")]
    faces_detected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainSummary {
    pub images: usize,
    pub samples: usize,
    pub identities: usize,
}

/// Train on every image under `processed_dir`, labelling each by its parent
/// directory name.
///
/// The detection log is written whenever at least one image was read; the
/// label store and model only when at least one face was found.
pub fn train_model(
    detector: &impl FaceDetector,
    processed_dir: &Path,
    outputs: &TrainOutputs<'_>,
) -> Result<TrainSummary> {
    let mut assigner = LabelAssigner::new();
    let mut samples: Vec<(GrayImage, i32)> = Vec::new();
    let mut log_rows = Vec::new();

    for entry in WalkDir::new(processed_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", processed_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_image(path) {
            continue;
        }

        let dir_name = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = normalize_label(&dir_name);
        let id = assigner.id_for(&label);

        let gray = match image::open(path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read image, skipping");
                continue;
            }
        };

        let faces = detector.detect(&gray, &DETECT_PARAMS)?;
        tracing::debug!(path = %path.display(), %label, faces = faces.len(), "detected faces");
        log_rows.push(DetectionLogRow {
            image: entry.file_name().to_string_lossy().into_owned(),
            label,
            faces_detected: faces.len(),
        });

        samples.extend(faces.iter().filter_map(|f| f.crop(&gray)).map(|roi| (roi, id)));
    }

    if let Some(parent) = outputs.detection_log.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    if !log_rows.is_empty() {
        write_detection_log(outputs.detection_log, &log_rows)?;
        tracing::info!(path = %outputs.detection_log.display(), rows = log_rows.len(), "wrote detection log");
    }

    if samples.is_empty() {
        bail!("no faces found in {}; nothing to train", processed_dir.display());
    }

    let store = assigner.into_store();
    store
        .save(outputs.labels)
        .with_context(|| format!("saving {}", outputs.labels.display()))?;

    let model = LbphRecognizer::train(&samples).context("training LBPH model")?;
    model
        .save(outputs.model)
        .with_context(|| format!("saving {}", outputs.model.display()))?;

    let summary = TrainSummary {
        images: log_rows.len(),
        samples: samples.len(),
        identities: store.len(),
    };
    tracing::info!(
        images = summary.images,
        samples = summary.samples,
        identities = summary.identities,
        model = %outputs.model.display(),
        "training complete"
    );
    Ok(summary)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

fn write_detection_log(path: &Path, rows: &[DetectionLogRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
