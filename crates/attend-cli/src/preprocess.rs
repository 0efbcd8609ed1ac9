//! `attend preprocess`: crop the first detected face out of every dataset
//! image and store it as a 200x200 grayscale picture.

use anyhow::{Context, Result};
use attend_core::{DetectParams, FaceDetector};
use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};

// --- Named constants ---
const FACE_SIZE: u32 = 200;
const DETECT_PARAMS: DetectParams = DetectParams::new(1.2, 5);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessSummary {
    pub saved: usize,
    pub skipped: usize,
}

/// Mirror `dataset_dir/<identity>/<image>` into `output_dir` with each image
/// replaced by its normalised face crop.
///
/// Unreadable images and images without a face are logged and skipped.
/// Detector and storage failures abort the stage.
pub fn preprocess_faces(
    detector: &impl FaceDetector,
    dataset_dir: &Path,
    output_dir: &Path,
) -> Result<PreprocessSummary> {
    let mut summary = PreprocessSummary::default();

    for person_dir in sorted_entries(dataset_dir)? {
        if !person_dir.is_dir() {
            continue;
        }
        let Some(person) = person_dir.file_name() else {
            continue;
        };
        let out_dir = output_dir.join(person);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("creating {}", out_dir.display()))?;

        for image_path in sorted_entries(&person_dir)? {
            let Some(file_name) = image_path.file_name() else {
                continue;
            };

            let gray = match image::open(&image_path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %image_path.display(), error = %e, "could not read image, skipping");
                    summary.skipped += 1;
                    continue;
                }
            };

            let faces = detector.detect(&gray, &DETECT_PARAMS)?;
            let Some(face) = faces.first().and_then(|f| f.crop(&gray)) else {
                tracing::warn!(path = %image_path.display(), "no face detected, skipping");
                summary.skipped += 1;
                continue;
            };

            let resized = image::imageops::resize(&face, FACE_SIZE, FACE_SIZE, FilterType::Triangle);
            let out_path = out_dir.join(file_name);
            resized
                .save(&out_path)
                .with_context(|| format!("saving {}", out_path.display()))?;
            tracing::info!(path = %out_path.display(), "saved face");
            summary.saved += 1;
        }
    }

    tracing::info!(
        saved = summary.saved,
        skipped = summary.skipped,
        "face detection and preprocessing complete"
    );
    Ok(summary)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}
