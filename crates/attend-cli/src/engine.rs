//! Live recognition loop: frames in, attendance marks out.

use crate::config::Config;
use crate::preview;
use attend_capture::{CaptureError, Frame, FrameSource};
use attend_core::detector::DetectorError;
use attend_core::labels::LabelError;
use attend_core::ledger::LedgerError;
use attend_core::recognizer::RecognizerError;
use attend_core::{
    CascadeDetector, DetectParams, FaceDetector, FaceRecognizer, FaceRect, Identity, LabelStore, LbphRecognizer,
    Ledger, MarkOutcome,
};
use chrono::{Local, NaiveDateTime};
use image::GrayImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

const DETECT_PARAMS: DetectParams = DetectParams::new(1.3, 5);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("label store error: {0}")]
    Labels(#[from] LabelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Everything needed to turn a face into an identity, loaded once.
pub struct RecognitionContext<D, R> {
    pub detector: D,
    pub recognizer: R,
    pub labels: LabelStore,
    /// Predictions with a distance strictly below this are accepted.
    pub threshold: f64,
}

impl RecognitionContext<CascadeDetector, LbphRecognizer> {
    /// Load the cascade, the trained model and the label store. Fails fast if
    /// any of them is missing.
    pub fn load(config: &Config) -> Result<Self, EngineError> {
        let detector = CascadeDetector::load(&config.cascade_path)?;
        let recognizer = LbphRecognizer::load(&config.model_path())?;
        if recognizer.is_empty() {
            return Err(RecognizerError::EmptyModel.into());
        }
        let labels = LabelStore::load(&config.labels_path())?;
        if labels.is_empty() {
            tracing::warn!(path = %config.labels_path().display(), "label store is empty; every face will be Unknown");
        }
        tracing::info!(
            cascade = %config.cascade_path.display(),
            samples = recognizer.len(),
            identities = labels.len(),
            threshold = config.confidence_threshold,
            "recognition context ready"
        );
        Ok(Self {
            detector,
            recognizer,
            labels,
            threshold: config.confidence_threshold,
        })
    }
}

/// What happened to one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    pub rect: FaceRect,
    /// Set only for accepted predictions that resolve to a person.
    pub identity: Option<Identity>,
    pub outcome: Option<MarkOutcome>,
}

impl FaceAnnotation {
    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }
}

impl<D: FaceDetector, R: FaceRecognizer> RecognitionContext<D, R> {
    /// Detect, identify and mark every face in `gray` against `ledger`.
    ///
    /// A missing date column or sheet is logged and the face skipped; any
    /// other ledger failure is returned.
    pub fn process_frame(
        &self,
        gray: &GrayImage,
        ledger: &Ledger,
        now: NaiveDateTime,
    ) -> Result<Vec<FaceAnnotation>, EngineError> {
        let faces = self.detector.detect(gray, &DETECT_PARAMS)?;
        let mut annotations = Vec::with_capacity(faces.len());

        for rect in faces {
            let Some(roi) = rect.crop(gray) else {
                continue;
            };
            let mut annotation = FaceAnnotation {
                rect,
                identity: None,
                outcome: None,
            };

            let prediction = match self.recognizer.predict(&roi) {
                Ok(p) => p,
                Err(RecognizerError::FaceTooSmall { width, height, .. }) => {
                    tracing::debug!(width, height, "face too small to recognise");
                    annotations.push(annotation);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let identity = if prediction.accepted(self.threshold) {
                self.labels.identity(prediction.label)
            } else {
                None
            };
            let Some(identity) = identity else {
                tracing::debug!(label = prediction.label, distance = prediction.distance, "Unknown");
                annotations.push(annotation);
                continue;
            };

            match ledger.mark_attendance_at(&identity.name, &identity.roll_number, now) {
                Ok(outcome) => {
                    log_outcome(&identity, prediction.distance, &outcome);
                    annotation.outcome = Some(outcome);
                }
                Err(e) if e.is_schema_gap() => {
                    tracing::error!(%identity, error = %e, "cannot mark attendance");
                }
                Err(e) => return Err(e.into()),
            }
            annotation.identity = Some(identity);
            annotations.push(annotation);
        }

        Ok(annotations)
    }
}

fn log_outcome(identity: &Identity, distance: f64, outcome: &MarkOutcome) {
    match outcome {
        MarkOutcome::Marked { time } => {
            tracing::info!(%identity, distance, %time, "attendance marked");
        }
        MarkOutcome::NewStudent { time } => {
            tracing::info!(%identity, distance, %time, "new student added");
        }
        MarkOutcome::AlreadyMarked { time } => {
            tracing::debug!(%identity, %time, "attendance already marked today");
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub dropped: u64,
    pub faces: u64,
    pub marked: u64,
}

/// One recognition run against the ledger directory.
///
/// Owns the ledger for the current month and swaps it when the calendar
/// month changes mid-run.
pub struct AttendanceSession<'a, D, R> {
    ctx: &'a RecognitionContext<D, R>,
    ledger: Ledger,
    preview: Option<PathBuf>,
    summary: RunSummary,
}

impl<'a, D: FaceDetector, R: FaceRecognizer> AttendanceSession<'a, D, R> {
    /// Prepare `ledger`'s sheet. Storage failures are fatal.
    pub fn new(ctx: &'a RecognitionContext<D, R>, ledger: Ledger) -> Result<Self, EngineError> {
        ledger.ensure_sheet()?;
        Ok(Self {
            ctx,
            ledger,
            preview: None,
            summary: RunSummary::default(),
        })
    }

    /// Write an annotated copy of each processed frame to `path`.
    pub fn with_preview(mut self, path: Option<PathBuf>) -> Self {
        self.preview = path;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Process one frame as observed at `now`.
    pub fn handle_frame(&mut self, frame: &Frame, now: NaiveDateTime) -> Result<Vec<FaceAnnotation>, EngineError> {
        if !self.ledger.covers(now.date()) {
            tracing::info!(date = %now.date(), "month changed, switching ledger");
            let ledger = self.ledger.for_month_of(now.date());
            ledger.ensure_sheet()?;
            self.ledger = ledger;
        }

        let annotations = self.ctx.process_frame(&frame.to_grayscale(), &self.ledger, now)?;
        tracing::trace!(sequence = frame.sequence, faces = annotations.len(), "frame processed");
        self.summary.frames += 1;
        self.summary.faces += annotations.len() as u64;
        self.summary.marked += annotations
            .iter()
            .filter(|a| a.outcome.as_ref().is_some_and(MarkOutcome::is_write))
            .count() as u64;

        if let Some(path) = &self.preview {
            if let Err(e) = preview::write_preview(&frame.image, &annotations, path) {
                tracing::warn!(path = %path.display(), error = %e, "could not write preview");
            }
        }
        Ok(annotations)
    }

    /// Pull frames until `stop` is raised or the stream ends.
    ///
    /// Undecodable frames are dropped and the next one is read; read errors
    /// end the run with an error.
    pub fn run(mut self, source: &mut impl FrameSource, stop: &AtomicBool) -> Result<RunSummary, EngineError> {
        while !stop.load(Ordering::Relaxed) {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(CaptureError::Ended) => {
                    tracing::info!("stream ended");
                    break;
                }
                Err(e @ (CaptureError::Frame(_) | CaptureError::Oversized(_))) => {
                    tracing::warn!(error = %e, "failed to grab frame, retrying");
                    self.summary.dropped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.handle_frame(&frame, Local::now().naive_local())?;
        }
        Ok(self.summary)
    }
}
