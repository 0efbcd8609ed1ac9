//! attend-core: Face detection, recognition and the attendance ledger.
//!
//! Detection evaluates OpenCV Haar cascades, recognition uses Local Binary
//! Pattern Histograms, and accepted identities are recorded in a monthly
//! CSV ledger.

pub mod detector;
pub mod labels;
pub mod ledger;
pub mod recognizer;
pub mod types;

pub use detector::{CascadeDetector, DetectParams, FaceDetector};
pub use labels::LabelStore;
pub use ledger::{Ledger, MarkOutcome, Sheet, SheetStatus};
pub use recognizer::{FaceRecognizer, LbphRecognizer};
pub use types::{FaceRect, Identity, Prediction};
