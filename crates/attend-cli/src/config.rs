use std::path::PathBuf;

/// Pipeline configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw dataset root: one subdirectory per `name_rollnumber` identity.
    pub dataset_dir: PathBuf,
    /// Output of `preprocess`, input of `train`.
    pub processed_dir: PathBuf,
    /// Holds `trainer.json`, `labels.json` and the detection log.
    pub trainer_dir: PathBuf,
    /// Directory the monthly attendance ledgers are written to.
    pub ledger_dir: PathBuf,
    /// OpenCV Haar cascade XML for frontal faces.
    pub cascade_path: PathBuf,
    /// MJPEG stream URL of the camera.
    pub stream_url: String,
    /// Predictions with a distance strictly below this are accepted.
    pub confidence_threshold: f64,
    /// Pause after opening the stream before reading frames.
    pub startup_delay_ms: u64,
    /// Annotated copy of the latest frame is written here when set.
    pub preview_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            dataset_dir: env_path("ATTEND_DATASET_DIR", "dataset_face"),
            processed_dir: env_path("ATTEND_PROCESSED_DIR", "processed_faces"),
            trainer_dir: env_path("ATTEND_TRAINER_DIR", "trainer"),
            ledger_dir: env_path("ATTEND_LEDGER_DIR", "."),
            cascade_path: env_path("ATTEND_CASCADE_PATH", "haarcascade_frontalface_default.xml"),
            stream_url: std::env::var("ATTEND_STREAM_URL")
                .unwrap_or_else(|_| "http://192.168.188.140:81/stream".to_string()),
            confidence_threshold: env_f64("ATTEND_CONFIDENCE_THRESHOLD", 110.0),
            startup_delay_ms: env_u64("ATTEND_STARTUP_DELAY_MS", 2000),
            preview_path: std::env::var("ATTEND_PREVIEW_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn labels_path(&self) -> PathBuf {
        self.trainer_dir.join("labels.json")
    }

    pub fn model_path(&self) -> PathBuf {
        self.trainer_dir.join("trainer.json")
    }

    pub fn detection_log_path(&self) -> PathBuf {
        self.trainer_dir.join("face_detection_log.csv")
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
