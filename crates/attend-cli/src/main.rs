use anyhow::{Context, Result};
use attend_capture::MjpegStream;
use attend_core::{CascadeDetector, Ledger};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod preprocess;
mod preview;
mod train;

use config::Config;
use engine::{AttendanceSession, RecognitionContext};

#[derive(Parser)]
#[command(name = "attend", about = "Face recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crop faces out of the raw dataset into 200x200 grayscale images
    Preprocess,
    /// Train the recognizer on the preprocessed faces
    Train,
    /// Recognise faces on the camera stream and mark attendance
    Recognize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Preprocess => {
            let detector = CascadeDetector::load(&config.cascade_path)?;
            preprocess::preprocess_faces(&detector, &config.dataset_dir, &config.processed_dir)?;
        }
        Commands::Train => {
            let detector = CascadeDetector::load(&config.cascade_path)?;
            let (labels, model, detection_log) =
                (config.labels_path(), config.model_path(), config.detection_log_path());
            train::train_model(
                &detector,
                &config.processed_dir,
                &train::TrainOutputs {
                    labels: &labels,
                    model: &model,
                    detection_log: &detection_log,
                },
            )?;
        }
        Commands::Recognize => recognize(&config)?,
    }

    Ok(())
}

fn recognize(config: &Config) -> Result<()> {
    let ctx = RecognitionContext::load(config).context("loading recognition context")?;
    let session = AttendanceSession::new(&ctx, Ledger::current(&config.ledger_dir))
        .context("preparing attendance ledger")?
        .with_preview(config.preview_path.clone());

    let mut stream = MjpegStream::connect(&config.stream_url).context("could not open video stream")?;
    std::thread::sleep(Duration::from_millis(config.startup_delay_ms));

    let stop = Arc::new(AtomicBool::new(false));
    spawn_quit_watcher(Arc::clone(&stop));
    tracing::info!(
        url = stream.url(),
        ledger = %session.ledger().path().display(),
        "recognising; type q and Enter to stop"
    );

    let summary = session.run(&mut stream, &stop)?;
    drop(stream);

    tracing::info!(
        frames = summary.frames,
        dropped = summary.dropped,
        faces = summary.faces,
        marked = summary.marked,
        "recognition stopped"
    );
    Ok(())
}

/// Raise `stop` when a line reading `q` arrives on stdin.
fn spawn_quit_watcher(stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });
}
