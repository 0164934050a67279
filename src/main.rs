use anyhow::Context;
use avisense::audio::{CaptureConfig, CpalAudioCapture};
use avisense::batch::ChunkedFileClassifier;
use avisense::config::load_config;
use avisense::events::SessionEvent;
use avisense::models::{load_labels, InferenceEngine, TfliteEngine};
use avisense::session::RecognitionSession;
use avisense::storage::LocalDirStorage;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Parser)]
#[command(name = "avisense", about = "On-device bird call recognition and recording")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture live audio, publish detections and record until Ctrl+C.
    Live {
        /// Save the recording when the session stops.
        #[arg(long)]
        save: bool,
        /// Input device name (default input device when omitted).
        #[arg(long)]
        device: Option<String>,
    },
    /// Classify a pre-recorded WAV file chunk by chunk.
    File { path: PathBuf },
    /// List available input devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    log::info!("🚀 Initializing avisense");

    match Cli::parse().command {
        Command::Live { save, device } => run_live(save, device).await,
        Command::File { path } => run_file(&path).await,
        Command::Devices => run_devices(),
    }
}

fn build_engine(
    config: &avisense::config::EngineConfig,
    input_length: usize,
) -> avisense::Result<TfliteEngine> {
    let relevance_path = config
        .relevance_model_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    TfliteEngine::new(
        &config.acoustic_model_path.to_string_lossy(),
        relevance_path.as_deref(),
        input_length,
    )
}

async fn run_live(save: bool, device: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;
    let options = config.session_options();

    let engine = Arc::new(build_engine(&config, options.model_input_length)?);
    let labels = load_labels(&config.labels_path)?;
    if labels.len() != engine.class_count() {
        log::warn!(
            "label list has {} entries but the model has {} classes",
            labels.len(),
            engine.class_count()
        );
    }

    let capture = CpalAudioCapture::new(CaptureConfig {
        device_id: device,
        sample_rate: options.sample_rate,
        ..Default::default()
    });
    let storage = Arc::new(LocalDirStorage::new(&config.recordings_dir)?);
    let session = RecognitionSession::new(options, engine, Box::new(capture), storage)?;

    let printer = tokio::spawn(print_events(session.subscribe(), labels));

    session.start().await?;
    println!("🎧 Listening for bird calls... press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl+C")?;
    log::info!("Received Ctrl+C, shutting down...");

    match session.stop(save).await {
        Some(stored) => println!("💾 Recording saved to {}", stored.display()),
        None if save => println!("⚠️  Recording could not be saved"),
        None => println!("🗑️  Recording discarded"),
    }

    let _ = printer.await;
    Ok(())
}

async fn run_file(path: &PathBuf) -> anyhow::Result<()> {
    let config = load_config()?;
    let options = config.session_options();

    let engine = Arc::new(build_engine(&config, options.model_input_length)?);
    let labels = load_labels(&config.labels_path)?;

    let (events_tx, events_rx) = broadcast::channel(64);
    let classifier = ChunkedFileClassifier::new(options, engine, events_tx.clone())?;
    let printer = tokio::spawn(print_events(events_rx, labels.clone()));

    let detections = classifier.classify(path).await?;
    let _ = events_tx.send(SessionEvent::Finished);
    let _ = printer.await;

    println!(
        "✅ {} detections in {}",
        detections.len(),
        path.display()
    );
    for event in &detections {
        println!(
            "   chunk {:>3}  {:<40} {:.1}%",
            event.chunk_index.unwrap_or(0),
            label_for(&labels, event.class_index),
            event.confidence * 100.0
        );
    }
    Ok(())
}

fn run_devices() -> anyhow::Result<()> {
    for device in CpalAudioCapture::list_devices()? {
        println!(
            "{} {} ({} channels)",
            if device.is_default { "*" } else { " " },
            device.name,
            device.channel_count
        );
    }
    Ok(())
}

async fn print_events(events: broadcast::Receiver<SessionEvent>, labels: Vec<String>) {
    let mut stream = BroadcastStream::new(events);
    while let Some(event) = stream.next().await {
        match event {
            Ok(SessionEvent::Detections(detections)) => {
                for detection in detections {
                    println!(
                        "🐦 {} ({:.1}%)",
                        label_for(&labels, detection.class_index),
                        detection.confidence * 100.0
                    );
                }
            }
            Ok(SessionEvent::Progress(percent)) => {
                log::debug!("read progress {}%", percent);
            }
            Ok(SessionEvent::RecordingAborted) => {
                println!("⚠️  Recording aborted after a write failure; detection continues");
            }
            Ok(SessionEvent::Finished) => break,
            Err(e) => {
                log::warn!("event subscriber lagged: {}", e);
            }
        }
    }
}

fn label_for(labels: &[String], class_index: usize) -> &str {
    labels
        .get(class_index)
        .map(String::as_str)
        .unwrap_or("unknown species")
}
