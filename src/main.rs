//! RapiReport Assist - exercise rep tracking and prescription OCR
//!
//! Counts push-up repetitions from a camera feed and turns photographed
//! prescriptions into structured reports.

mod activity;
mod capture;
mod config;
mod refine;
mod server;
mod shared;
mod storage;
mod tracker;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::activity::ActivityReporter;
use crate::capture::{CameraSource, FrameSource, ImageDirSource};
use crate::config::AppConfig;
use crate::refine::RefinementChain;
use crate::server::{CorsPolicy, OcrService, TrackerService};
use crate::shared::{SharedSession, TrackerSession};
use crate::storage::Database;
use crate::tracker::{FrameProcessor, LimbModel, SourceFactory, StandaloneOptions};
use crate::vision::{ModelManager, ModelType};

/// RapiReport Assist
#[derive(Parser, Debug)]
#[command(name = "rapi-assist")]
#[command(about = "Exercise rep tracking and prescription OCR for RapiReport")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count reps from the camera until 'q' is entered, then sync the summary
    Track {
        /// Replay frames from a directory instead of the camera
        #[arg(long)]
        input: Option<PathBuf>,
        /// Pose model file (defaults to the model directory)
        #[arg(long)]
        pose_model: Option<PathBuf>,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Keep the latest annotated frame in this file
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Do not send the session summary
        #[arg(long)]
        no_report: bool,
    },
    /// Serve the annotated video feed with status and reset endpoints
    ServeTracker {
        /// Replay frames from a directory instead of the camera
        #[arg(long)]
        input: Option<PathBuf>,
        /// Pose model file (defaults to the model directory)
        #[arg(long)]
        pose_model: Option<PathBuf>,
        /// Bind address, overriding the configuration
        #[arg(long)]
        addr: Option<String>,
    },
    /// Extract and refine text from one image
    Ocr {
        image: PathBuf,
        /// Print the raw text only
        #[arg(long)]
        no_refine: bool,
    },
    /// Serve the OCR upload API
    ServeOcr {
        /// Bind address, overriding the configuration
        #[arg(long)]
        addr: Option<String>,
    },
    /// Show model status, optionally downloading missing models
    Models {
        #[arg(long)]
        download: bool,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = load_or_create_config(args.config.as_deref());
    config.apply_env_overrides();

    match args.command {
        Command::Track {
            input,
            pose_model,
            max_frames,
            preview,
            no_report,
        } => run_track(&config, input, pose_model, max_frames, preview, no_report),
        Command::ServeTracker { input, pose_model, addr } => run_serve_tracker(&config, input, pose_model, addr),
        Command::Ocr { image, no_refine } => run_ocr(&config, &image, no_refine),
        Command::ServeOcr { addr } => run_serve_ocr(&config, addr),
        Command::Models { download } => run_models(download),
    }
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    if let Some(path) = explicit {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                warn!("Failed to load {:?}: {:#}; using defaults", path, e);
                return AppConfig::default();
            }
        }
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        } else if let Err(e) = config::save_config(&AppConfig::default(), &config_path) {
            warn!("Could not write default configuration: {:#}", e);
        } else {
            info!("Wrote default configuration to {:?}", config_path);
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn open_source(input: Option<&Path>, camera_index: u32) -> Result<Box<dyn FrameSource>> {
    Ok(match input {
        Some(dir) => Box::new(ImageDirSource::open(dir)?),
        None => Box::new(CameraSource::open(camera_index)?),
    })
}

fn build_processor(config: &AppConfig, pose_model: Option<PathBuf>) -> Result<FrameProcessor> {
    let manager = ModelManager::new()?;
    let estimator = vision::load_pose_estimator(&manager, pose_model, &config.tracker)?;
    Ok(FrameProcessor::new(Box::new(estimator), LimbModel::from_settings(&config.tracker)))
}

fn run_track(
    config: &AppConfig,
    input: Option<PathBuf>,
    pose_model: Option<PathBuf>,
    max_frames: Option<u64>,
    preview: Option<PathBuf>,
    no_report: bool,
) -> Result<()> {
    let mut processor = build_processor(config, pose_model)?;
    let mut source = open_source(input.as_deref(), config.tracker.camera_index)?;
    let mut counter = tracker::counter_from_settings(&config.tracker);
    let control = shared::spawn_line_listener(std::io::BufReader::new(std::io::stdin()));

    let options = StandaloneOptions {
        max_frames,
        preview_path: preview,
        jpeg_quality: config.tracker.jpeg_quality,
    };
    let summary = tracker::run_standalone(source.as_mut(), &mut processor, &mut counter, &control, &options);
    // release the camera before the network call
    drop(source);

    info!(
        "Session finished: {} reps, {} frames in {:.1}s",
        summary.reps,
        summary.frames,
        summary.duration.as_secs_f32()
    );

    if !no_report {
        let reporter = ActivityReporter::from_settings(&config.activity, &config.tracker.exercise_type)?;
        reporter.report(summary.reps, summary.duration);
    }
    Ok(())
}

fn run_serve_tracker(
    config: &AppConfig,
    input: Option<PathBuf>,
    pose_model: Option<PathBuf>,
    addr: Option<String>,
) -> Result<()> {
    let processor = build_processor(config, pose_model)?;
    let session = SharedSession::new(TrackerSession::new(tracker::counter_from_settings(&config.tracker)));

    let camera_index = config.tracker.camera_index;
    let factory: SourceFactory = Box::new(move || open_source(input.as_deref(), camera_index));
    let worker = tracker::spawn_capture_worker(factory, processor, session.clone(), config.tracker.jpeg_quality);

    let addr = addr.unwrap_or_else(|| config.server.tracker_addr.clone());
    let server = server::bind(&addr)?;
    server::run(
        server,
        Arc::new(TrackerService::new(session)),
        CorsPolicy::new(config.server.cors_origins.clone()),
    );

    if worker.join().is_err() {
        error!("Capture worker panicked");
    }
    Ok(())
}

fn open_database(config: &AppConfig) -> Option<Database> {
    let opened = storage::default_database_path(config.database.path.clone()).and_then(|path| Database::open(&path));
    match opened {
        Ok(db) => Some(db),
        Err(e) => {
            error!("Database unavailable: {:#}", e);
            None
        }
    }
}

fn run_ocr(config: &AppConfig, image: &Path, no_refine: bool) -> Result<()> {
    let manager = ModelManager::new()?;
    let mut extractor = vision::load_text_extractor(&manager, &config.ocr)?;

    let raw = extractor.extract_file(image);
    if vision::is_error_text(&raw) {
        anyhow::bail!("OCR failed: {}", raw);
    }
    println!("--- Raw text ---\n{}", raw);

    if !no_refine {
        let result = RefinementChain::from_settings(&config.refine).refine(&raw, Some(image));
        println!("\n--- Refined ({}) ---\n{}", result.source, result.text);
    }
    Ok(())
}

fn run_serve_ocr(config: &AppConfig, addr: Option<String>) -> Result<()> {
    let manager = ModelManager::new()?;
    let extractor = vision::load_text_extractor(&manager, &config.ocr)?;
    let service = OcrService::new(
        extractor,
        RefinementChain::from_settings(&config.refine),
        open_database(config),
        &config.ocr,
        &config.server,
    )
    .context("Failed to start OCR service")?;

    let addr = addr.unwrap_or_else(|| config.server.ocr_addr.clone());
    let server = server::bind(&addr)?;
    server::run(
        server,
        Arc::new(service),
        CorsPolicy::new(config.server.cors_origins.clone()),
    );
    Ok(())
}

fn run_models(download: bool) -> Result<()> {
    let manager = ModelManager::new()?;
    println!("Model directory: {}", manager.models_dir().display());

    for model in ModelType::ALL {
        if download && !manager.is_model_available(model) {
            if let Err(e) = manager.ensure_model(model) {
                warn!("{}: {:#}", model.display_name(), e);
            }
        }
    }

    for (model, available, size) in manager.get_model_status() {
        let state = match (available, size) {
            (true, Some(bytes)) => format!("ready ({:.1} MB)", bytes as f64 / 1_048_576.0),
            (true, None) => "ready".to_string(),
            (false, _) if model.download_url().is_none() => {
                format!("missing (place {} manually)", model.filename())
            }
            (false, _) => "missing".to_string(),
        };
        println!("  {:<28} {}", model.display_name(), state);
    }
    Ok(())
}
