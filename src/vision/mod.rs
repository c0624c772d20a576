//! Vision Layer
//!
//! Pose estimation for the rep tracker and text extraction for prescription
//! scans. Both engines are ONNX models loaded once and held for the process
//! lifetime.

pub mod extract;
pub mod models;
pub mod ocr;
pub mod pose;
pub mod preprocess;

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::config::{OcrSettings, TrackerSettings};

pub use extract::{is_error_text, TextExtractor, NO_TEXT_DETECTED};
pub use models::{ModelManager, ModelType};
pub use ocr::{OcrEngine, OcrFragment, PaddleOcrEngine};
pub use pose::{MoveNetEstimator, PoseEstimator};

/// Load the PaddleOCR engine, downloading models when missing
pub fn load_text_extractor(manager: &ModelManager, settings: &OcrSettings) -> Result<TextExtractor> {
    info!("Initializing PaddleOCR backend");

    manager.ensure_ocr_models()?;
    let det = manager.model_path(ModelType::Detection);
    let rec = manager.model_path(ModelType::Recognition);
    let dict = manager.model_path(ModelType::Dictionary);

    let engine = PaddleOcrEngine::new(&det, &rec, &dict, settings.detection_threshold)?;
    info!("PaddleOCR initialized successfully");

    Ok(TextExtractor::new(Box::new(engine), settings.min_confidence))
}

/// Load the pose estimator from an explicit path or the model directory
pub fn load_pose_estimator(
    manager: &ModelManager,
    model_path: Option<PathBuf>,
    settings: &TrackerSettings,
) -> Result<MoveNetEstimator> {
    let path = match model_path {
        Some(path) => path,
        None => manager.ensure_model(ModelType::Pose)?,
    };

    info!("Initializing pose estimator from {:?}", path);
    MoveNetEstimator::new(&path, settings.min_pose_confidence)
}
