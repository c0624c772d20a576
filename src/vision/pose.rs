//! Pose estimation
//!
//! The estimator is an external model consumed as a black box; the rest of
//! the tracker only sees landmark lists in pixel coordinates.

use anyhow::{Context, Result};
use image::RgbImage;
use ort::value::Tensor;
use std::path::Path;
use tracing::debug;

use super::models::OnnxSession;
use super::preprocess::preprocess_for_movenet;
use crate::tracker::geometry::Landmark;

/// Number of keypoints MoveNet produces
const MOVENET_KEYPOINTS: usize = 17;

/// Produces landmarks for the single person in a frame.
///
/// An empty list means nobody was detected with enough confidence.
pub trait PoseEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<Landmark>>;
}

/// MoveNet single-pose estimator running through ONNX Runtime
pub struct MoveNetEstimator {
    onnx: OnnxSession,
    min_confidence: f32,
}

impl MoveNetEstimator {
    pub fn new(model_path: &Path, min_confidence: f32) -> Result<Self> {
        Ok(Self {
            onnx: OnnxSession::new(model_path)?,
            min_confidence,
        })
    }
}

impl PoseEstimator for MoveNetEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<Landmark>> {
        let input = Tensor::from_array(preprocess_for_movenet(frame))?;
        let input_name = self.onnx.input_name().to_string();
        let output_name = self.onnx.output_name().to_string();

        let outputs = self
            .onnx
            .session_mut()
            .run(ort::inputs![input_name.as_str() => input])
            .context("Pose inference failed")?;

        let output: ndarray::ArrayViewD<f32> = outputs[output_name.as_str()]
            .try_extract_array()
            .context("Failed to extract pose output tensor")?;

        let raw = read_keypoints(&output)?;
        Ok(to_landmarks(&raw, frame.width(), frame.height(), self.min_confidence))
    }
}

/// Read `(x, y, confidence)` triples from a single-pose output shaped
/// `[1, 1, 17, 3]` holding `(y, x, confidence)` in normalized coordinates
pub fn read_keypoints(output: &ndarray::ArrayViewD<f32>) -> Result<Vec<(f32, f32, f32)>> {
    let shape = output.shape();
    if shape.len() != 4 || shape[0] < 1 || shape[1] < 1 || shape[2] < MOVENET_KEYPOINTS || shape[3] < 3 {
        anyhow::bail!(
            "Unexpected pose output shape {:?}, expected [1, 1, {}, 3]",
            shape,
            MOVENET_KEYPOINTS
        );
    }

    Ok((0..MOVENET_KEYPOINTS)
        .map(|i| (output[[0, 0, i, 1]], output[[0, 0, i, 0]], output[[0, 0, i, 2]]))
        .collect())
}

/// Convert normalized `(x, y, confidence)` keypoints into pixel landmarks.
/// Poses whose mean confidence is under `min_confidence` are dropped whole.
pub fn to_landmarks(raw: &[(f32, f32, f32)], width: u32, height: u32, min_confidence: f32) -> Vec<Landmark> {
    if raw.is_empty() {
        return Vec::new();
    }

    let mean = raw.iter().map(|k| k.2).sum::<f32>() / raw.len() as f32;
    if mean < min_confidence {
        debug!("Pose rejected, mean confidence {:.2}", mean);
        return Vec::new();
    }

    raw.iter()
        .enumerate()
        .map(|(id, &(x, y, _))| {
            Landmark::new(id, (x * width as f32).round(), (y * height as f32).round())
        })
        .collect()
}
