//! OCR (Optical Character Recognition) module
//!
//! Uses PaddleOCR models via ONNX Runtime for text detection and recognition.

use anyhow::{Context, Result};
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{ArrayViewD, Ix2};
use ort::value::Tensor;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::models::OnnxSession;
use super::preprocess::{crop_quad, preprocess_for_detection, preprocess_for_recognition, PreprocessConfig};

/// Smallest detected region side, in detection-map pixels
const MIN_REGION_SIDE: u32 = 3;

/// One detected text region
#[derive(Debug, Clone, PartialEq)]
pub struct OcrFragment {
    /// Corners clockwise from top-left, in image pixels
    pub bounding_box: [(f32, f32); 4],
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl OcrFragment {
    pub fn new(bounding_box: [(f32, f32); 4], text: impl Into<String>, confidence: f32) -> Self {
        Self {
            bounding_box,
            text: text.into(),
            confidence,
        }
    }

    /// Mean of the four corner x coordinates
    pub fn mean_x(&self) -> f32 {
        self.bounding_box.iter().map(|p| p.0).sum::<f32>() / 4.0
    }

    /// Mean of the four corner y coordinates
    pub fn mean_y(&self) -> f32 {
        self.bounding_box.iter().map(|p| p.1).sum::<f32>() / 4.0
    }
}

/// Text detection and recognition engine.
///
/// `Ok(None)` means the engine produced no result at all for this image.
pub trait OcrEngine {
    fn recognize(&mut self, image: &RgbImage) -> Result<Option<Vec<OcrFragment>>>;
}

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct PaddleOcrEngine {
    detection: OnnxSession,
    recognition: OnnxSession,
    /// Character table; index 0 of the model output is the CTC blank
    charset: Vec<String>,
    config: PreprocessConfig,
    det_threshold: f32,
}

impl PaddleOcrEngine {
    /// Initialize OCR engine with model paths
    pub fn new(det_model: &Path, rec_model: &Path, dictionary: &Path, det_threshold: f32) -> Result<Self> {
        let dict = std::fs::read_to_string(dictionary)
            .with_context(|| format!("Failed to read OCR dictionary {:?}", dictionary))?;

        Ok(Self {
            detection: OnnxSession::new(det_model)?,
            recognition: OnnxSession::new(rec_model)?,
            charset: load_charset(&dict),
            config: PreprocessConfig::default(),
            det_threshold,
        })
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<([(f32, f32); 4], f32)>> {
        let (input, scale) = preprocess_for_detection(image, &self.config);
        let input_name = self.detection.input_name().to_string();
        let output_name = self.detection.output_name().to_string();

        let outputs = self
            .detection
            .session_mut()
            .run(ort::inputs![input_name.as_str() => Tensor::from_array(input)?])
            .context("Text detection failed")?;

        // [1, 1, H, W] probability map
        let prob_map: ArrayViewD<f32> = outputs[output_name.as_str()]
            .try_extract_array()
            .context("Failed to extract detection map")?;
        let shape = prob_map.shape().to_vec();
        if shape.len() != 4 {
            anyhow::bail!("Unexpected detection output shape {:?}", shape);
        }
        let (map_h, map_w) = (shape[2], shape[3]);

        let valid_w = ((image.width() as f32 * scale) as usize).min(map_w);
        let valid_h = ((image.height() as f32 * scale) as usize).min(map_h);
        let probs: Vec<f32> = (0..valid_h)
            .flat_map(|y| (0..valid_w).map(move |x| (y, x)))
            .map(|(y, x)| prob_map[[0, 0, y, x]])
            .collect();

        Ok(boxes_from_probability_map(&probs, valid_w as u32, valid_h as u32, self.det_threshold)
            .into_iter()
            .map(|(quad, score)| (quad.map(|(x, y)| (x / scale, y / scale)), score))
            .collect())
    }

    fn read_line(&mut self, crop: &RgbImage) -> Result<(String, f32)> {
        let input = preprocess_for_recognition(crop, &self.config);
        let input_name = self.recognition.input_name().to_string();
        let output_name = self.recognition.output_name().to_string();

        let outputs = self
            .recognition
            .session_mut()
            .run(ort::inputs![input_name.as_str() => Tensor::from_array(input)?])
            .context("Text recognition failed")?;

        // [1, T, C] per-step class probabilities
        let logits: ArrayViewD<f32> = outputs[output_name.as_str()]
            .try_extract_array()
            .context("Failed to extract recognition output")?;
        let steps = logits
            .index_axis(ndarray::Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .context("Unexpected recognition output shape")?;

        let best: Vec<(usize, f32)> = steps
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::MIN), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc })
            })
            .collect();

        Ok(ctc_greedy_decode(&best, &self.charset))
    }
}

impl OcrEngine for PaddleOcrEngine {
    fn recognize(&mut self, image: &RgbImage) -> Result<Option<Vec<OcrFragment>>> {
        let regions = self.detect(image)?;
        debug!("Detected {} text regions", regions.len());
        if regions.is_empty() {
            return Ok(None);
        }

        let mut fragments = Vec::with_capacity(regions.len());
        for (quad, _) in regions {
            let Some(crop) = crop_quad(image, &quad) else {
                continue;
            };
            let (text, confidence) = self.read_line(&crop)?;
            if !text.trim().is_empty() {
                fragments.push(OcrFragment::new(quad, text, confidence));
            }
        }

        Ok(if fragments.is_empty() { None } else { Some(fragments) })
    }
}

/// Dictionary lines plus the trailing space PaddleOCR models are trained with
pub fn load_charset(dict: &str) -> Vec<String> {
    let mut charset: Vec<String> = dict
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect();
    charset.push(" ".to_string());
    charset
}

/// Collapse repeats and drop blanks (class 0). Returns text and the mean
/// probability of the kept characters.
pub fn ctc_greedy_decode(best: &[(usize, f32)], charset: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = 0usize;

    for &(class, prob) in best {
        if class != 0 && class != previous {
            if let Some(ch) = charset.get(class - 1) {
                text.push_str(ch);
                scores.push(prob);
            }
        }
        previous = class;
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    (text, confidence)
}

/// Threshold a probability map and return one expanded box per connected
/// region, with the region's mean probability as its score.
pub fn boxes_from_probability_map(
    probs: &[f32],
    width: u32,
    height: u32,
    threshold: f32,
) -> Vec<([(f32, f32); 4], f32)> {
    if width == 0 || height == 0 || probs.len() < (width * height) as usize {
        return Vec::new();
    }

    let binary = GrayImage::from_fn(width, height, |x, y| {
        if probs[(y * width + x) as usize] > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y, prob_sum, count)
    let mut regions: HashMap<u32, (u32, u32, u32, u32, f32, u32)> = HashMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        let p = probs[(y * width + x) as usize];
        let entry = regions.entry(label).or_insert((x, y, x, y, 0.0, 0));
        entry.0 = entry.0.min(x);
        entry.1 = entry.1.min(y);
        entry.2 = entry.2.max(x);
        entry.3 = entry.3.max(y);
        entry.4 += p;
        entry.5 += 1;
    }

    let mut boxes: Vec<([(f32, f32); 4], f32)> = regions
        .into_values()
        .filter(|r| r.2 - r.0 + 1 >= MIN_REGION_SIDE && r.3 - r.1 + 1 >= MIN_REGION_SIDE)
        .map(|(x0, y0, x1, y1, sum, count)| {
            // DBNet shrinks text kernels; grow the box back by half its height
            let pad = (y1 - y0 + 1) as f32 * 0.5;
            let left = (x0 as f32 - pad).max(0.0);
            let top = (y0 as f32 - pad).max(0.0);
            let right = (x1 as f32 + 1.0 + pad).min(width as f32);
            let bottom = (y1 as f32 + 1.0 + pad).min(height as f32);
            (
                [(left, top), (right, top), (right, bottom), (left, bottom)],
                sum / count as f32,
            )
        })
        .collect();

    boxes.sort_by(|a, b| a.0[0].1.total_cmp(&b.0[0].1).then(a.0[0].0.total_cmp(&b.0[0].0)));
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charset() -> Vec<String> {
        load_charset("a\nb\nc\n")
    }

    #[test]
    fn test_load_charset_appends_space() {
        let set = charset();
        assert_eq!(set, vec!["a", "b", "c", " "]);
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        // a a _ a b b _ space c
        let best = [(1, 0.9), (1, 0.8), (0, 0.99), (1, 0.7), (2, 0.6), (2, 0.5), (0, 0.9), (4, 0.8), (3, 1.0)];
        let (text, confidence) = ctc_greedy_decode(&best, &charset());
        assert_eq!(text, "aab c");
        assert!((confidence - (0.9 + 0.7 + 0.6 + 0.8 + 1.0) / 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_ctc_all_blank() {
        let (text, confidence) = ctc_greedy_decode(&[(0, 0.9), (0, 0.9)], &charset());
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_boxes_from_probability_map() {
        let (w, h) = (20u32, 12u32);
        let mut probs = vec![0.0f32; (w * h) as usize];
        // a 6x4 blob at (2..8, 2..6) and a 1 pixel speck at (15, 10)
        for y in 2..6 {
            for x in 2..8 {
                probs[(y * w + x) as usize] = 0.8;
            }
        }
        probs[(10 * w + 15) as usize] = 0.9;

        let boxes = boxes_from_probability_map(&probs, w, h, 0.3);
        assert_eq!(boxes.len(), 1);

        let (quad, score) = boxes[0];
        assert!((score - 0.8).abs() < 1e-5);
        // height 4 -> pad 2
        assert_eq!(quad[0], (0.0, 0.0));
        assert_eq!(quad[2], (10.0, 8.0));
    }

    #[test]
    fn test_fragment_means() {
        let frag = OcrFragment::new([(0.0, 10.0), (10.0, 10.0), (10.0, 20.0), (0.0, 20.0)], "x", 0.5);
        assert_eq!(frag.mean_x(), 5.0);
        assert_eq!(frag.mean_y(), 15.0);
    }
}
