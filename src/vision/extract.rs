//! Text extraction stage
//!
//! Runs the OCR engine over an uploaded image, drops weak fragments and
//! joins the survivors in approximate reading order.

use image::RgbImage;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{info, warn};

use super::ocr::{OcrEngine, OcrFragment};
use super::preprocess::grayscale_rgb;

/// Returned whenever no usable text survives; never an empty string
pub const NO_TEXT_DETECTED: &str = "No text detected (image might be too blurry or low quality)";

/// Prefix marking a failed extraction
pub const ERROR_PREFIX: &str = "Error:";

/// Whether an extraction result reports a failure rather than text
pub fn is_error_text(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}

/// Strategy for ordering fragments before they are joined
pub trait ReadingOrder {
    fn arrange(&self, fragments: &mut [OcrFragment]);
}

/// Top-to-bottom by box centre, then left-to-right.
///
/// Good enough for single-column prescriptions; interleaves lines of
/// multi-column layouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowMajorOrder;

impl ReadingOrder for RowMajorOrder {
    fn arrange(&self, fragments: &mut [OcrFragment]) {
        fragments.sort_by(|a, b| {
            a.mean_y()
                .partial_cmp(&b.mean_y())
                .unwrap_or(Ordering::Equal)
                .then(a.mean_x().partial_cmp(&b.mean_x()).unwrap_or(Ordering::Equal))
        });
    }
}

/// OCR extraction with grayscale retry and confidence filtering
pub struct TextExtractor {
    engine: Box<dyn OcrEngine + Send>,
    order: Box<dyn ReadingOrder + Send + Sync>,
    min_confidence: f32,
}

impl TextExtractor {
    pub fn new(engine: Box<dyn OcrEngine + Send>, min_confidence: f32) -> Self {
        Self {
            engine,
            order: Box::new(RowMajorOrder),
            min_confidence,
        }
    }

    /// Extract text from an image file
    pub fn extract_file(&mut self, path: &Path) -> String {
        match image::open(path) {
            Ok(img) => self.extract(&img.to_rgb8()),
            Err(e) => {
                warn!("Could not read image {:?}: {}", path, e);
                format!("{} Could not read image.", ERROR_PREFIX)
            }
        }
    }

    /// Extract reading-order text from an RGB image
    pub fn extract(&mut self, image: &RgbImage) -> String {
        let fragments = match self.run_engine(image) {
            Some(fragments) => fragments,
            None => {
                info!("Raw OCR produced no result, retrying on grayscale");
                match self.run_engine(&grayscale_rgb(image)) {
                    Some(fragments) => fragments,
                    None => return NO_TEXT_DETECTED.to_string(),
                }
            }
        };

        let mut kept: Vec<OcrFragment> = fragments
            .into_iter()
            .filter(|f| f.confidence > self.min_confidence)
            .collect();
        if kept.is_empty() {
            return NO_TEXT_DETECTED.to_string();
        }

        self.order.arrange(&mut kept);

        let text = kept
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        if text.trim().is_empty() {
            NO_TEXT_DETECTED.to_string()
        } else {
            text
        }
    }

    /// Engine output, with errors and empty results both treated as "no result"
    fn run_engine(&mut self, image: &RgbImage) -> Option<Vec<OcrFragment>> {
        match self.engine.recognize(image) {
            Ok(Some(fragments)) if !fragments.is_empty() => Some(fragments),
            Ok(_) => None,
            Err(e) => {
                warn!("OCR engine failed: {:#}", e);
                None
            }
        }
    }
}
