//! Frame data structures for captured camera content

use image::RgbImage;
use std::time::Instant;

/// A frame pulled from a video source
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }
}
