//! Video Capture Layer
//!
//! Frame sources feeding the rep tracker: a live camera through nokhwa,
//! or a directory of still frames replayed in name order.

pub mod frame;

use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use frame::CapturedFrame;

/// Blocking source of video frames.
///
/// `next_frame` returns `Ok(None)` once the source is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;
}

/// Live camera opened through nokhwa; the stream is released on drop
pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    /// Open the camera at `index` and start streaming
    pub fn open(index: u32) -> Result<Self> {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .with_context(|| format!("Failed to open camera {}", index))?;
        camera
            .open_stream()
            .context("Failed to start camera stream")?;

        let resolution = camera.resolution();
        info!(
            "Camera {} opened at {}x{} @ {} fps",
            index,
            resolution.width(),
            resolution.height(),
            camera.frame_rate()
        );

        Ok(Self { camera })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let buffer = self.camera.frame().context("Failed to read frame")?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        let (width, height) = (decoded.width(), decoded.height());
        let image = image::RgbImage::from_raw(width, height, decoded.into_raw())
            .context("Camera frame has unexpected buffer size")?;

        Ok(Some(CapturedFrame::new(image)))
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to release camera: {}", e);
        } else {
            info!("Camera released");
        }
    }
}

/// Replays image files from a directory, sorted by file name
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        files.sort();

        info!("Replaying {} frames from {:?}", files.len(), dir);
        Ok(Self { files, next: 0 })
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let image = image::open(path)
            .with_context(|| format!("Failed to load frame {:?}", path))?
            .to_rgb8();
        Ok(Some(CapturedFrame::new(image)))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "bmp"))
        .unwrap_or(false)
}
