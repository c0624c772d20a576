//! Image preprocessing for the ONNX models
//!
//! Resizing, normalization and tensor layout for MoveNet and the
//! PaddleOCR detection/recognition models.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::{Array3, Array4};

/// MoveNet input resolution
pub const MOVENET_INPUT_SIZE: u32 = 192;

/// Preprocessing configuration for PaddleOCR
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side for the detection model input
    pub det_target_size: u32,
    /// Fixed height for the recognition model
    pub rec_target_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_target_size: 960,
            rec_target_height: 48,
            rec_max_width: 640,
        }
    }
}

/// Convert an RGB image into an HWC f32 array scaled to [-1, 1].
/// PaddleOCR expects `(pixel / 255 - 0.5) / 0.5`.
pub fn to_normalized_hwc(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32).0[c] as f32 / 127.5 - 1.0
    })
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let chw = image.view().permuted_axes([2, 0, 1]);
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));
    tensor.index_axis_mut(ndarray::Axis(0), 0).assign(&chw);
    tensor
}

/// Scale to fit `target_size` on the longest side and pad both sides up to
/// multiples of 32 (DBNet requirement). Returns the tensor and the scale.
pub fn preprocess_for_detection(image: &RgbImage, config: &PreprocessConfig) -> (Array4<f32>, f32) {
    let (w, h) = image.dimensions();
    let scale = config.det_target_size as f32 / w.max(h).max(1) as f32;
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let normalized = to_normalized_hwc(&resized);

    let (rows, cols) = (new_h as usize, new_w as usize);
    let padded_h = rows.div_ceil(32) * 32;
    let padded_w = cols.div_ceil(32) * 32;
    let mut padded = Array3::<f32>::zeros((padded_h, padded_w, 3));
    padded.slice_mut(ndarray::s![..rows, ..cols, ..]).assign(&normalized);

    (hwc_to_nchw(&padded), scale)
}

/// Resize a text crop to the recognition height, keeping aspect ratio
pub fn preprocess_for_recognition(crop: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let scale = config.rec_target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale) as u32).clamp(1, config.rec_max_width);

    let resized = imageops::resize(crop, new_w, config.rec_target_height, FilterType::Triangle);
    hwc_to_nchw(&to_normalized_hwc(&resized))
}

/// Axis-aligned crop around a quadrilateral, clamped to the image
pub fn crop_quad(image: &RgbImage, quad: &[(f32, f32); 4]) -> Option<RgbImage> {
    let min_x = quad.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let min_y = quad.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let max_x = (quad.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).ceil() as u32).min(image.width());
    let max_y = (quad.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).ceil() as u32).min(image.height());

    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(imageops::crop_imm(image, min_x, min_y, max_x - min_x, max_y - min_y).to_image())
}

/// Grayscale copy kept in three channels so it can be fed to the same engine
pub fn grayscale_rgb(image: &RgbImage) -> RgbImage {
    let gray: GrayImage = DynamicImage::ImageRgb8(image.clone()).to_luma8();
    DynamicImage::ImageLuma8(gray).to_rgb8()
}

/// Square-resize a frame into MoveNet's `[1, 192, 192, 3]` input (0-255 floats)
pub fn preprocess_for_movenet(image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, MOVENET_INPUT_SIZE, MOVENET_INPUT_SIZE, FilterType::Triangle);
    let size = MOVENET_INPUT_SIZE as usize;
    Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32).0[c] as f32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_normalization_range() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([0, 255, 0]));
        img.put_pixel(1, 0, Rgb([255, 0, 255]));

        let hwc = to_normalized_hwc(&img);
        assert_eq!(hwc.dim(), (1, 2, 3));
        assert!((hwc[[0, 0, 0]] + 1.0).abs() < 1e-5);
        assert!((hwc[[0, 0, 1]] - 1.0).abs() < 1e-5);
        assert!((hwc[[0, 1, 2]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| (h * 100 + w * 10 + c) as f32);
        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_detection_input_padded_to_32() {
        let img = RgbImage::from_pixel(100, 50, Rgb([128, 128, 128]));
        let config = PreprocessConfig {
            det_target_size: 200,
            ..Default::default()
        };
        let (tensor, scale) = preprocess_for_detection(&img, &config);

        assert!((scale - 2.0).abs() < 1e-5);
        assert_eq!(tensor.dim(), (1, 3, 128, 224));
        // padding stays zero
        assert_eq!(tensor[[0, 0, 127, 223]], 0.0);
    }

    #[test]
    fn test_recognition_width_is_capped() {
        let img = RgbImage::from_pixel(2000, 20, Rgb([255, 255, 255]));
        let tensor = preprocess_for_recognition(&img, &PreprocessConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 48, 640));
    }

    #[test]
    fn test_crop_quad_clamps() {
        let img = RgbImage::new(50, 40);
        let quad = [(-5.0, 10.0), (60.0, 10.0), (60.0, 20.0), (-5.0, 20.0)];
        let crop = crop_quad(&img, &quad).unwrap();
        assert_eq!(crop.dimensions(), (50, 10));

        let empty = [(10.0, 10.0); 4];
        assert!(crop_quad(&img, &empty).is_none());
    }

    #[test]
    fn test_grayscale_keeps_three_channels() {
        let img = RgbImage::from_pixel(3, 3, Rgb([200, 10, 10]));
        let gray = grayscale_rgb(&img);
        let px = gray.get_pixel(1, 1).0;
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn test_movenet_input_shape() {
        let img = RgbImage::from_pixel(640, 480, Rgb([1, 2, 3]));
        let tensor = preprocess_for_movenet(&img);
        assert_eq!(tensor.dim(), (1, 192, 192, 3));
        assert_eq!(tensor[[0, 10, 10, 2]], 3.0);
    }
}
