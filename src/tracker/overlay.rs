//! Frame annotation for the live view
//!
//! Draws the tracked arms, one progress bar per limb and the rep tally as
//! segment digits, then encodes the frame as JPEG.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use super::geometry::{JointTriple, Landmark, Topology};
use super::pipeline::LimbReadings;

const JOINT_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const BONE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BAR_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const BAR_FULL_COLOR: Rgb<u8> = Rgb([0, 120, 255]);
const TALLY_COLOR: Rgb<u8> = Rgb([255, 220, 0]);

const BAR_WIDTH: u32 = 24;
const BAR_MARGIN: u32 = 16;

/// Segments lit for each digit: top, top-right, bottom-right, bottom,
/// bottom-left, top-left, middle
const DIGIT_SEGMENTS: [[bool; 7]; 10] = [
    [true, true, true, true, true, true, false],
    [false, true, true, false, false, false, false],
    [true, true, false, true, true, false, true],
    [true, true, true, true, false, false, true],
    [false, true, true, false, false, true, true],
    [true, false, true, true, false, true, true],
    [true, false, true, true, true, true, true],
    [true, true, true, false, false, false, false],
    [true, true, true, true, true, true, true],
    [true, true, true, true, false, true, true],
];

/// Draw shoulder-elbow-wrist chains for both arms
pub fn draw_pose(image: &mut RgbImage, landmarks: &[Landmark], topology: &Topology) {
    for joint in [topology.left_elbow(), topology.right_elbow()] {
        draw_limb(image, landmarks, joint);
    }
}

fn draw_limb(image: &mut RgbImage, landmarks: &[Landmark], joint: JointTriple) {
    let find = |id: usize| landmarks.iter().find(|l| l.id == id).map(Landmark::point);
    let points: Vec<(f32, f32)> = [joint.p1, joint.p2, joint.p3].into_iter().filter_map(find).collect();

    for pair in points.windows(2) {
        draw_line_segment_mut(image, pair[0], pair[1], BONE_COLOR);
    }
    for &(x, y) in &points {
        draw_filled_circle_mut(image, (x as i32, y as i32), 6, JOINT_COLOR);
    }
}

/// Vertical progress bars: left limb on the left edge, right limb on the right
pub fn draw_progress(image: &mut RgbImage, readings: &LimbReadings) {
    let (width, height) = image.dimensions();
    if width < 2 * (BAR_WIDTH + BAR_MARGIN) || height < 2 * BAR_MARGIN + 2 {
        return;
    }

    let right_x = width - BAR_MARGIN - BAR_WIDTH;
    draw_bar(image, BAR_MARGIN, readings.left_pct);
    draw_bar(image, right_x, readings.right_pct);
}

fn draw_bar(image: &mut RgbImage, x: u32, pct: f32) {
    let height = image.height();
    let track_h = height - 2 * BAR_MARGIN;
    let frame = Rect::at(x as i32, BAR_MARGIN as i32).of_size(BAR_WIDTH, track_h);
    draw_hollow_rect_mut(image, frame, BAR_COLOR);

    let fill = ((pct.clamp(0.0, 100.0) / 100.0) * track_h as f32) as u32;
    if fill == 0 {
        return;
    }
    let color = if pct >= 100.0 { BAR_FULL_COLOR } else { BAR_COLOR };
    let top = BAR_MARGIN + track_h - fill;
    draw_filled_rect_mut(image, Rect::at(x as i32, top as i32).of_size(BAR_WIDTH, fill), color);
}

/// Whole-rep count in the top-left corner
pub fn draw_rep_tally(image: &mut RgbImage, reps: u32) {
    let digit_w = 18i32;
    let digit_h = 32i32;
    let mut x = (BAR_MARGIN + BAR_WIDTH + 12) as i32;
    let y = BAR_MARGIN as i32;

    for ch in reps.to_string().chars() {
        if let Some(d) = ch.to_digit(10) {
            if x + digit_w >= image.width() as i32 || y + digit_h >= image.height() as i32 {
                return;
            }
            draw_digit(image, d as usize, x, y, digit_w, digit_h);
        }
        x += digit_w + 6;
    }
}

fn draw_digit(image: &mut RgbImage, digit: usize, x: i32, y: i32, w: i32, h: i32) {
    let t = 3u32;
    let half = h / 2;
    let seg_w = w as u32;
    let seg_h = half as u32;

    let rects = [
        Rect::at(x, y).of_size(seg_w, t),
        Rect::at(x + w - t as i32, y).of_size(t, seg_h),
        Rect::at(x + w - t as i32, y + half).of_size(t, seg_h),
        Rect::at(x, y + h - t as i32).of_size(seg_w, t),
        Rect::at(x, y + half).of_size(t, seg_h),
        Rect::at(x, y).of_size(t, seg_h),
        Rect::at(x, y + half - 1).of_size(seg_w, t),
    ];

    for (lit, rect) in DIGIT_SEGMENTS[digit].iter().zip(rects) {
        if *lit {
            draw_filled_rect_mut(image, rect, TALLY_COLOR);
        }
    }
}

/// Encode an annotated frame for streaming
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .context("Failed to encode frame as JPEG")?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(left_pct: f32, right_pct: f32) -> LimbReadings {
        LimbReadings {
            left_angle: 0.0,
            right_angle: 0.0,
            left_pct,
            right_pct,
        }
    }

    #[test]
    fn test_progress_fill_tracks_percentage() {
        let mut img = RgbImage::new(320, 240);
        draw_progress(&mut img, &readings(100.0, 0.0));

        let mid_y = 120;
        // left bar filled, right bar only outlined
        assert_eq!(*img.get_pixel(BAR_MARGIN + BAR_WIDTH / 2, mid_y), BAR_FULL_COLOR);
        let right_center = 320 - BAR_MARGIN - BAR_WIDTH / 2;
        assert_eq!(*img.get_pixel(right_center, mid_y), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_tiny_frames_are_left_alone() {
        let mut img = RgbImage::new(10, 10);
        draw_progress(&mut img, &readings(50.0, 50.0));
        draw_rep_tally(&mut img, 12);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_draw_pose_marks_joints() {
        let mut img = RgbImage::new(200, 200);
        let landmarks = vec![
            Landmark::new(5, 20.0, 20.0),
            Landmark::new(7, 60.0, 60.0),
            Landmark::new(9, 100.0, 20.0),
        ];
        draw_pose(&mut img, &landmarks, &Topology::Coco17);
        assert_eq!(*img.get_pixel(60, 60), JOINT_COLOR);
    }

    #[test]
    fn test_encode_jpeg() {
        let img = RgbImage::from_pixel(32, 32, Rgb([10, 20, 30]));
        let bytes = encode_jpeg(&img, 80).unwrap();
        // SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
