//! Per-frame processing: landmarks → angles → percentages → rep counter

use std::time::Instant;
use tracing::{debug, info, warn};

use super::counter::{Direction, RepCounter, Thresholds};
use super::geometry::{extension_percent, fold_reflex, limb_angle, AngleDomain, Landmark, Topology, UNKNOWN_ANGLE};
use super::overlay;
use crate::capture::CapturedFrame;
use crate::config::TrackerSettings;
use crate::vision::PoseEstimator;

/// Angle and percentage readings for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimbReadings {
    pub left_angle: f32,
    pub right_angle: f32,
    pub left_pct: f32,
    pub right_pct: f32,
}

impl LimbReadings {
    /// Both elbows were measured, so the frame may drive the counter
    pub fn qualifies(&self) -> bool {
        self.left_angle != UNKNOWN_ANGLE && self.right_angle != UNKNOWN_ANGLE
    }
}

/// Outcome of processing one frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// None when no person was detected
    pub readings: Option<LimbReadings>,
    /// Set when this frame completed a half-rep
    pub transition: Option<Direction>,
    /// Whole reps so far
    pub reps: u32,
    pub fps: f32,
}

/// Frames-per-second from the gap between consecutive frames
#[derive(Debug, Default)]
pub struct FpsMeter {
    last: Option<Instant>,
}

impl FpsMeter {
    pub fn tick(&mut self, now: Instant) -> f32 {
        let fps = match self.last {
            Some(previous) => {
                let dt = now.saturating_duration_since(previous).as_secs_f32();
                if dt > 0.0 {
                    1.0 / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some(now);
        fps
    }
}

/// Joint configuration shared by every frame
#[derive(Debug, Clone, Copy)]
pub struct LimbModel {
    pub topology: Topology,
    pub domain: AngleDomain,
    pub fold_reflex: bool,
}

impl LimbModel {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            topology: settings.topology,
            domain: settings.angle_domain,
            fold_reflex: settings.fold_reflex_angles,
        }
    }

    /// Measure both elbows from a landmark list
    pub fn measure(&self, landmarks: &[Landmark]) -> LimbReadings {
        let angle = |joint| {
            let raw = limb_angle(landmarks, joint);
            if self.fold_reflex {
                fold_reflex(raw)
            } else {
                raw
            }
        };

        let left_angle = angle(self.topology.left_elbow());
        let right_angle = angle(self.topology.right_elbow());

        LimbReadings {
            left_angle,
            right_angle,
            left_pct: extension_percent(left_angle, self.domain),
            right_pct: extension_percent(right_angle, self.domain),
        }
    }
}

/// Runs the pose estimator and feeds the rep counter, one frame at a time
pub struct FrameProcessor {
    estimator: Box<dyn PoseEstimator + Send>,
    limbs: LimbModel,
    fps: FpsMeter,
}

impl FrameProcessor {
    pub fn new(estimator: Box<dyn PoseEstimator + Send>, limbs: LimbModel) -> Self {
        info!(
            "Tracking elbows on {:?}, calibration {:.0}-{:.0} degrees",
            limbs.topology, limbs.domain.low, limbs.domain.high
        );
        Self {
            estimator,
            limbs,
            fps: FpsMeter::default(),
        }
    }

    /// Process a frame: update `counter` and draw the overlay onto the frame
    pub fn process(&mut self, frame: &mut CapturedFrame, counter: &mut RepCounter) -> FrameReport {
        let landmarks = match self.estimator.estimate(&frame.image) {
            Ok(landmarks) => landmarks,
            Err(e) => {
                warn!("Pose estimation failed: {:#}", e);
                Vec::new()
            }
        };

        let (readings, transition) = if landmarks.is_empty() {
            (None, None)
        } else {
            let readings = self.limbs.measure(&landmarks);
            let transition = if readings.qualifies() {
                counter.update(readings.left_pct, readings.right_pct)
            } else {
                debug!("Elbow landmarks incomplete, frame not counted");
                None
            };
            if let Some(direction) = transition {
                debug!("Half-rep completed, now {:?}, count {}", direction, counter.count());
            }
            overlay::draw_pose(&mut frame.image, &landmarks, &self.limbs.topology);
            overlay::draw_progress(&mut frame.image, &readings);
            (Some(readings), transition)
        };

        let fps = self.fps.tick(frame.timestamp);
        overlay::draw_rep_tally(&mut frame.image, counter.reps());

        FrameReport {
            readings,
            transition,
            reps: counter.reps(),
            fps,
        }
    }
}

/// Counter built from the configured thresholds
pub fn counter_from_settings(settings: &TrackerSettings) -> RepCounter {
    RepCounter::new(Thresholds {
        upper: settings.upper_threshold,
        lower: settings.lower_threshold,
    })
}
