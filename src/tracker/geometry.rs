//! Joint angle geometry over pose landmarks

use serde::{Deserialize, Serialize};

/// Angle returned when a joint cannot be measured this frame
pub const UNKNOWN_ANGLE: f32 = 0.0;

/// A detected anatomical keypoint in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// Index into the estimator's topology
    pub id: usize,
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn new(id: usize, x: f32, y: f32) -> Self {
        Self { id, x, y }
    }

    pub fn point(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

/// Three landmark indices describing a joint, `p2` being the vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointTriple {
    pub p1: usize,
    pub p2: usize,
    pub p3: usize,
}

impl JointTriple {
    pub const fn new(p1: usize, p2: usize, p3: usize) -> Self {
        Self { p1, p2, p3 }
    }
}

/// Landmark layout produced by the pose estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// 17 COCO keypoints (MoveNet)
    #[default]
    Coco17,
    /// 33 BlazePose keypoints (MediaPipe)
    MediaPipe33,
}

impl Topology {
    /// Shoulder, elbow, wrist of the left arm
    pub fn left_elbow(&self) -> JointTriple {
        match self {
            Topology::Coco17 => JointTriple::new(5, 7, 9),
            Topology::MediaPipe33 => JointTriple::new(11, 13, 15),
        }
    }

    /// Shoulder, elbow, wrist of the right arm
    pub fn right_elbow(&self) -> JointTriple {
        match self {
            Topology::Coco17 => JointTriple::new(6, 8, 10),
            Topology::MediaPipe33 => JointTriple::new(12, 14, 16),
        }
    }
}

/// Calibration range of a joint angle, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleDomain {
    /// Angle mapped to 100%
    pub low: f32,
    /// Angle mapped to 0%
    pub high: f32,
}

impl AngleDomain {
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }
}

/// Angle at `p2` between the rays towards `p1` and `p3`, in [0, 360)
pub fn joint_angle(p1: (f32, f32), p2: (f32, f32), p3: (f32, f32)) -> f32 {
    let to_p3 = (p3.1 - p2.1).atan2(p3.0 - p2.0);
    let to_p1 = (p1.1 - p2.1).atan2(p1.0 - p2.0);

    let mut angle = (to_p3 - to_p1).to_degrees();
    if angle < 0.0 {
        angle += 360.0;
    }
    // atan2 difference is within (-360, 360); guard float rounding at the edges
    if angle >= 360.0 || !angle.is_finite() {
        angle = angle.rem_euclid(360.0);
        if angle >= 360.0 || !angle.is_finite() {
            angle = 0.0;
        }
    }
    angle
}

/// Angle of a joint, or [`UNKNOWN_ANGLE`] when a landmark is missing
pub fn limb_angle(landmarks: &[Landmark], joint: JointTriple) -> f32 {
    let find = |id: usize| landmarks.iter().find(|l| l.id == id).map(Landmark::point);

    match (find(joint.p1), find(joint.p2), find(joint.p3)) {
        (Some(p1), Some(p2), Some(p3)) => joint_angle(p1, p2, p3),
        _ => UNKNOWN_ANGLE,
    }
}

/// Fold reflex angles so the inner angle is measured regardless of side
pub fn fold_reflex(angle: f32) -> f32 {
    if angle > 180.0 {
        360.0 - angle
    } else {
        angle
    }
}

/// Linear interpolation clamped to the output range, like `numpy.interp`
pub fn interp(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let (x0, x1) = from;
    let (y0, y1) = to;

    if value <= x0 {
        return y0;
    }
    if value >= x1 {
        return y1;
    }
    y0 + (value - x0) * (y1 - y0) / (x1 - x0)
}

/// Map a joint angle onto the 100 (at `domain.low`) to 0 (at `domain.high`) scale
pub fn extension_percent(angle: f32, domain: AngleDomain) -> f32 {
    interp(angle, (domain.low, domain.high), (100.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-3, "{a} != {b}");
    }

    #[test]
    fn test_straight_arm_is_180() {
        assert_close(joint_angle((0.0, 0.0), (10.0, 0.0), (20.0, 0.0)), 180.0);
    }

    #[test]
    fn test_right_angle_orientation() {
        // p1 to the left, p3 below (image y grows downward)
        assert_close(joint_angle((0.0, 10.0), (10.0, 10.0), (10.0, 20.0)), 270.0);
        assert_close(joint_angle((10.0, 20.0), (10.0, 10.0), (0.0, 10.0)), 90.0);
    }

    #[test]
    fn test_angle_always_in_range() {
        let coords = [-500.0, -37.5, -1.0, 0.0, 0.25, 3.0, 99.9, 640.0];
        for &x1 in &coords {
            for &y1 in &coords {
                for &x3 in &coords {
                    for &y3 in &coords {
                        let angle = joint_angle((x1, y1), (1.5, -2.5), (x3, y3));
                        assert!((0.0..360.0).contains(&angle), "out of range: {angle}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_coincident_points_stay_in_range() {
        let angle = joint_angle((5.0, 5.0), (5.0, 5.0), (5.0, 5.0));
        assert!((0.0..360.0).contains(&angle));
    }

    #[test]
    fn test_limb_angle_missing_landmark_is_unknown() {
        let landmarks = vec![Landmark::new(5, 0.0, 0.0), Landmark::new(7, 10.0, 0.0)];
        assert_eq!(limb_angle(&landmarks, Topology::Coco17.left_elbow()), UNKNOWN_ANGLE);
        assert_eq!(limb_angle(&[], Topology::Coco17.left_elbow()), UNKNOWN_ANGLE);
    }

    #[test]
    fn test_limb_angle_uses_ids_not_positions() {
        let landmarks = vec![
            Landmark::new(9, 20.0, 0.0),
            Landmark::new(5, 0.0, 0.0),
            Landmark::new(7, 10.0, 0.0),
        ];
        assert_close(limb_angle(&landmarks, Topology::Coco17.left_elbow()), 180.0);
    }

    #[test]
    fn test_fold_reflex() {
        assert_close(fold_reflex(270.0), 90.0);
        assert_close(fold_reflex(180.0), 180.0);
        assert_close(fold_reflex(45.0), 45.0);
    }

    #[test]
    fn test_extension_percent_clamps() {
        let domain = AngleDomain::new(70.0, 160.0);
        assert_close(extension_percent(40.0, domain), 100.0);
        assert_close(extension_percent(70.0, domain), 100.0);
        assert_close(extension_percent(115.0, domain), 50.0);
        assert_close(extension_percent(160.0, domain), 0.0);
        assert_close(extension_percent(300.0, domain), 0.0);
    }

    #[test]
    fn test_topology_triples() {
        assert_eq!(Topology::MediaPipe33.right_elbow(), JointTriple::new(12, 14, 16));
        assert_eq!(Topology::MediaPipe33.left_elbow(), JointTriple::new(11, 13, 15));
    }
}
