//! Two-state hysteresis rep counter
//!
//! Each qualifying half-cycle (both limbs crossing the upper threshold
//! while DOWN, or the lower threshold while UP) adds half a repetition.
//! Only whole repetitions are reported downstream.

use serde::Serialize;

/// Phase of the tracked movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Direction {
    /// Waiting for both limbs to reach the upper threshold
    #[default]
    Down = 0,
    /// Waiting for both limbs to return to the lower threshold
    Up = 1,
}

impl Direction {
    /// Numeric form used by the status API
    pub fn as_code(&self) -> u8 {
        *self as u8
    }
}

/// Percentage thresholds driving the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub upper: f32,
    pub lower: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            upper: 90.0,
            lower: 10.0,
        }
    }
}

/// Rep counting state for one tracking session
#[derive(Debug, Clone, Default)]
pub struct RepCounter {
    direction: Direction,
    half_reps: u32,
    thresholds: Thresholds,
}

impl RepCounter {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            direction: Direction::Down,
            half_reps: 0,
            thresholds,
        }
    }

    /// Feed one frame's per-limb percentages.
    ///
    /// Returns the new direction when a half-cycle completed.
    pub fn update(&mut self, left_pct: f32, right_pct: f32) -> Option<Direction> {
        let Thresholds { upper, lower } = self.thresholds;

        let next = match self.direction {
            Direction::Down if left_pct >= upper && right_pct >= upper => Direction::Up,
            Direction::Up if left_pct <= lower && right_pct <= lower => Direction::Down,
            _ => return None,
        };

        self.direction = next;
        self.half_reps += 1;
        Some(next)
    }

    /// Current phase
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Half-integer count including an unfinished repetition
    pub fn count(&self) -> f32 {
        self.half_reps as f32 / 2.0
    }

    /// Completed repetitions
    pub fn reps(&self) -> u32 {
        self.half_reps / 2
    }

    /// Start over at zero, waiting for extension
    pub fn reset(&mut self) {
        self.direction = Direction::Down;
        self.half_reps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle_sequence() {
        let mut counter = RepCounter::default();
        let frames = [(95.0, 95.0), (5.0, 5.0), (95.0, 95.0), (5.0, 5.0)];
        let expected_counts = [0.5, 1.0, 1.5, 2.0];
        let expected_reps = [0, 1, 1, 2];

        assert_eq!(counter.count(), 0.0);
        assert_eq!(counter.reps(), 0);

        for (i, (l, r)) in frames.iter().enumerate() {
            assert!(counter.update(*l, *r).is_some());
            assert_eq!(counter.count(), expected_counts[i]);
            assert_eq!(counter.reps(), expected_reps[i]);
        }
    }

    #[test]
    fn test_no_double_count_within_half_cycle() {
        let mut counter = RepCounter::default();
        assert_eq!(counter.update(95.0, 95.0), Some(Direction::Up));
        assert_eq!(counter.update(99.0, 100.0), None);
        assert_eq!(counter.update(92.0, 91.0), None);
        assert_eq!(counter.count(), 0.5);
        assert_eq!(counter.direction(), Direction::Up);
    }

    #[test]
    fn test_single_limb_is_ignored() {
        let mut counter = RepCounter::default();
        assert_eq!(counter.update(100.0, 40.0), None);
        assert_eq!(counter.update(40.0, 100.0), None);
        assert_eq!(counter.count(), 0.0);
        assert_eq!(counter.direction(), Direction::Down);
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let mut counter = RepCounter::default();
        assert_eq!(counter.update(90.0, 90.0), Some(Direction::Up));
        assert_eq!(counter.update(10.0, 10.0), Some(Direction::Down));
        assert_eq!(counter.reps(), 1);
    }

    #[test]
    fn test_midrange_jitter_never_counts() {
        let mut counter = RepCounter::default();
        for pct in [45.0, 55.0, 48.0, 52.0, 11.0, 89.0] {
            assert_eq!(counter.update(pct, pct), None);
        }
        assert_eq!(counter.count(), 0.0);
    }

    #[test]
    fn test_count_monotonic_in_half_steps() {
        let mut counter = RepCounter::default();
        let mut previous = counter.count();
        let inputs = [0.0, 95.0, 50.0, 97.0, 3.0, 3.0, 91.0, 12.0, 8.0, 100.0];
        for pct in inputs {
            counter.update(pct, pct);
            let delta = counter.count() - previous;
            assert!(delta == 0.0 || delta == 0.5, "unexpected step {delta}");
            previous = counter.count();
        }
        assert_eq!(counter.count(), 2.5);
    }

    #[test]
    fn test_reset() {
        let mut counter = RepCounter::default();
        counter.update(95.0, 95.0);
        counter.reset();
        assert_eq!(counter.count(), 0.0);
        assert_eq!(counter.direction(), Direction::Down);
        assert_eq!(counter.direction().as_code(), 0);
    }

    #[test]
    fn test_custom_thresholds() {
        let mut counter = RepCounter::new(Thresholds { upper: 80.0, lower: 20.0 });
        assert!(counter.update(85.0, 81.0).is_some());
        assert!(counter.update(19.0, 20.0).is_some());
        assert_eq!(counter.reps(), 1);
    }
}
