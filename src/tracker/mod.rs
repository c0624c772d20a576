//! Exercise tracking
//!
//! Pose landmarks in, repetition counts out. `geometry` and `counter` are
//! pure; `pipeline` wires them to a pose estimator and `session` drives the
//! frame loop.

pub mod counter;
pub mod geometry;
pub mod overlay;
pub mod pipeline;
pub mod session;

pub use counter::{Direction, RepCounter, Thresholds};
pub use geometry::{AngleDomain, Landmark, Topology};
pub use pipeline::{counter_from_settings, FrameProcessor, FrameReport, LimbModel};
pub use session::{run_standalone, spawn_capture_worker, SessionSummary, SourceFactory, StandaloneOptions};
