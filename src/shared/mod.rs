//! Shared state and messaging between the capture loop and its observers
//!
//! The tracking session lives behind a mutex so the HTTP handlers and the
//! capture worker see the same count.

pub mod messages;
pub mod state;

pub use messages::{spawn_line_listener, ControlMessage};
pub use state::{SharedSession, TrackerSession, TrackerStatus};
