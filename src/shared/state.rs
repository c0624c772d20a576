//! Tracker session state shared between the capture worker and HTTP handlers

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::tracker::counter::RepCounter;

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerStatus {
    /// Whole reps completed
    pub push_ups: u32,
    /// 0 while waiting for flexion, 1 while waiting for extension
    pub direction: u8,
    pub is_active: bool,
}

/// One rep-tracking session
#[derive(Debug)]
pub struct TrackerSession {
    counter: RepCounter,
    started_at: Instant,
    /// Frames processed since start or last reset
    pub frames: u64,
    /// Most recent annotated frame, JPEG encoded
    latest_jpeg: Option<Arc<Vec<u8>>>,
    frame_seq: u64,
    /// Last capture error, cleared by the next good frame
    pub last_error: Option<String>,
    active: bool,
}

impl TrackerSession {
    pub fn new(counter: RepCounter) -> Self {
        Self {
            counter,
            started_at: Instant::now(),
            frames: 0,
            latest_jpeg: None,
            frame_seq: 0,
            last_error: None,
            active: true,
        }
    }

    pub fn counter_mut(&mut self) -> &mut RepCounter {
        &mut self.counter
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            push_ups: self.counter.reps(),
            direction: self.counter.direction().as_code(),
            is_active: self.active,
        }
    }

    /// Zero the count and restart the clock
    pub fn reset(&mut self) {
        self.counter.reset();
        self.started_at = Instant::now();
        self.frames = 0;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark the session finished; waiting viewers are released
    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn latest_frame(&self) -> Option<(u64, Arc<Vec<u8>>)> {
        self.latest_jpeg.as_ref().map(|jpeg| (self.frame_seq, jpeg.clone()))
    }

    fn set_frame(&mut self, jpeg: Vec<u8>) {
        self.latest_jpeg = Some(Arc::new(jpeg));
        self.frame_seq += 1;
        self.frames += 1;
        self.last_error = None;
    }
}

/// Handle to a session shared across threads
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<TrackerSession>>,
    frame_ready: Arc<Condvar>,
}

impl SharedSession {
    pub fn new(session: TrackerSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            frame_ready: Arc::new(Condvar::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TrackerSession> {
        self.inner.lock()
    }

    pub fn status(&self) -> TrackerStatus {
        self.inner.lock().status()
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Publish a new annotated frame and wake viewers
    pub fn publish_frame(&self, jpeg: Vec<u8>) {
        self.inner.lock().set_frame(jpeg);
        self.frame_ready.notify_all();
    }

    /// Record a capture failure without disturbing the count
    pub fn record_error(&self, message: impl Into<String>) {
        self.inner.lock().last_error = Some(message.into());
    }

    pub fn stop(&self) {
        self.inner.lock().stop();
        self.frame_ready.notify_all();
    }

    /// Block until a frame newer than `after` is published.
    ///
    /// Returns None when the session stops or `timeout` passes first.
    pub fn wait_for_frame(&self, after: u64, timeout: Duration) -> Option<(u64, Arc<Vec<u8>>)> {
        let deadline = Instant::now() + timeout;
        let mut session = self.inner.lock();
        loop {
            if let Some((seq, jpeg)) = session.latest_frame() {
                if seq > after {
                    return Some((seq, jpeg));
                }
            }
            if !session.is_active() {
                return None;
            }
            if self.frame_ready.wait_until(&mut session, deadline).timed_out() {
                return None;
            }
        }
    }
}
