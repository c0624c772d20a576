//! Tracking loops: the standalone console session and the capture worker
//! behind the video service.

use anyhow::Result;
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::counter::RepCounter;
use super::overlay::encode_jpeg;
use super::pipeline::FrameProcessor;
use crate::capture::FrameSource;
use crate::shared::{ControlMessage, SharedSession};

/// Options for a standalone session
#[derive(Debug, Clone, Default)]
pub struct StandaloneOptions {
    /// Stop after this many frames
    pub max_frames: Option<u64>,
    /// Write the latest annotated frame here
    pub preview_path: Option<PathBuf>,
    pub jpeg_quality: u8,
}

/// Result of a finished standalone session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub reps: u32,
    pub frames: u64,
    pub duration: Duration,
}

/// Process frames until the source ends, a quit arrives or the frame cap is
/// reached.
pub fn run_standalone(
    source: &mut dyn FrameSource,
    processor: &mut FrameProcessor,
    counter: &mut RepCounter,
    control: &Receiver<ControlMessage>,
    options: &StandaloneOptions,
) -> SessionSummary {
    let started = Instant::now();
    let mut frames = 0u64;

    info!("Tracking started; enter 'q' to finish, 'r' to reset");

    loop {
        match control.try_recv() {
            Ok(ControlMessage::Quit) => {
                info!("Quit requested");
                break;
            }
            Ok(ControlMessage::Reset) => {
                counter.reset();
                info!("Counter reset");
            }
            Err(_) => {}
        }

        if options.max_frames.is_some_and(|max| frames >= max) {
            info!("Reached frame limit of {}", frames);
            break;
        }

        let mut frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Frame source exhausted");
                break;
            }
            Err(e) => {
                error!("Frame capture failed: {:#}", e);
                break;
            }
        };

        let report = processor.process(&mut frame, counter);
        frames += 1;

        if report.transition.is_some() {
            info!("Reps: {} ({:.1})", report.reps, counter.count());
        }
        debug!("Frame {} at {:.1} fps", frames, report.fps);

        if let Some(path) = &options.preview_path {
            if let Err(e) = write_preview(path, &frame.image, options.jpeg_quality) {
                warn!("Failed to write preview: {:#}", e);
            }
        }
    }

    SessionSummary {
        reps: counter.reps(),
        frames,
        duration: started.elapsed(),
    }
}

fn write_preview(path: &Path, image: &image::RgbImage, quality: u8) -> Result<()> {
    let jpeg = encode_jpeg(image, quality)?;
    std::fs::write(path, jpeg)?;
    Ok(())
}

/// Opens the frame source on the worker thread, where it stays
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// Stops the session when the worker exits, including by panic, so viewers
/// waiting on frames are released
struct StopOnExit(SharedSession);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.record_error("capture worker panicked");
        }
        self.0.stop();

        let session = self.0.lock();
        info!(
            "Capture worker stopped after {} frames in {:.1}s",
            session.frames,
            session.elapsed().as_secs_f32()
        );
        if let Some(e) = &session.last_error {
            warn!("Last capture error: {}", e);
        }
    }
}

/// Run capture and processing on a background thread, publishing annotated
/// frames into the shared session.
pub fn spawn_capture_worker(
    open_source: SourceFactory,
    mut processor: FrameProcessor,
    session: SharedSession,
    jpeg_quality: u8,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let _stop = StopOnExit(session.clone());

        let mut source = match open_source() {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open frame source: {:#}", e);
                session.record_error(format!("{:#}", e));
                return;
            }
        };

        info!("Capture worker started");

        while session.lock().is_active() {
            let mut frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    error!("Frame capture failed: {:#}", e);
                    session.record_error(format!("{:#}", e));
                    break;
                }
            };

            let report = {
                let mut guard = session.lock();
                processor.process(&mut frame, guard.counter_mut())
            };
            if report.transition.is_some() {
                info!("Reps: {}", report.reps);
            }
            debug!("Frame processed at {:.1} fps", report.fps);

            match encode_jpeg(&frame.image, jpeg_quality) {
                Ok(jpeg) => session.publish_frame(jpeg),
                Err(e) => warn!("Dropping frame: {:#}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFrame;
    use crate::shared::TrackerSession;
    use crate::tracker::geometry::{AngleDomain, Landmark, Topology};
    use crate::tracker::pipeline::LimbModel;
    use crate::vision::PoseEstimator;
    use image::RgbImage;

    /// Endless or bounded stream of blank frames
    struct BlankFrames {
        left: Option<u64>,
    }

    impl FrameSource for BlankFrames {
        fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
            match &mut self.left {
                Some(0) => Ok(None),
                Some(n) => {
                    *n -= 1;
                    Ok(Some(CapturedFrame::new(RgbImage::new(160, 120))))
                }
                None => Ok(Some(CapturedFrame::new(RgbImage::new(160, 120)))),
            }
        }
    }

    /// Alternates fully bent and fully straight elbows
    struct Alternating {
        bent: bool,
    }

    impl PoseEstimator for Alternating {
        fn estimate(&mut self, _frame: &RgbImage) -> Result<Vec<Landmark>> {
            self.bent = !self.bent;
            let wrist_y = if self.bent { 20.0 } else { 60.0 };
            let wrist_x = if self.bent { 30.0 } else { 100.0 };
            let mut out = Vec::new();
            for (s, e, w) in [(5, 7, 9), (6, 8, 10)] {
                out.push(Landmark::new(s, 10.0, 60.0));
                out.push(Landmark::new(e, 60.0, 60.0));
                out.push(Landmark::new(w, wrist_x, wrist_y));
            }
            Ok(out)
        }
    }

    fn processor() -> FrameProcessor {
        let limbs = LimbModel {
            topology: Topology::Coco17,
            domain: AngleDomain::new(70.0, 160.0),
            fold_reflex: true,
        };
        FrameProcessor::new(Box::new(Alternating { bent: false }), limbs)
    }

    fn options() -> StandaloneOptions {
        StandaloneOptions {
            jpeg_quality: 70,
            ..Default::default()
        }
    }

    #[test]
    fn test_standalone_runs_until_source_ends() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut counter = RepCounter::default();
        let summary = run_standalone(&mut BlankFrames { left: Some(4) }, &mut processor(), &mut counter, &rx, &options());

        assert_eq!(summary.frames, 4);
        assert_eq!(summary.reps, 2);
    }

    #[test]
    fn test_standalone_respects_max_frames() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut counter = RepCounter::default();
        let opts = StandaloneOptions {
            max_frames: Some(3),
            ..options()
        };
        let summary = run_standalone(&mut BlankFrames { left: None }, &mut processor(), &mut counter, &rx, &opts);

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.reps, 1);
    }

    #[test]
    fn test_standalone_quit_message() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(ControlMessage::Quit).unwrap();
        let mut counter = RepCounter::default();
        let summary = run_standalone(&mut BlankFrames { left: None }, &mut processor(), &mut counter, &rx, &options());
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn test_standalone_writes_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let (_tx, rx) = crossbeam_channel::unbounded();
        let opts = StandaloneOptions {
            preview_path: Some(path.clone()),
            ..options()
        };
        run_standalone(&mut BlankFrames { left: Some(1) }, &mut processor(), &mut RepCounter::default(), &rx, &opts);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_capture_worker_publishes_and_stops() {
        let session = SharedSession::new(TrackerSession::new(RepCounter::default()));
        let factory: SourceFactory =
            Box::new(|| -> Result<Box<dyn FrameSource>> { Ok(Box::new(BlankFrames { left: Some(4) })) });

        spawn_capture_worker(factory, processor(), session.clone(), 70).join().unwrap();

        let guard = session.lock();
        assert!(!guard.is_active());
        assert_eq!(guard.frames, 4);
        assert_eq!(guard.status().push_ups, 2);
        assert!(guard.latest_frame().is_some());
    }

    /// Estimator that panics on the first frame
    struct Exploding;

    impl PoseEstimator for Exploding {
        fn estimate(&mut self, _frame: &RgbImage) -> Result<Vec<Landmark>> {
            panic!("unexpected output layout");
        }
    }

    #[test]
    fn test_capture_worker_panic_stops_session() {
        let session = SharedSession::new(TrackerSession::new(RepCounter::default()));
        let factory: SourceFactory =
            Box::new(|| -> Result<Box<dyn FrameSource>> { Ok(Box::new(BlankFrames { left: None })) });
        let limbs = LimbModel {
            topology: Topology::Coco17,
            domain: AngleDomain::new(70.0, 160.0),
            fold_reflex: true,
        };
        let exploding = FrameProcessor::new(Box::new(Exploding), limbs);

        assert!(spawn_capture_worker(factory, exploding, session.clone(), 70).join().is_err());

        assert!(!session.status().is_active);
        assert!(session.wait_for_frame(0, Duration::from_secs(5)).is_none());
        assert_eq!(session.lock().last_error.as_deref(), Some("capture worker panicked"));
    }

    #[test]
    fn test_capture_worker_open_failure() {
        let session = SharedSession::new(TrackerSession::new(RepCounter::default()));
        let factory: SourceFactory = Box::new(|| -> Result<Box<dyn FrameSource>> { anyhow::bail!("no camera") });

        spawn_capture_worker(factory, processor(), session.clone(), 70).join().unwrap();

        let guard = session.lock();
        assert!(!guard.is_active());
        assert!(guard.last_error.as_deref().unwrap_or_default().contains("no camera"));
    }
}
