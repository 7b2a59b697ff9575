use anyhow::Result;
use animo_mood::{DetectionResult, LatestDetection};
use image::RgbImage;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::camera::{CameraOpener, FrameSource};
use crate::classifier::ClassifierAdapter;
use crate::face::{crop_face, largest_face, FaceDetector};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub cadence_ms: u64,
    /// Frames read and thrown away before the one that is classified.
    pub drain_frames: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { cadence_ms: 1000, drain_frames: 2 }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0:#}")]
    CameraUnavailable(anyhow::Error),
    #[error("spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Face detection followed by emotion classification on one frame.
pub struct Pipeline {
    detector: Box<dyn FaceDetector>,
    classifier: ClassifierAdapter,
}

impl Pipeline {
    pub fn new(detector: Box<dyn FaceDetector>, classifier: ClassifierAdapter) -> Self {
        Self { detector, classifier }
    }

    /// `Ok(None)` when there is no usable face in the frame.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<Option<DetectionResult>> {
        let faces = self.detector.detect(frame)?;
        let Some(face) = largest_face(&faces) else {
            return Ok(None);
        };
        let Some(crop) = crop_face(frame, face) else {
            debug!(?face, "capture: face box outside frame");
            return Ok(None);
        };
        let distribution = self.classifier.classify(&crop)?;
        Ok(Some(DetectionResult::new(distribution, face, OffsetDateTime::now_utc())))
    }

    /// Drains stale frames, then processes the next one.
    pub fn scan_once(&mut self, camera: &mut dyn FrameSource, drain: u32) -> Result<Option<DetectionResult>> {
        for _ in 0..drain {
            camera.read_frame()?;
        }
        match camera.read_frame()? {
            Some(frame) => self.process_frame(&frame),
            None => Ok(None),
        }
    }
}

pub struct CaptureCoordinator;

impl CaptureCoordinator {
    /// Opens the camera and starts the capture thread. Fails at once if the
    /// camera cannot be opened; nothing retries.
    pub fn spawn(
        opener: &dyn CameraOpener,
        pipeline: Pipeline,
        slot: LatestDetection,
        cfg: CaptureConfig,
    ) -> Result<CaptureHandle, CaptureError> {
        let camera = opener.open().map_err(|e| {
            error!("capture: camera unavailable, detections disabled: {:#}", e);
            CaptureError::CameraUnavailable(e)
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();
        let thread = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || capture_loop(camera, pipeline, slot, cfg, stop2))?;

        info!("capture: started");
        Ok(CaptureHandle { stop, thread: Some(thread) })
    }
}

pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the loop and waits for it to release the camera.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            t.thread().unpark();
            if t.join().is_err() {
                error!("capture: thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReleaseOnExit(Box<dyn FrameSource>);

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn capture_loop(
    camera: Box<dyn FrameSource>,
    mut pipeline: Pipeline,
    slot: LatestDetection,
    cfg: CaptureConfig,
    stop: Arc<AtomicBool>,
) {
    // Released on every exit path, unwinding included.
    let mut camera = ReleaseOnExit(camera);
    let cadence = Duration::from_millis(cfg.cadence_ms);
    let mut failing = false;

    while !stop.load(Ordering::Acquire) {
        match pipeline.scan_once(camera.0.as_mut(), cfg.drain_frames) {
            Ok(Some(result)) => {
                slot.publish(result);
                failing = false;
            }
            // A miss leaves the previous detection in place.
            Ok(None) => debug!("capture: no face this cycle"),
            Err(e) => {
                if failing {
                    debug!("capture: cycle failed: {:#}", e);
                } else {
                    warn!("capture: cycle failed: {:#}", e);
                }
                failing = true;
            }
        }

        let deadline = Instant::now() + cadence;
        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }
    }
    info!("capture: stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::FixedModel;
    use crate::classifier::ClassMapping;
    use crate::face::FullFrameDetector;
    use animo_mood::{FaceBox, MoodLabel};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Step {
        Frame,
        Miss,
        Fail,
    }

    /// Scripted camera; repeats the last step once the script runs out.
    struct ScriptedCamera {
        steps: VecDeque<Step>,
        last: Step,
        released: Arc<AtomicBool>,
        reads: Arc<Mutex<u32>>,
    }

    impl FrameSource for ScriptedCamera {
        fn read_frame(&mut self) -> Result<Option<RgbImage>> {
            *self.reads.lock().unwrap() += 1;
            let step = self.steps.pop_front().unwrap_or(self.last);
            self.last = step;
            match step {
                Step::Frame => Ok(Some(RgbImage::new(64, 64))),
                Step::Miss => Ok(None),
                Step::Fail => anyhow::bail!("usb hiccup"),
            }
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct Opener {
        steps: Vec<Step>,
        released: Arc<AtomicBool>,
        reads: Arc<Mutex<u32>>,
        fail: bool,
    }

    impl Opener {
        fn new(steps: Vec<Step>) -> Self {
            Self { steps, released: Default::default(), reads: Default::default(), fail: false }
        }
    }

    impl CameraOpener for Opener {
        fn open(&self) -> Result<Box<dyn FrameSource>> {
            anyhow::ensure!(!self.fail, "no /dev/video0");
            Ok(Box::new(ScriptedCamera {
                steps: self.steps.iter().copied().collect(),
                last: *self.steps.last().unwrap_or(&Step::Miss),
                released: self.released.clone(),
                reads: self.reads.clone(),
            }))
        }
    }

    /// Reports no face on even calls.
    struct Blinking(u32);

    impl FaceDetector for Blinking {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>> {
            self.0 += 1;
            if self.0 % 2 == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![FaceBox { x: 0, y: 0, w: frame.width(), h: frame.height() }])
        }
    }

    fn happy_pipeline(detector: Box<dyn FaceDetector>) -> Pipeline {
        let model = FixedModel::new(vec![0.0, 0.0, 0.7, 0.2, 0.1]);
        let adapter = ClassifierAdapter::new(Box::new(model), ClassMapping::siglip(), false).unwrap();
        Pipeline::new(detector, adapter)
    }

    fn fast() -> CaptureConfig {
        CaptureConfig { cadence_ms: 5, drain_frames: 0 }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let until = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < until, "condition not reached");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn publishes_detections_and_releases_on_stop() {
        let opener = Opener::new(vec![Step::Frame]);
        let slot = LatestDetection::new();
        let handle = CaptureCoordinator::spawn(&opener, happy_pipeline(Box::new(FullFrameDetector)), slot.clone(), fast()).unwrap();

        wait_for(|| slot.snapshot().is_some());
        assert_eq!(slot.mood(), Some(MoodLabel::VeryHappy));
        assert!(handle.is_running());

        handle.stop();
        assert!(opener.released.load(Ordering::SeqCst));
    }

    #[test]
    fn misses_and_errors_do_not_clear_the_slot() {
        let opener = Opener::new(vec![Step::Frame, Step::Miss, Step::Fail, Step::Frame, Step::Fail]);
        let slot = LatestDetection::new();
        let reads = opener.reads.clone();
        let handle = CaptureCoordinator::spawn(&opener, happy_pipeline(Box::new(Blinking(0))), slot.clone(), fast()).unwrap();

        wait_for(|| *reads.lock().unwrap() >= 8);
        assert_eq!(slot.mood(), Some(MoodLabel::VeryHappy));
        assert!(handle.is_running());
        drop(handle);
        assert!(opener.released.load(Ordering::SeqCst));
    }

    #[test]
    fn camera_failure_is_reported_once() {
        let mut opener = Opener::new(vec![Step::Frame]);
        opener.fail = true;
        let slot = LatestDetection::new();
        let err = CaptureCoordinator::spawn(&opener, happy_pipeline(Box::new(FullFrameDetector)), slot.clone(), fast())
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::CameraUnavailable(_)));
        assert!(slot.snapshot().is_none());
    }

    #[test]
    fn scan_once_drains_before_classifying() {
        let opener = Opener::new(vec![Step::Miss, Step::Miss, Step::Frame]);
        let mut cam = opener.open().unwrap();
        let mut p = happy_pipeline(Box::new(FullFrameDetector));
        let r = p.scan_once(cam.as_mut(), 2).unwrap().unwrap();
        assert_eq!(r.face, FaceBox { x: 0, y: 0, w: 64, h: 64 });
        assert_eq!(*opener.reads.lock().unwrap(), 3);
    }

    #[test]
    fn stop_interrupts_a_long_cadence() {
        let opener = Opener::new(vec![Step::Frame]);
        let slot = LatestDetection::new();
        let cfg = CaptureConfig { cadence_ms: 60_000, drain_frames: 0 };
        let handle = CaptureCoordinator::spawn(&opener, happy_pipeline(Box::new(FullFrameDetector)), slot.clone(), cfg).unwrap();
        wait_for(|| slot.snapshot().is_some());

        let t0 = Instant::now();
        handle.stop();
        assert!(t0.elapsed() < Duration::from_secs(5));
        assert!(opener.released.load(Ordering::SeqCst));
    }
}
