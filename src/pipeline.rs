//! Frame loop.
//!
//! The loop captures every tick, issues a detection every `detect_every` ticks
//! and folds results into the session as they come back. Detection runs on a
//! dedicated worker thread, so a slow detector never stalls capture.
//!
//! At most one detection is in flight. A tick that falls due while the worker is
//! busy is skipped and counted. Results carry the index of the frame they were
//! computed on; anything at or behind the last applied frame is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::capture::CaptureSource;
use crate::detect::{Detection, SharedBackend};
use crate::frame::Frame;
use crate::overlay::{encode_png, render_overlay};
use crate::session::{
    with_session, ApplyOutcome, FailureStage, SessionStatus, SharedSession,
};

pub const DEFAULT_DETECT_EVERY: u32 = 5;
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// Hand this frame to the detector.
    Detect,
    /// A detection was due but the previous one has not returned.
    SkipBusy,
    /// Display-only tick.
    Render,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultDisposition {
    Apply,
    Stale,
}

/// Decides which ticks run detection and which results are still current.
#[derive(Clone, Debug)]
pub struct DetectionScheduler {
    detect_every: u64,
    tick: u64,
    in_flight: Option<u64>,
    last_applied: Option<u64>,
    skipped_busy: u64,
}

impl DetectionScheduler {
    /// `detect_every` of zero is treated as one.
    pub fn new(detect_every: u32) -> Self {
        Self {
            detect_every: detect_every.max(1) as u64,
            tick: 0,
            in_flight: None,
            last_applied: None,
            skipped_busy: 0,
        }
    }

    /// The first tick detects, then every `detect_every`-th one after it.
    pub fn on_tick(&mut self, frame_index: u64) -> TickAction {
        let due = self.tick % self.detect_every == 0;
        self.tick += 1;
        if !due {
            return TickAction::Render;
        }
        if self.in_flight.is_some() {
            self.skipped_busy += 1;
            return TickAction::SkipBusy;
        }
        self.in_flight = Some(frame_index);
        TickAction::Detect
    }

    pub fn on_result(&mut self, frame_index: u64) -> ResultDisposition {
        if self.in_flight == Some(frame_index) {
            self.in_flight = None;
        }
        match self.last_applied {
            Some(last) if frame_index <= last => ResultDisposition::Stale,
            _ => {
                self.last_applied = Some(frame_index);
                ResultDisposition::Apply
            }
        }
    }

    /// Release the in-flight slot without applying anything.
    pub fn on_failure(&mut self, frame_index: u64) {
        if self.in_flight == Some(frame_index) {
            self.in_flight = None;
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn skipped_busy(&self) -> u64 {
        self.skipped_busy
    }
}

/// Bounded retry for a single detection call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

/// A finished detection, tagged by the frame it ran on.
pub struct DetectionOutcome {
    pub frame: Frame,
    pub result: Result<Vec<Detection>>,
    pub attempts: u32,
}

impl DetectionOutcome {
    pub fn frame_index(&self) -> u64 {
        self.frame.index
    }
}

/// Owns the detector on its own thread.
pub struct DetectorWorker {
    jobs: Option<Sender<Frame>>,
    results: Receiver<DetectionOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl DetectorWorker {
    pub fn spawn(backend: SharedBackend, retry: RetryPolicy) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Frame>();
        let (result_tx, result_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("detector".to_string())
            .spawn(move || {
                for frame in job_rx {
                    let (result, attempts) = detect_with_retry(&backend, &frame, retry);
                    let outcome = DetectionOutcome {
                        frame,
                        result,
                        attempts,
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })
            .context("spawn detector thread")?;
        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, frame: Frame) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("detector worker stopped"))?;
        jobs.send(frame)
            .map_err(|_| anyhow!("detector worker exited"))
    }

    /// Next finished detection, if any. Never blocks.
    pub fn try_recv(&self) -> Option<DetectionOutcome> {
        match self.results.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Stop accepting jobs, wait for the one in flight, and return what is left.
    pub fn shutdown(mut self) -> Vec<DetectionOutcome> {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("detector thread panicked");
            }
        }
        self.results.try_iter().collect()
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn detect_with_retry(
    backend: &SharedBackend,
    frame: &Frame,
    retry: RetryPolicy,
) -> (Result<Vec<Detection>>, u32) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))
            .and_then(|mut guard| guard.detect(frame));
        match result {
            Ok(detections) => return (Ok(detections), attempts),
            Err(err) if attempts <= retry.retries => {
                log::debug!(
                    "frame {}: detection attempt {} failed: {:#}",
                    frame.index,
                    attempts,
                    err
                );
                std::thread::sleep(retry.backoff);
            }
            Err(err) => return (Err(err), attempts),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub detect_every: u32,
    pub retry: RetryPolicy,
    /// Stop after this many captured frames (demo runs).
    pub max_frames: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detect_every: DEFAULT_DETECT_EVERY,
            retry: RetryPolicy::default(),
            max_frames: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames_captured: u64,
    pub detections_issued: u64,
    pub results_applied: u64,
    pub stale_results: u64,
    pub skipped_busy: u64,
    pub detection_failures: u64,
}

pub struct FrameLoop {
    source: CaptureSource,
    backend: SharedBackend,
    session: SharedSession,
    config: PipelineConfig,
}

impl FrameLoop {
    /// `source` must already be connected.
    pub fn new(
        source: CaptureSource,
        backend: SharedBackend,
        session: SharedSession,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            backend,
            session,
            config,
        }
    }

    /// Run until `shutdown` is set, `max_frames` is reached, or capture fails.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<LoopSummary> {
        let worker = DetectorWorker::spawn(self.backend.clone(), self.config.retry)?;
        let mut scheduler = DetectionScheduler::new(self.config.detect_every);
        let mut summary = LoopSummary::default();
        let mut last_health_log = Instant::now();

        with_session(&self.session, |s| s.set_status(SessionStatus::Running))?;
        log::info!(
            "frame loop running: detect every {} frames",
            self.config.detect_every.max(1)
        );

        let run_result = loop {
            if shutdown.load(Ordering::SeqCst) {
                log::info!("shutdown requested");
                break Ok(());
            }
            if let Some(max) = self.config.max_frames {
                if summary.frames_captured >= max {
                    break Ok(());
                }
            }

            while let Some(outcome) = worker.try_recv() {
                self.handle_outcome(&mut scheduler, &mut summary, outcome)?;
            }

            let frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(err) => break Err(err.context("capture frame")),
            };
            summary.frames_captured += 1;

            match scheduler.on_tick(frame.index) {
                TickAction::Detect => {
                    worker.submit(frame)?;
                    summary.detections_issued += 1;
                }
                TickAction::SkipBusy => {
                    log::debug!("frame {}: detector busy, skipping", frame.index);
                    summary.skipped_busy += 1;
                    with_session(&self.session, |s| s.record_skipped_busy())?;
                }
                TickAction::Render => {}
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                log::info!(
                    "camera health={} frames={} source={} native={}x{}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.source,
                    stats.native_width,
                    stats.native_height
                );
                last_health_log = Instant::now();
            }
        };

        for outcome in worker.shutdown() {
            self.handle_outcome(&mut scheduler, &mut summary, outcome)?;
        }

        match &run_result {
            Ok(()) => with_session(&self.session, |s| s.set_status(SessionStatus::Stopped))?,
            Err(err) => with_session(&self.session, |s| s.fail(FailureStage::Capture, err))?,
        }
        log::info!(
            "frame loop stopped: frames={} detections={} applied={} stale={} skipped={} failures={}",
            summary.frames_captured,
            summary.detections_issued,
            summary.results_applied,
            summary.stale_results,
            summary.skipped_busy,
            summary.detection_failures
        );
        run_result.map(|()| summary)
    }

    fn handle_outcome(
        &self,
        scheduler: &mut DetectionScheduler,
        summary: &mut LoopSummary,
        outcome: DetectionOutcome,
    ) -> Result<()> {
        let frame_index = outcome.frame_index();
        let detections = match outcome.result {
            Ok(detections) => detections,
            Err(err) => {
                scheduler.on_failure(frame_index);
                summary.detection_failures += 1;
                log::warn!(
                    "frame {}: detection failed after {} attempt(s): {:#}",
                    frame_index,
                    outcome.attempts,
                    err
                );
                return with_session(&self.session, |s| s.record_detection_failure());
            }
        };

        if scheduler.on_result(frame_index) == ResultDisposition::Stale {
            log::debug!("frame {}: discarding stale result", frame_index);
            summary.stale_results += 1;
            return with_session(&self.session, |s| s.record_stale_result());
        }

        let frame = outcome.frame;
        let (applied, canvas) = with_session(&self.session, |s| {
            (s.apply(&frame, &detections), s.canvas_for(&frame))
        })?;
        let report = match applied {
            ApplyOutcome::Applied(report) => report,
            ApplyOutcome::Stale {
                frame_index,
                last_applied,
            } => {
                log::debug!(
                    "frame {}: session already at frame {}",
                    frame_index,
                    last_applied
                );
                summary.stale_results += 1;
                return Ok(());
            }
        };
        summary.results_applied += 1;
        log::debug!(
            "frame {}: {} students, {}% attentive, {} phones",
            frame_index,
            report.plan.tally.students,
            report.plan.percentage,
            report.plan.tally.phones
        );

        match render_overlay(&frame, &report.plan, canvas).and_then(|img| encode_png(&img)) {
            Ok(png) => with_session(&self.session, |s| s.set_overlay_png(png))?,
            Err(err) => log::warn!("frame {}: overlay render failed: {:#}", frame_index, err),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CameraConfig;
    use crate::detect::{BBox, DetectorBackend, ObjectClass, ScriptedBackend, StubBackend};
    use crate::session::{SessionLimits, SessionState};
    use std::sync::{Arc, Mutex};

    #[test]
    fn detects_on_first_tick_then_every_fifth() {
        let mut scheduler = DetectionScheduler::new(5);
        let mut detect_ticks = Vec::new();
        for index in 1..=12u64 {
            if scheduler.on_tick(index) == TickAction::Detect {
                detect_ticks.push(index);
                scheduler.on_result(index);
            }
        }
        assert_eq!(detect_ticks, vec![1, 6, 11]);
        assert_eq!(scheduler.ticks(), 12);
    }

    #[test]
    fn busy_detector_skips_due_tick() {
        let mut scheduler = DetectionScheduler::new(2);
        assert_eq!(scheduler.on_tick(1), TickAction::Detect);
        assert_eq!(scheduler.on_tick(2), TickAction::Render);
        assert_eq!(scheduler.on_tick(3), TickAction::SkipBusy);
        assert_eq!(scheduler.skipped_busy(), 1);

        assert_eq!(scheduler.on_result(1), ResultDisposition::Apply);
        assert_eq!(scheduler.in_flight(), None);
        assert_eq!(scheduler.on_tick(4), TickAction::Render);
        assert_eq!(scheduler.on_tick(5), TickAction::Detect);
    }

    #[test]
    fn out_of_order_result_is_stale() {
        let mut scheduler = DetectionScheduler::new(1);
        assert_eq!(scheduler.on_result(10), ResultDisposition::Apply);
        assert_eq!(scheduler.on_result(7), ResultDisposition::Stale);
        assert_eq!(scheduler.on_result(10), ResultDisposition::Stale);
        assert_eq!(scheduler.on_result(11), ResultDisposition::Apply);
    }

    #[test]
    fn failure_releases_in_flight_slot() {
        let mut scheduler = DetectionScheduler::new(1);
        assert_eq!(scheduler.on_tick(1), TickAction::Detect);
        scheduler.on_failure(1);
        assert_eq!(scheduler.on_tick(2), TickAction::Detect);
    }

    #[test]
    fn zero_interval_detects_every_tick() {
        let mut scheduler = DetectionScheduler::new(0);
        assert_eq!(scheduler.on_tick(1), TickAction::Detect);
        scheduler.on_result(1);
        assert_eq!(scheduler.on_tick(2), TickAction::Detect);
    }

    fn frame(index: u64) -> Frame {
        Frame::from_rgb(index, 4, 4, vec![0u8; 48]).unwrap()
    }

    #[test]
    fn worker_retries_then_succeeds() {
        let mut scripted = ScriptedBackend::new();
        scripted.push_err("timeout");
        scripted.push_ok(vec![Detection::new(
            ObjectClass::Attentive,
            BBox::new(2.0, 2.0, 2.0, 2.0),
            0.9,
        )]);
        let backend: SharedBackend = Arc::new(Mutex::new(scripted));
        let retry = RetryPolicy {
            retries: 1,
            backoff: Duration::from_millis(1),
        };
        let worker = DetectorWorker::spawn(backend, retry).unwrap();
        worker.submit(frame(3)).unwrap();

        let outcomes = worker.shutdown();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].frame_index(), 3);
        assert_eq!(outcomes[0].attempts, 2);
        assert_eq!(outcomes[0].result.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn worker_gives_up_after_retries() {
        let mut scripted = ScriptedBackend::new();
        scripted.push_err("first");
        scripted.push_err("second");
        let backend: SharedBackend = Arc::new(Mutex::new(scripted));
        let retry = RetryPolicy {
            retries: 1,
            backoff: Duration::from_millis(1),
        };
        let worker = DetectorWorker::spawn(backend, retry).unwrap();
        worker.submit(frame(1)).unwrap();

        let outcomes = worker.shutdown();
        let err = outcomes[0].result.as_ref().unwrap_err();
        assert!(err.to_string().contains("second"));
        assert_eq!(outcomes[0].attempts, 2);
    }

    #[test]
    fn frame_loop_runs_against_stub_camera_and_detector() {
        let camera = CameraConfig {
            source: "stub://classroom".to_string(),
            ideal_width: 64,
            ideal_height: 48,
            target_fps: 0,
            ..CameraConfig::default()
        };
        let mut source = CaptureSource::new(camera).unwrap();
        source.connect().unwrap();
        let stub = StubBackend::new();
        assert_eq!(stub.name(), "stub");
        let backend: SharedBackend = Arc::new(Mutex::new(stub));
        let session = SessionState::new(SessionLimits {
            thumbnail_capacity: 20,
            series_capacity: 100,
        })
        .into_shared();

        let config = PipelineConfig {
            max_frames: Some(11),
            ..PipelineConfig::default()
        };
        let shutdown = AtomicBool::new(false);
        let summary = FrameLoop::new(source, backend, session.clone(), config)
            .run(&shutdown)
            .unwrap();

        assert_eq!(summary.frames_captured, 11);
        assert!(summary.detections_issued >= 1);
        assert_eq!(
            summary.detections_issued,
            summary.results_applied + summary.stale_results + summary.detection_failures
        );
        let state = session.lock().unwrap();
        assert_eq!(state.status(), &SessionStatus::Stopped);
        assert!(state.overlay_png().is_some());
        assert!(state.chart().is_created());
    }

    #[test]
    fn overlay_is_drawn_at_canvas_resolution() {
        let camera = CameraConfig {
            source: "stub://classroom".to_string(),
            ideal_width: 32,
            ideal_height: 24,
            target_fps: 0,
            ..CameraConfig::default()
        };
        let mut source = CaptureSource::new(camera).unwrap();
        source.connect().unwrap();
        let mut scripted = ScriptedBackend::new();
        scripted.push_ok(vec![Detection::new(
            ObjectClass::Attentive,
            BBox::new(16.0, 12.0, 8.0, 8.0),
            0.9,
        )]);
        let backend: SharedBackend = Arc::new(Mutex::new(scripted));
        let session = SessionState::new(SessionLimits {
            thumbnail_capacity: 5,
            series_capacity: 5,
        })
        .into_shared();
        session.lock().unwrap().set_canvas(Some((128, 96)));

        let config = PipelineConfig {
            detect_every: 1,
            max_frames: Some(3),
            ..PipelineConfig::default()
        };
        let shutdown = AtomicBool::new(false);
        let summary = FrameLoop::new(source, backend, session.clone(), config)
            .run(&shutdown)
            .unwrap();
        assert!(summary.results_applied >= 1);

        let state = session.lock().unwrap();
        let png = state.overlay_png().expect("overlay rendered");
        let overlay = image::load_from_memory(png).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (128, 96));
    }

    #[test]
    fn shutdown_flag_stops_before_capture() {
        let camera = CameraConfig {
            source: "stub://classroom".to_string(),
            ideal_width: 8,
            ideal_height: 8,
            target_fps: 0,
            ..CameraConfig::default()
        };
        let source = CaptureSource::new(camera).unwrap();
        let backend: SharedBackend = Arc::new(Mutex::new(ScriptedBackend::new()));
        let session = SessionState::new(SessionLimits::default()).into_shared();
        let shutdown = AtomicBool::new(true);

        let summary = FrameLoop::new(source, backend, session, PipelineConfig::default())
            .run(&shutdown)
            .unwrap();
        assert_eq!(summary.frames_captured, 0);
    }
}
