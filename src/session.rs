//! Session state and per-frame aggregation.
//!
//! All state for one monitoring session lives in `SessionState`. The frame loop
//! calls `apply` with each detection result; the dashboard reads a `snapshot`.
//! Nothing here touches the camera or the network, so the whole aggregation path
//! is testable with hand-built frames and detections.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::imageops;
use serde::Serialize;

use crate::chart::AttentivenessChart;
use crate::detect::Detection;
use crate::frame::{encode_jpeg, Frame};
use crate::history::{AttentivenessSeries, ThumbnailRecord, ThumbnailStore};
use crate::overlay::{display_rect, CategoryFilter, FrameTally, OverlayPlan, ScaleFactor};

/// Thumbnails are downscaled so their longest side fits this many pixels.
pub const THUMBNAIL_MAX_SIDE: u32 = 160;
/// Second-resolution key for thumbnails.
pub const THUMBNAIL_TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Config,
    Capture,
    Detector,
    Dashboard,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureStage::Config => "configuration",
            FailureStage::Capture => "camera",
            FailureStage::Detector => "detector",
            FailureStage::Dashboard => "dashboard",
        };
        f.write_str(name)
    }
}

/// User-visible session status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Running,
    Failed { stage: FailureStage, reason: String },
    Stopped,
}

impl SessionStatus {
    pub fn describe(&self) -> String {
        match self {
            SessionStatus::Loading => "Loading camera and model".to_string(),
            SessionStatus::Running => "Running".to_string(),
            SessionStatus::Failed { stage, reason } => format!("{} failed: {}", stage, reason),
            SessionStatus::Stopped => "Stopped".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionLimits {
    pub thumbnail_capacity: usize,
    pub series_capacity: usize,
}

/// Result of applying one detection result.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Applied(FrameReport),
    /// The result belongs to a frame at or before the last applied one.
    Stale { frame_index: u64, last_applied: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub plan: OverlayPlan,
    pub thumbnails_recorded: usize,
}

pub struct SessionState {
    status: SessionStatus,
    filter: CategoryFilter,
    canvas: Option<(u32, u32)>,
    detection_counts: BTreeMap<String, u64>,
    series: AttentivenessSeries,
    chart: AttentivenessChart,
    thumbnails: ThumbnailStore,
    last_tally: FrameTally,
    last_percentage: u8,
    last_applied: Option<u64>,
    overlay_png: Option<Vec<u8>>,
    frames_processed: u64,
    stale_results: u64,
    skipped_busy: u64,
    detection_failures: u64,
}

impl SessionState {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            status: SessionStatus::Loading,
            filter: CategoryFilter::default(),
            canvas: None,
            detection_counts: BTreeMap::new(),
            series: AttentivenessSeries::with_capacity(limits.series_capacity),
            chart: AttentivenessChart::new(),
            thumbnails: ThumbnailStore::with_capacity(limits.thumbnail_capacity),
            last_tally: FrameTally::default(),
            last_percentage: 0,
            last_applied: None,
            overlay_png: None,
            frames_processed: 0,
            stale_results: 0,
            skipped_busy: 0,
            detection_failures: 0,
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn fail(&mut self, stage: FailureStage, err: &anyhow::Error) {
        self.status = SessionStatus::Failed {
            stage,
            reason: format!("{:#}", err),
        };
    }

    pub fn filter(&self) -> CategoryFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: CategoryFilter) {
        self.filter = filter;
    }

    /// Canvas backing resolution. `None` means "same as the frame".
    pub fn set_canvas(&mut self, canvas: Option<(u32, u32)>) {
        self.canvas = canvas;
    }

    pub fn canvas_for(&self, frame: &Frame) -> (u32, u32) {
        self.canvas.unwrap_or_else(|| frame.dimensions())
    }

    /// Fold one detection result into the session.
    ///
    /// The filter is the one in effect right now; it applies to boxes, counts and
    /// thumbnails alike. Phones are tallied regardless of the filter.
    pub fn apply(&mut self, frame: &Frame, detections: &[Detection]) -> ApplyOutcome {
        if let Some(last) = self.last_applied {
            if frame.index <= last {
                self.stale_results += 1;
                return ApplyOutcome::Stale {
                    frame_index: frame.index,
                    last_applied: last,
                };
            }
        }

        let filter = self.filter;
        let scale = ScaleFactor::between(frame.dimensions(), self.canvas_for(frame));
        let plan = OverlayPlan::build(detections, &filter, scale);

        let timestamp = frame.captured_at.format(THUMBNAIL_TIME_FORMAT).to_string();
        let mut thumbnails_recorded = 0;
        for det in detections.iter().filter(|d| filter.allows(&d.class)) {
            match thumbnail_data_url(frame, det) {
                Ok(Some(image_data_url)) => {
                    self.thumbnails.insert(ThumbnailRecord {
                        timestamp: timestamp.clone(),
                        image_data_url,
                        status: det.class.clone(),
                    });
                    thumbnails_recorded += 1;
                }
                Ok(None) => {
                    log::debug!("frame {}: detection box outside frame", frame.index);
                }
                Err(err) => {
                    log::warn!("frame {}: thumbnail capture failed: {:#}", frame.index, err);
                }
            }
            *self
                .detection_counts
                .entry(det.class.label().to_string())
                .or_insert(0) += 1;
        }

        self.series.push(plan.percentage);
        self.chart.update(&self.series);
        self.last_tally = plan.tally;
        self.last_percentage = plan.percentage;
        self.last_applied = Some(frame.index);
        self.frames_processed += 1;

        ApplyOutcome::Applied(FrameReport {
            frame_index: frame.index,
            plan,
            thumbnails_recorded,
        })
    }

    pub fn set_overlay_png(&mut self, png: Vec<u8>) {
        self.overlay_png = Some(png);
    }

    pub fn overlay_png(&self) -> Option<&[u8]> {
        self.overlay_png.as_deref()
    }

    pub fn record_skipped_busy(&mut self) {
        self.skipped_busy += 1;
    }

    /// A result the scheduler discarded before it reached `apply`.
    pub fn record_stale_result(&mut self) {
        self.stale_results += 1;
    }

    pub fn record_detection_failure(&mut self) {
        self.detection_failures += 1;
    }

    pub fn detection_counts(&self) -> &BTreeMap<String, u64> {
        &self.detection_counts
    }

    pub fn series(&self) -> &AttentivenessSeries {
        &self.series
    }

    pub fn chart(&self) -> &AttentivenessChart {
        &self.chart
    }

    pub fn thumbnails(&self) -> &ThumbnailStore {
        &self.thumbnails
    }

    pub fn last_tally(&self) -> FrameTally {
        self.last_tally
    }

    pub fn last_percentage(&self) -> u8 {
        self.last_percentage
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status.clone(),
            filter: self.filter,
            tally: self.last_tally,
            percentage: self.last_percentage,
            detection_counts: self.detection_counts.clone(),
            series: self.series.labeled(),
            thumbnails: self.thumbnails.iter().cloned().collect(),
            frames_processed: self.frames_processed,
            stale_results: self.stale_results,
            skipped_busy: self.skipped_busy,
            detection_failures: self.detection_failures,
        }
    }
}

pub type SharedSession = Arc<Mutex<SessionState>>;

/// Run `f` with the session locked.
pub fn with_session<T>(session: &SharedSession, f: impl FnOnce(&mut SessionState) -> T) -> Result<T> {
    let mut guard = session
        .lock()
        .map_err(|_| anyhow!("session lock poisoned"))?;
    Ok(f(&mut guard))
}

/// Point-in-time copy of the session for the dashboard and `state.json`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub filter: CategoryFilter,
    pub tally: FrameTally,
    pub percentage: u8,
    pub detection_counts: BTreeMap<String, u64>,
    pub series: Vec<(u64, u8)>,
    pub thumbnails: Vec<ThumbnailRecord>,
    pub frames_processed: u64,
    pub stale_results: u64,
    pub skipped_busy: u64,
    pub detection_failures: u64,
}

/// Crop the detection out of the frame (source coordinates) and encode it.
fn thumbnail_data_url(frame: &Frame, det: &Detection) -> Result<Option<String>> {
    let rect = display_rect(&det.bbox, ScaleFactor::identity());
    let Some(crop) = frame.crop(&rect) else {
        return Ok(None);
    };
    let (w, h) = crop.dimensions();
    let longest = w.max(h);
    let crop = if longest > THUMBNAIL_MAX_SIDE {
        let nw = (w * THUMBNAIL_MAX_SIDE / longest).max(1);
        let nh = (h * THUMBNAIL_MAX_SIDE / longest).max(1);
        imageops::thumbnail(&crop, nw, nh)
    } else {
        crop
    };
    let jpeg = encode_jpeg(&crop)?;
    Ok(Some(format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BBox, ObjectClass};
    use chrono::{Local, TimeZone};

    fn limits() -> SessionLimits {
        SessionLimits {
            thumbnail_capacity: 10,
            series_capacity: 100,
        }
    }

    fn frame(index: u64) -> Frame {
        Frame::from_rgb(index, 64, 48, vec![90u8; 64 * 48 * 3]).unwrap()
    }

    fn student(class: ObjectClass) -> Detection {
        Detection::new(class, BBox::new(32.0, 24.0, 16.0, 16.0), 0.9)
    }

    #[test]
    fn applies_tally_and_percentage() {
        let mut session = SessionState::new(limits());
        let detections = vec![
            student(ObjectClass::Attentive),
            student(ObjectClass::Unattentive),
            student(ObjectClass::Unattentive),
        ];

        let ApplyOutcome::Applied(report) = session.apply(&frame(1), &detections) else {
            panic!("expected applied");
        };
        assert_eq!(report.plan.percentage, 33);
        assert_eq!(session.last_tally().students, 3);
        assert_eq!(session.series().values(), vec![33]);
        assert_eq!(session.detection_counts().get("unattentive"), Some(&2));
        assert_eq!(session.detection_counts().get("attentive"), Some(&1));
    }

    #[test]
    fn stale_results_leave_state_unchanged() {
        let mut session = SessionState::new(limits());
        session.apply(&frame(10), &[student(ObjectClass::Attentive)]);

        let outcome = session.apply(&frame(5), &[student(ObjectClass::Unattentive)]);
        assert_eq!(
            outcome,
            ApplyOutcome::Stale {
                frame_index: 5,
                last_applied: 10
            }
        );
        assert_eq!(session.series().len(), 1);
        assert_eq!(session.frames_processed(), 1);
        assert_eq!(session.snapshot().stale_results, 1);
    }

    #[test]
    fn phones_are_not_thumbnailed_or_counted_per_class() {
        let mut session = SessionState::new(limits());
        let phone = Detection::new(ObjectClass::Phone, BBox::new(10.0, 10.0, 4.0, 4.0), 0.6);
        session.apply(&frame(1), &[phone]);

        assert!(session.thumbnails().is_empty());
        assert!(session.detection_counts().is_empty());
        assert_eq!(session.last_tally().phones, 1);
        assert_eq!(session.last_percentage(), 0);
    }

    #[test]
    fn same_second_students_store_one_thumbnail() {
        let mut session = SessionState::new(limits());
        let at = Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 15).unwrap();
        let f = frame(1).with_captured_at(at);
        let detections = vec![
            student(ObjectClass::Attentive),
            student(ObjectClass::Unattentive),
        ];

        let ApplyOutcome::Applied(report) = session.apply(&f, &detections) else {
            panic!("expected applied");
        };
        assert_eq!(report.thumbnails_recorded, 2);
        assert_eq!(session.thumbnails().len(), 1);
        let stored = session.thumbnails().get("09:30:15").unwrap();
        assert_eq!(stored.status, ObjectClass::Unattentive);
        assert!(stored.image_data_url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn filter_applies_to_thumbnails_and_counts() {
        let mut session = SessionState::new(limits());
        session.set_filter(CategoryFilter {
            attentive: true,
            inattentive: false,
        });
        session.apply(
            &frame(1),
            &[
                student(ObjectClass::Attentive),
                student(ObjectClass::Unattentive),
            ],
        );

        assert_eq!(session.last_tally().students, 1);
        assert_eq!(session.last_percentage(), 100);
        assert_eq!(session.detection_counts().get("unattentive"), None);
        assert_eq!(session.thumbnails().iter().next().unwrap().status, ObjectClass::Attentive);
    }

    #[test]
    fn large_crops_are_downscaled() {
        let mut session = SessionState::new(limits());
        let big = Frame::from_rgb(1, 400, 400, vec![10u8; 400 * 400 * 3]).unwrap();
        let det = Detection::new(
            ObjectClass::Attentive,
            BBox::new(200.0, 200.0, 380.0, 300.0),
            0.9,
        );
        session.apply(&big, &[det]);

        let record = session.thumbnails().iter().next().unwrap();
        let b64 = record
            .image_data_url
            .trim_start_matches("data:image/jpeg;base64,");
        let bytes = BASE64.decode(b64).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert!(img.width() <= THUMBNAIL_MAX_SIDE && img.height() <= THUMBNAIL_MAX_SIDE);
    }

    #[test]
    fn failure_is_user_visible() {
        let mut session = SessionState::new(limits());
        session.fail(FailureStage::Capture, &anyhow!("permission denied"));
        assert_eq!(
            session.status().describe(),
            "camera failed: permission denied"
        );
    }

    #[test]
    fn series_grows_once_per_applied_frame() {
        let mut session = SessionState::new(limits());
        for i in 1..=7 {
            session.apply(&frame(i), &[student(ObjectClass::Attentive)]);
        }
        assert_eq!(session.series().len(), 7);
        assert!(session.series().values().iter().all(|v| *v <= 100));
        assert_eq!(session.chart().revision(), 7);
    }
}
