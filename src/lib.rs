//! Classroom attentiveness monitor
//!
//! A camera feeds frames into a frame loop. Every Nth frame goes to an
//! object-detection backend that labels students as attentive or unattentive
//! and spots phones. Results are folded into an in-memory session: per-frame
//! counts, a running per-class tally, a bounded attentiveness series and a
//! bounded set of student thumbnails. A local dashboard shows the overlay,
//! the statistics, the thumbnails and a chart of the series.
//!
//! # Module Structure
//!
//! - `frame`: captured frames (`Frame`)
//! - `capture`: camera sources (synthetic, HTTP MJPEG/snapshot, V4L2)
//! - `detect`: detector backends (hosted service, stub, scripted)
//! - `overlay`: display scaling, category filter, per-frame tally, overlay drawing
//! - `history`: bounded series and thumbnail store
//! - `session`: aggregation of detection results into session state
//! - `chart`: attentiveness line chart (SVG)
//! - `pipeline`: detection scheduling, detector worker, frame loop
//! - `dashboard`: local HTTP dashboard and snapshot export
//! - `config`: file + environment configuration
//!
//! Nothing is persisted across runs.

pub mod capture;
pub mod chart;
pub mod config;
pub mod dashboard;
pub mod detect;
pub mod frame;
pub mod history;
pub mod overlay;
pub mod pipeline;
pub mod session;

pub use capture::{CameraConfig, CaptureSource, CaptureStats, FacingMode};
pub use chart::AttentivenessChart;
pub use config::{ConfigOverrides, DetectorKind, MonitorConfig};
pub use dashboard::{write_snapshot, DashboardConfig, DashboardHandle, DashboardServer};
pub use detect::{
    BBox, Detection, DetectorBackend, HostedBackend, HostedConfig, ObjectClass, ScriptedBackend,
    SharedBackend, StubBackend,
};
pub use frame::Frame;
pub use history::{AttentivenessSeries, BoundedHistory, ThumbnailRecord, ThumbnailStore};
pub use overlay::{
    attentiveness_percentage, display_rect, render_overlay, CategoryFilter, DisplayRect,
    FrameTally, OverlayPlan, ScaleFactor,
};
pub use pipeline::{
    DetectionScheduler, DetectorWorker, FrameLoop, LoopSummary, PipelineConfig,
    ResultDisposition, RetryPolicy, TickAction,
};
pub use session::{
    with_session, ApplyOutcome, FailureStage, FrameReport, SessionLimits, SessionSnapshot,
    SessionState, SessionStatus, SharedSession,
};
