use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Contract: `detect(frame) -> list<Detection> | error`. Boxes are returned in the
/// frame's own pixel coordinates. Backends own whatever handle they need (HTTP agent,
/// model session) and are driven from a single worker thread, hence `&mut self`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Backend shared between the daemon and the detector worker thread.
///
/// Wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

