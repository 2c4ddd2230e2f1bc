use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Backend that replays queued outcomes in order. Once the queue is empty it
/// returns no detections.
#[derive(Default)]
pub struct ScriptedBackend {
    script: VecDeque<std::result::Result<Vec<Detection>, String>>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&mut self, detections: Vec<Detection>) {
        self.script.push_back(Ok(detections));
    }

    pub fn push_err(&mut self, message: &str) {
        self.script.push_back(Err(message.to_string()));
    }

    /// Number of `detect` calls made so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_then_goes_quiet() {
        let mut backend = ScriptedBackend::new();
        backend.push_err("service unavailable");
        backend.push_ok(Vec::new());
        let frame = Frame::from_rgb(0, 1, 1, vec![0u8; 3]).unwrap();

        assert!(backend.detect(&frame).is_err());
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }
}
