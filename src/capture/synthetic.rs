use std::time::Instant;

use anyhow::Result;

use super::{frame_interval, CameraConfig, CaptureStats};
use crate::frame::Frame;

/// Synthetic source (`stub://`). Always delivers the ideal resolution.
pub(super) struct SyntheticSource {
    config: CameraConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    /// Synthetic sources are always "connected".
    pub(super) fn connect(&mut self) -> Result<()> {
        log::info!(
            "CaptureSource: connected to {} (synthetic {}x{})",
            self.config.source,
            self.config.ideal_width,
            self.config.ideal_height
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        let interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.classroom_pixels();
        Frame::from_rgb(
            self.frame_count,
            self.config.ideal_width,
            self.config.ideal_height,
            pixels,
        )
    }

    /// A dim room with three lighter seat blocks; brightness drifts with the frame count.
    fn classroom_pixels(&self) -> Vec<u8> {
        let w = self.config.ideal_width as usize;
        let h = self.config.ideal_height as usize;
        let drift = (self.frame_count % 32) as u8;
        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                let seat = y > h * 2 / 5 && y < h * 3 / 4 && (x * 10 / w.max(1)) % 3 == 1;
                let base = if seat { 170u8 } else { 60u8 };
                let offset = (y * w + x) * 3;
                pixels[offset] = base.saturating_add(drift);
                pixels[offset + 1] = base;
                pixels[offset + 2] = base.saturating_sub(drift);
            }
        }
        pixels
    }

    pub(super) fn is_healthy(&self) -> bool {
        true
    }

    pub(super) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
            native_width: self.config.ideal_width,
            native_height: self.config.ideal_height,
        }
    }
}
