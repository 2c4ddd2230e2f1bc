//! Camera capture sources.
//!
//! The source string picks the backend:
//! - `stub://...`: synthetic classroom frames (tests, demo)
//! - `http(s)://...`: MJPEG multipart stream or single-JPEG snapshot endpoint
//! - `/dev/videoN` or `auto`: local V4L2 device (feature: capture-v4l2)
//!
//! `auto` resolves through the facing mode: the environment (rear) camera is
//! preferred, the user (front) camera is the alternative.
//!
//! Acquisition failures are returned from `new`/`connect`, never swallowed: a
//! missing camera or refused permission ends startup with a visible error.

mod http;
#[cfg(feature = "capture-v4l2")]
mod normalize;
mod synthetic;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

use http::HttpSource;
use synthetic::SyntheticSource;
#[cfg(feature = "capture-v4l2")]
use v4l2::V4l2Source;

pub const DEFAULT_IDEAL_WIDTH: u32 = 640;
pub const DEFAULT_IDEAL_HEIGHT: u32 = 480;
pub const DEFAULT_TARGET_FPS: u32 = 30;

const ENVIRONMENT_DEVICE: &str = "/dev/video0";
const USER_DEVICE: &str = "/dev/video1";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    /// Rear-facing camera.
    #[default]
    Environment,
    /// Front-facing camera.
    User,
}

impl std::str::FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "environment" | "rear" | "back" => Ok(FacingMode::Environment),
            "user" | "front" => Ok(FacingMode::User),
            other => Err(anyhow!(
                "unknown facing mode '{}'; expected environment or user",
                other
            )),
        }
    }
}

/// Capture request: which camera, and at what ideal resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    /// `auto`, `stub://name`, `http(s)://...`, or a device path.
    pub source: String,
    pub facing: FacingMode,
    /// Ideal width. Sources that cannot honour it deliver their native size.
    pub ideal_width: u32,
    pub ideal_height: u32,
    /// Frames per second handed to the frame loop.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "auto".to_string(),
            facing: FacingMode::Environment,
            ideal_width: DEFAULT_IDEAL_WIDTH,
            ideal_height: DEFAULT_IDEAL_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

impl CameraConfig {
    /// Source after resolving `auto` through the facing mode.
    pub fn resolved_source(&self) -> String {
        if self.source.trim().eq_ignore_ascii_case("auto") {
            match self.facing {
                FacingMode::Environment => ENVIRONMENT_DEVICE.to_string(),
                FacingMode::User => USER_DEVICE.to_string(),
            }
        } else {
            self.source.trim().to_string()
        }
    }
}

/// Statistics for a capture source.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub source: String,
    pub native_width: u32,
    pub native_height: u32,
}

pub struct CaptureSource {
    backend: CaptureBackend,
}

enum CaptureBackend {
    Synthetic(SyntheticSource),
    Http(HttpSource),
    #[cfg(feature = "capture-v4l2")]
    Device(V4l2Source),
}

impl CaptureSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.ideal_width == 0 || config.ideal_height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        let source = config.resolved_source();
        let backend = if source.starts_with("stub://") {
            CaptureBackend::Synthetic(SyntheticSource::new(config))
        } else if source.starts_with("http://") || source.starts_with("https://") {
            CaptureBackend::Http(HttpSource::new(config, source)?)
        } else if source.contains("://") {
            return Err(anyhow!("unsupported camera source '{}'", source));
        } else {
            device_backend(config, source)?
        };
        Ok(Self { backend })
    }

    /// Open the camera. Errors here mean no frames will ever arrive.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.connect(),
            CaptureBackend::Http(source) => source.connect(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame, paced to the target fps.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.next_frame(),
            CaptureBackend::Http(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.is_healthy(),
            CaptureBackend::Http(source) => source.is_healthy(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.stats(),
            CaptureBackend::Http(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.stats(),
        }
    }
}

#[cfg(feature = "capture-v4l2")]
fn device_backend(config: CameraConfig, device: String) -> Result<CaptureBackend> {
    Ok(CaptureBackend::Device(V4l2Source::new(config, device)))
}

#[cfg(not(feature = "capture-v4l2"))]
fn device_backend(_config: CameraConfig, device: String) -> Result<CaptureBackend> {
    Err(anyhow!(
        "camera device {} requires the capture-v4l2 feature",
        device
    ))
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_rear_camera() {
        let config = CameraConfig::default();
        assert_eq!(config.resolved_source(), ENVIRONMENT_DEVICE);

        let front = CameraConfig {
            facing: FacingMode::User,
            ..CameraConfig::default()
        };
        assert_eq!(front.resolved_source(), USER_DEVICE);
    }

    #[test]
    fn explicit_source_ignores_facing_mode() {
        let config = CameraConfig {
            source: "stub://room".to_string(),
            facing: FacingMode::User,
            ..CameraConfig::default()
        };
        assert_eq!(config.resolved_source(), "stub://room");
    }

    #[test]
    fn parses_facing_mode_aliases() -> Result<()> {
        assert_eq!("rear".parse::<FacingMode>()?, FacingMode::Environment);
        assert_eq!("Front".parse::<FacingMode>()?, FacingMode::User);
        assert!("sideways".parse::<FacingMode>().is_err());
        Ok(())
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let config = CameraConfig {
            source: "rtsp://camera".to_string(),
            ..CameraConfig::default()
        };
        assert!(CaptureSource::new(config).is_err());
    }

    #[cfg(not(feature = "capture-v4l2"))]
    #[test]
    fn device_without_feature_is_explicit_error() {
        let err = CaptureSource::new(CameraConfig::default())
            .err()
            .expect("device capture must fail without the feature");
        assert!(err.to_string().contains("capture-v4l2"));
    }

    #[test]
    fn stub_source_produces_ideal_resolution_frames() -> Result<()> {
        let config = CameraConfig {
            source: "stub://classroom".to_string(),
            ideal_width: 320,
            ideal_height: 240,
            target_fps: 0,
            ..CameraConfig::default()
        };
        let mut source = CaptureSource::new(config)?;
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!(first.dimensions(), (320, 240));
        assert!(second.index > first.index);
        assert_eq!(source.stats().frames_captured, 2);
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn frame_interval_handles_zero_fps() {
        assert_eq!(frame_interval(0), Duration::from_millis(0));
        assert_eq!(frame_interval(10), Duration::from_millis(100));
        assert_eq!(health_grace(30), Duration::from_millis(2_000));
    }
}
