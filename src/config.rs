use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{
    CameraConfig, FacingMode, DEFAULT_IDEAL_HEIGHT, DEFAULT_IDEAL_WIDTH, DEFAULT_TARGET_FPS,
};
use crate::dashboard::{DashboardConfig, DEFAULT_DASHBOARD_ADDR, DEFAULT_REFRESH_SECS};
use crate::detect::HostedConfig;
use crate::history::{DEFAULT_SERIES_CAPACITY, DEFAULT_THUMBNAIL_CAPACITY};
use crate::pipeline::{PipelineConfig, RetryPolicy, DEFAULT_DETECT_EVERY};
use crate::session::SessionLimits;

const DEFAULT_CAMERA_SOURCE: &str = "auto";
const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    detect_every: Option<u32>,
    dashboard: Option<DashboardConfigFile>,
    history: Option<HistoryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    facing: Option<FacingMode>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorKind>,
    api_url: Option<String>,
    auth_url: Option<String>,
    publishable_key: Option<String>,
    model: Option<String>,
    version: Option<u32>,
    confidence: Option<f32>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    addr: Option<String>,
    refresh_secs: Option<u32>,
    canvas_width: Option<u32>,
    canvas_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct HistoryConfigFile {
    thumbnail_capacity: Option<usize>,
    series_capacity: Option<usize>,
}

/// Which detector the daemon talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    #[default]
    Hosted,
    /// Synthetic detections; no network.
    Stub,
}

impl std::str::FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hosted" => Ok(DetectorKind::Hosted),
            "stub" => Ok(DetectorKind::Stub),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected hosted or stub",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub camera: CameraConfig,
    pub detector_kind: DetectorKind,
    pub detector: HostedConfig,
    pub pipeline: PipelineConfig,
    pub dashboard: DashboardConfig,
    /// Overlay backing resolution. `None` draws at the frame's native size.
    pub canvas: Option<(u32, u32)>,
    pub limits: SessionLimits,
}

/// Values given on the command line. They win over the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Config file used instead of `$ATTENTIVENESS_CONFIG`.
    pub config: Option<PathBuf>,
    pub camera: Option<String>,
    pub facing: Option<FacingMode>,
    pub detector: Option<DetectorKind>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub model_version: Option<u32>,
    pub detect_every: Option<u32>,
    pub dashboard_addr: Option<String>,
    pub canvas: Option<(u32, u32)>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// `$ATTENTIVENESS_CONFIG` (JSON, optional), then `ATTENTIVENESS_*` overrides, then validation.
    pub fn load() -> Result<Self> {
        Self::load_with(&ConfigOverrides::default())
    }

    /// Like `load`, with an explicit config file instead of `$ATTENTIVENESS_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let cfg = Self::load_unvalidated(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// File, environment, then command-line overrides. Validation runs once, last.
    pub fn load_with(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config
            .clone()
            .or_else(|| env_value("ATTENTIVENESS_CONFIG").map(PathBuf::from));
        let mut cfg = Self::load_unvalidated(config_path.as_deref())?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn load_unvalidated(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(camera) = &overrides.camera {
            self.camera.source = camera.clone();
        }
        if let Some(facing) = overrides.facing {
            self.camera.facing = facing;
        }
        if let Some(kind) = overrides.detector {
            self.detector_kind = kind;
        }
        if let Some(key) = &overrides.api_key {
            self.detector.publishable_key = key.clone();
        }
        if let Some(model) = &overrides.model {
            self.detector.model = model.clone();
        }
        if let Some(version) = overrides.model_version {
            self.detector.version = version;
        }
        if let Some(every) = overrides.detect_every {
            self.pipeline.detect_every = every;
        }
        if let Some(addr) = &overrides.dashboard_addr {
            self.dashboard.addr = addr.clone();
        }
        if overrides.canvas.is_some() {
            self.canvas = overrides.canvas;
        }
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraConfig {
            source: camera_file
                .source
                .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
            facing: camera_file.facing.unwrap_or_default(),
            ideal_width: camera_file.width.unwrap_or(DEFAULT_IDEAL_WIDTH),
            ideal_height: camera_file.height.unwrap_or(DEFAULT_IDEAL_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = HostedConfig::default();
        let detector = HostedConfig {
            api_url: detector_file.api_url.unwrap_or(defaults.api_url),
            // An empty auth_url disables the startup auth check.
            auth_url: match detector_file.auth_url {
                Some(url) if url.trim().is_empty() => None,
                Some(url) => Some(url),
                None => defaults.auth_url,
            },
            publishable_key: detector_file
                .publishable_key
                .unwrap_or(defaults.publishable_key),
            model: detector_file.model.unwrap_or(defaults.model),
            version: detector_file.version.unwrap_or(defaults.version),
            confidence: detector_file.confidence.unwrap_or(defaults.confidence),
            timeout: detector_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        };

        let pipeline = PipelineConfig {
            detect_every: file.detect_every.unwrap_or(DEFAULT_DETECT_EVERY),
            retry: RetryPolicy {
                retries: detector_file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                backoff: Duration::from_millis(
                    detector_file
                        .retry_backoff_ms
                        .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
                ),
            },
            max_frames: None,
        };

        let dashboard_file = file.dashboard.unwrap_or_default();
        let dashboard = DashboardConfig {
            addr: dashboard_file
                .addr
                .unwrap_or_else(|| DEFAULT_DASHBOARD_ADDR.to_string()),
            refresh_secs: dashboard_file.refresh_secs.unwrap_or(DEFAULT_REFRESH_SECS),
        };

        let canvas = match (dashboard_file.canvas_width, dashboard_file.canvas_height) {
            (Some(w), Some(h)) => Some((w, h)),
            (Some(w), None) => Some((w, 0)),
            (None, Some(h)) => Some((0, h)),
            (None, None) => None,
        };

        let history_file = file.history.unwrap_or_default();
        let limits = SessionLimits {
            thumbnail_capacity: history_file
                .thumbnail_capacity
                .unwrap_or(DEFAULT_THUMBNAIL_CAPACITY),
            series_capacity: history_file
                .series_capacity
                .unwrap_or(DEFAULT_SERIES_CAPACITY),
        };

        Self {
            camera,
            detector_kind: detector_file.backend.unwrap_or_default(),
            detector,
            pipeline,
            dashboard,
            canvas,
            limits,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("ATTENTIVENESS_CAMERA") {
            self.camera.source = source;
        }
        if let Some(facing) = env_value("ATTENTIVENESS_FACING") {
            self.camera.facing = facing.parse()?;
        }
        if let Some(kind) = env_value("ATTENTIVENESS_DETECTOR") {
            self.detector_kind = kind.parse()?;
        }
        if let Some(url) = env_value("ATTENTIVENESS_API_URL") {
            self.detector.api_url = url;
        }
        if let Some(key) = env_value("ATTENTIVENESS_API_KEY") {
            self.detector.publishable_key = key;
        }
        if let Some(model) = env_value("ATTENTIVENESS_MODEL") {
            self.detector.model = model;
        }
        if let Some(version) = env_value("ATTENTIVENESS_MODEL_VERSION") {
            self.detector.version = version
                .parse()
                .map_err(|_| anyhow!("ATTENTIVENESS_MODEL_VERSION must be a positive integer"))?;
        }
        if let Some(every) = env_value("ATTENTIVENESS_DETECT_EVERY") {
            self.pipeline.detect_every = every
                .parse()
                .map_err(|_| anyhow!("ATTENTIVENESS_DETECT_EVERY must be a positive integer"))?;
        }
        if let Some(addr) = env_value("ATTENTIVENESS_DASHBOARD_ADDR") {
            self.dashboard.addr = addr;
        }
        if let Some(canvas) = env_value("ATTENTIVENESS_CANVAS") {
            self.canvas = Some(
                parse_canvas(&canvas).map_err(|e| anyhow!("ATTENTIVENESS_CANVAS: {}", e))?,
            );
        }
        if let Some(capacity) = env_value("ATTENTIVENESS_THUMBNAIL_CAPACITY") {
            self.limits.thumbnail_capacity = capacity.parse().map_err(|_| {
                anyhow!("ATTENTIVENESS_THUMBNAIL_CAPACITY must be a positive integer")
            })?;
        }
        Ok(())
    }

    /// Checks everything that does not need the network.
    pub fn validate(&self) -> Result<()> {
        if self.camera.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        if self.camera.ideal_width == 0 || self.camera.ideal_height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.pipeline.detect_every == 0 {
            return Err(anyhow!("detect_every must be greater than zero"));
        }
        if self.limits.thumbnail_capacity == 0 || self.limits.series_capacity == 0 {
            return Err(anyhow!("history capacities must be greater than zero"));
        }
        if let Some((w, h)) = self.canvas {
            if w == 0 || h == 0 {
                return Err(anyhow!(
                    "canvas needs both a non-zero width and height, got {}x{}",
                    w,
                    h
                ));
            }
        }
        if self.detector_kind == DetectorKind::Hosted {
            self.detector.validate()?;
        }
        Ok(())
    }
}

/// Parse a `WIDTHxHEIGHT` canvas size such as `1280x720`.
pub fn parse_canvas(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .trim()
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| anyhow!("canvas must look like WIDTHxHEIGHT, got '{}'", value))?;
    let parse = |part: &str| -> Result<u32> {
        match part.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(anyhow!("invalid canvas dimension '{}'", part)),
        }
    };
    Ok((parse(w)?, parse(h)?))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.camera.source, "auto");
        assert_eq!(cfg.camera.facing, FacingMode::Environment);
        assert_eq!(cfg.detector_kind, DetectorKind::Hosted);
        assert_eq!(cfg.detector.model, "attentiveness-thesis");
        assert_eq!(cfg.detector.version, 2);
        assert_eq!(cfg.pipeline.detect_every, 5);
        assert_eq!(cfg.pipeline.retry.retries, 1);
        assert_eq!(cfg.pipeline.retry.backoff, Duration::from_millis(250));
        assert_eq!(cfg.dashboard.addr, "127.0.0.1:8787");
        assert_eq!(cfg.limits.thumbnail_capacity, 200);
        assert_eq!(cfg.limits.series_capacity, 3_600);
    }

    #[test]
    fn hosted_without_key_fails_validation() {
        let cfg = MonitorConfig::default();
        assert!(cfg.validate().is_err());

        let stub = MonitorConfig {
            detector_kind: DetectorKind::Stub,
            ..MonitorConfig::default()
        };
        assert!(stub.validate().is_ok());
    }

    #[test]
    fn zero_detect_every_is_rejected() {
        let mut cfg = MonitorConfig {
            detector_kind: DetectorKind::Stub,
            ..MonitorConfig::default()
        };
        cfg.pipeline.detect_every = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_detector_kind() -> Result<()> {
        assert_eq!("Stub".parse::<DetectorKind>()?, DetectorKind::Stub);
        assert!("local".parse::<DetectorKind>().is_err());
        Ok(())
    }

    #[test]
    fn parses_canvas_sizes() -> Result<()> {
        assert_eq!(parse_canvas("1280x720")?, (1280, 720));
        assert_eq!(parse_canvas(" 640X360 ")?, (640, 360));
        assert!(parse_canvas("1280").is_err());
        assert!(parse_canvas("0x720").is_err());
        Ok(())
    }

    #[test]
    fn half_specified_canvas_is_rejected() {
        let cfg = MonitorConfig {
            detector_kind: DetectorKind::Stub,
            canvas: Some((1280, 0)),
            ..MonitorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_replace_file_and_env_values() {
        let mut cfg = MonitorConfig::default();
        cfg.apply_overrides(&ConfigOverrides {
            detector: Some(DetectorKind::Stub),
            camera: Some("stub://lab".to_string()),
            detect_every: Some(2),
            canvas: Some((1280, 720)),
            ..ConfigOverrides::default()
        });
        assert_eq!(cfg.detector_kind, DetectorKind::Stub);
        assert_eq!(cfg.camera.source, "stub://lab");
        assert_eq!(cfg.pipeline.detect_every, 2);
        assert_eq!(cfg.canvas, Some((1280, 720)));
        assert!(cfg.validate().is_ok());
    }
}
