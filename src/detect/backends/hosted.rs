//! Hosted inference backend.
//!
//! Talks to a hosted object-detection service over HTTPS:
//! - one-time load: validates the publishable key / model / version and, optionally,
//!   checks the auth endpoint so a bad key fails at startup instead of on every frame
//! - per frame: uploads the frame as base64 JPEG and parses `predictions`
//!
//! Boxes come back center-based. When the service reports that it ran on a resized
//! image, boxes are rescaled into the frame's own pixel space.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use url::Url;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection, ObjectClass};
use crate::frame::Frame;

/// Configuration for the hosted backend.
#[derive(Clone, Debug)]
pub struct HostedConfig {
    /// Inference endpoint base, e.g. "https://detect.roboflow.com".
    pub api_url: String,
    /// Endpoint checked at load time with the key. `None` skips the check.
    pub auth_url: Option<String>,
    /// Publishable API key.
    pub publishable_key: String,
    pub model: String,
    pub version: u32,
    /// Minimum confidence in 0..1. Sent to the service and enforced locally.
    pub confidence: f32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            api_url: "https://detect.roboflow.com".to_string(),
            auth_url: Some("https://api.roboflow.com".to_string()),
            publishable_key: String::new(),
            model: "attentiveness-thesis".to_string(),
            version: 2,
            confidence: 0.4,
            timeout: Duration::from_millis(5_000),
        }
    }
}

impl HostedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.publishable_key.trim().is_empty() {
            return Err(anyhow!("detector publishable key is not set"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("detector model name is empty"));
        }
        if self.version == 0 {
            return Err(anyhow!("detector model version must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!("detector confidence must be within 0..1"));
        }
        for raw in std::iter::once(&self.api_url).chain(self.auth_url.as_ref()) {
            let url = Url::parse(raw).with_context(|| format!("parse detector url {}", raw))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "unsupported detector url scheme '{}'; expected http(s)",
                    url.scheme()
                ));
            }
        }
        Ok(())
    }

    fn model_endpoint(&self) -> String {
        format!(
            "{}/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.model.trim(),
            self.version
        )
    }
}

/// Loaded model handle. Reused for every frame.
pub struct HostedBackend {
    config: HostedConfig,
    agent: ureq::Agent,
    endpoint: String,
}

impl HostedBackend {
    /// Authenticate and load the configured model/version.
    pub fn load(config: HostedConfig) -> Result<Self> {
        config.validate()?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();

        if let Some(auth_url) = &config.auth_url {
            match agent
                .get(auth_url)
                .query("api_key", &config.publishable_key)
                .call()
            {
                Ok(_) => {}
                Err(ureq::Error::Status(code, _)) if code == 401 || code == 403 => {
                    return Err(anyhow!(
                        "detector authentication rejected (status {})",
                        code
                    ));
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err).context("check detector auth endpoint"))
                }
            }
        }

        let endpoint = config.model_endpoint();
        log::info!(
            "HostedBackend: loaded model {} v{} via {}",
            config.model,
            config.version,
            config.api_url
        );
        Ok(Self {
            config,
            agent,
            endpoint,
        })
    }

    pub fn config(&self) -> &HostedConfig {
        &self.config
    }
}

impl DetectorBackend for HostedBackend {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = frame.encode_jpeg()?;
        let body = BASE64.encode(jpeg);
        let confidence_pct = (self.config.confidence * 100.0).round() as u32;

        let response = self
            .agent
            .post(&self.endpoint)
            .query("api_key", &self.config.publishable_key)
            .query("confidence", &confidence_pct.to_string())
            .query("format", "json")
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body)
            .with_context(|| format!("inference request for frame {}", frame.index))?;
        let text = response.into_string().context("read inference response")?;

        let detections = parse_predictions(&text, frame.dimensions())?;
        Ok(detections
            .into_iter()
            .filter(|det| det.confidence >= self.config.confidence)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct HostedResponse {
    #[serde(default)]
    predictions: Vec<HostedPrediction>,
    image: Option<HostedImage>,
}

#[derive(Debug, Deserialize)]
struct HostedPrediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class: String,
}

#[derive(Debug, Deserialize)]
struct HostedImage {
    width: f32,
    height: f32,
}

/// Parse a hosted inference response into detections in frame pixel space.
pub(crate) fn parse_predictions(body: &str, frame_dims: (u32, u32)) -> Result<Vec<Detection>> {
    let response: HostedResponse =
        serde_json::from_str(body).context("invalid inference response")?;

    let (sx, sy) = match &response.image {
        Some(img) if img.width > 0.0 && img.height > 0.0 => (
            frame_dims.0 as f32 / img.width,
            frame_dims.1 as f32 / img.height,
        ),
        _ => (1.0, 1.0),
    };

    Ok(response
        .predictions
        .into_iter()
        .map(|p| {
            Detection::new(
                ObjectClass::from_label(&p.class),
                BBox::new(p.x * sx, p.y * sy, p.width * sx, p.height * sy),
                p.confidence,
            )
        })
        .collect())
}
