//! Captured frames.
//!
//! - `Frame`: RGB24 pixels plus the monotonic index assigned by the capture source.
//! - Pixels are private. Consumers get an `RgbImage`, a clamped crop, or a JPEG encoding.
//!
//! Frames live only as long as the frame loop needs them; nothing here writes to disk.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use crate::overlay::DisplayRect;

/// JPEG quality used when frames leave the process (detector upload, thumbnails).
pub const JPEG_QUALITY: u8 = 80;

/// A single captured frame in source-frame pixel coordinates.
///
/// There is no `Clone`: the frame loop hands frames to the detector worker by value
/// and gets them back with the result.
pub struct Frame {
    /// Monotonic id assigned at capture time. Used to tag detection results.
    pub index: u64,
    /// Native width as delivered by the camera.
    pub width: u32,
    /// Native height as delivered by the camera.
    pub height: u32,
    /// Wall-clock capture time (thumbnail keys are derived from this).
    pub captured_at: DateTime<Local>,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap RGB24 pixels. Fails when the buffer length does not match the dimensions.
    pub fn from_rgb(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            captured_at: Local::now(),
            pixels,
        })
    }

    /// Override the capture time. Tests use this to force timestamp collisions.
    pub fn with_captured_at(mut self, captured_at: DateTime<Local>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Crop a region given in source-frame pixels.
    ///
    /// The region is clamped to the frame. Returns `None` when nothing is left.
    pub fn crop(&self, rect: &DisplayRect) -> Option<RgbImage> {
        let left = rect.left.max(0.0).floor() as u32;
        let top = rect.top.max(0.0).floor() as u32;
        let right = (rect.left + rect.width).min(self.width as f32).ceil();
        let bottom = (rect.top + rect.height).min(self.height as f32).ceil();
        if right <= left as f32 || bottom <= top as f32 {
            return None;
        }
        let width = (right as u32).saturating_sub(left);
        let height = (bottom as u32).saturating_sub(top);
        if width == 0 || height == 0 {
            return None;
        }
        let image = self.to_image().ok()?;
        Some(imageops::crop_imm(&image, left, top, width, height).to_image())
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let image = self.to_image()?;
        encode_jpeg(&image)
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}
