//! Local camera devices through libv4l.
//!
//! The device is asked for RGB3 at the ideal resolution. Whatever it
//! negotiates instead (size or pixel layout) is accepted and normalized.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, CameraConfig, CaptureStats};
use crate::frame::Frame;

pub(super) struct V4l2Source {
    config: CameraConfig,
    device_path: String,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    pixel_format: PixelFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub(super) fn new(config: CameraConfig, device_path: String) -> Self {
        Self {
            active_width: config.ideal_width,
            active_height: config.ideal_height,
            config,
            device_path,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path).map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow::Error::new(err).context(format!("open camera device {}", self.device_path))
        })?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.ideal_width;
        format.height = self.config.ideal_height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "camera {} negotiated unsupported pixel format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.pixel_format = pixel_format;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("camera device not connected")?;
        let raw = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let pixels = normalize_to_rgb(
            &raw,
            self.active_width,
            self.active_height,
            self.pixel_format,
        )?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(
            self.frame_count,
            self.active_width,
            self.active_height,
            pixels,
        )
    }

    pub(super) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    pub(super) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            source: self.device_path.clone(),
            native_width: self.active_width,
            native_height: self.active_height,
        }
    }
}
