//! HTTP camera source.
//!
//! Phone and IP cameras expose either an MJPEG multipart stream or a snapshot
//! endpoint returning one JPEG per request. The content type of the first
//! response decides which. Frames are decoded in memory at their native size.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

use super::{frame_interval, health_grace, CameraConfig, CaptureStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(super) struct HttpSource {
    config: CameraConfig,
    url: String,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    native: (u32, u32),
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSource {
    pub(super) fn new(config: CameraConfig, url: String) -> Result<Self> {
        url::Url::parse(&url).with_context(|| format!("parse camera url {}", url))?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        let native = (config.ideal_width, config.ideal_height);
        Ok(Self {
            config,
            url,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            native,
            last_error: None,
        })
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err)
            })
            .with_context(|| format!("connect to camera stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_string();
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("CaptureSource: connected to {} ({})", self.url, content_type);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera stream not connected; call connect() first"))?;
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let jpeg_bytes = match stream {
                HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
                HttpStream::SingleJpeg => {
                    // Each snapshot is a request; wait out the interval instead of polling.
                    if let Some(last) = self.last_frame_at {
                        let elapsed = last.elapsed();
                        if elapsed < min_interval {
                            std::thread::sleep(min_interval - elapsed);
                        }
                    }
                    fetch_single_jpeg(&self.agent, &self.url)
                }
            }
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })?;

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval && matches!(stream, HttpStream::Mjpeg(_)) {
                    continue;
                }
            }

            let (pixels, width, height) = decode_jpeg(&jpeg_bytes).map_err(|err| {
                self.last_error = Some(format!("{:#}", err));
                err
            })?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            self.last_error = None;
            self.native = (width, height);
            return Frame::from_rgb(self.frame_count, width, height, pixels);
        }
    }

    pub(super) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    pub(super) fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
            native_width: self.native.0,
            native_height: self.native.1,
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

/// Locate the first complete JPEG (SOI..EOI) in the buffer.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
