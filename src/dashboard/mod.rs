//! Local dashboard.
//!
//! A small HTTP server on a loopback address by default. It renders the session
//! state and accepts filter changes. Nothing here drives the frame loop; it
//! only locks the shared session to read a snapshot or swap the filter.

mod page;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::overlay::CategoryFilter;
use crate::session::{with_session, SharedSession};

pub use page::{
    attentiveness_line, detection_count_line, modal_info, phones_line, render_index,
    students_line, thumbnail_title,
};

pub const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8787";
const MAX_REQUEST_BYTES: usize = 8192;
pub const DEFAULT_REFRESH_SECS: u32 = 2;

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub addr: String,
    /// Meta refresh interval for the live page. Zero disables it.
    pub refresh_secs: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_DASHBOARD_ADDR.to_string(),
            refresh_secs: DEFAULT_REFRESH_SECS,
        }
    }
}

#[derive(Debug)]
pub struct DashboardHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DashboardHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("dashboard thread panicked"))?;
        }
        Ok(())
    }
}

pub struct DashboardServer {
    cfg: DashboardConfig,
    session: SharedSession,
}

impl DashboardServer {
    pub fn new(cfg: DashboardConfig, session: SharedSession) -> Self {
        Self { cfg, session }
    }

    pub fn spawn(self) -> Result<DashboardHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("parse dashboard address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind dashboard to {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "dashboard configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let session = self.session;
        let join = std::thread::Builder::new()
            .name("dashboard".to_string())
            .spawn(move || {
                if let Err(err) = run_dashboard(listener, &cfg, &session, shutdown_thread) {
                    log::error!("dashboard stopped: {}", err);
                }
            })
            .context("spawn dashboard thread")?;

        Ok(DashboardHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_dashboard(
    listener: TcpListener,
    cfg: &DashboardConfig,
    session: &SharedSession,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, session) {
                    log::warn!("dashboard request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &DashboardConfig,
    session: &SharedSession,
) -> Result<()> {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") | ("GET", "/index.html") => {
            let snapshot = with_session(session, |s| s.snapshot())?;
            let refresh = (cfg.refresh_secs > 0).then_some(cfg.refresh_secs);
            let html = render_index(&snapshot, refresh);
            write_response(&mut stream, 200, "text/html; charset=utf-8", html.as_bytes())
        }
        ("GET", "/overlay.png") => {
            let png = with_session(session, |s| s.overlay_png().map(|p| p.to_vec()))?;
            match png {
                Some(png) => write_response(&mut stream, 200, "image/png", &png),
                None => write_json_response(&mut stream, 404, r#"{"error":"no_frame"}"#),
            }
        }
        ("GET", "/chart.svg") => {
            let svg = with_session(session, |s| s.chart().render_svg())??;
            write_response(&mut stream, 200, "image/svg+xml", svg.as_bytes())
        }
        ("GET", "/state.json") => {
            let snapshot = with_session(session, |s| s.snapshot())?;
            let payload = serde_json::to_vec(&snapshot)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("GET", "/health") => {
            let status = with_session(session, |s| s.status().clone())?;
            let payload = serde_json::to_vec(&serde_json::json!({
                "status": "ok",
                "session": status,
            }))?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("POST", "/filters") => {
            let current = with_session(session, |s| s.filter())?;
            let filter = match request.filter_update(current) {
                Ok(filter) => filter,
                Err(err) => {
                    write_json_response(&mut stream, 400, r#"{"error":"invalid_filter"}"#)?;
                    return Err(err);
                }
            };
            with_session(session, |s| s.set_filter(filter))?;
            log::info!(
                "filter updated: attentive={} inattentive={}",
                filter.attentive,
                filter.inattentive
            );
            let payload = serde_json::to_vec(&filter)?;
            write_redirect(&mut stream, "/", &payload)
        }
        (_, "/" | "/index.html" | "/overlay.png" | "/chart.svg" | "/state.json" | "/health" | "/filters") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Write `index.html`, `overlay.png` (when a frame has been processed),
/// `chart.svg` and `state.json` into `dir`.
pub fn write_snapshot(session: &SharedSession, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create snapshot dir {}", dir.display()))?;
    let (snapshot, svg, png) = with_session(session, |s| {
        (
            s.snapshot(),
            s.chart().render_svg(),
            s.overlay_png().map(|p| p.to_vec()),
        )
    })?;
    let svg = svg.context("render chart")?;

    let write = |name: &str, bytes: &[u8]| -> Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))
    };
    write("index.html", render_index(&snapshot, None).as_bytes())?;
    write("chart.svg", svg.as_bytes())?;
    write("state.json", &serde_json::to_vec_pretty(&snapshot)?)?;
    if let Some(png) = png {
        write("overlay.png", &png)?;
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .map(|v| v.parse::<usize>())
        .transpose()
        .context("invalid content-length")?
        .unwrap_or(0);
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    let mut body = data.get(header_end..).unwrap_or_default().to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (raw_path.to_string(), String::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_redirect(stream: &mut TcpStream, location: &str, body: &[u8]) -> Result<()> {
    let header = format!(
        "HTTP/1.1 303 See Other\r\nLocation: {location}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        location = location,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: String,
    body: String,
}

impl HttpRequest {
    /// Apply `attentive`/`inattentive` pairs from the query string, then the
    /// form body. Later pairs win; absent keys keep their current value.
    fn filter_update(&self, current: CategoryFilter) -> Result<CategoryFilter> {
        let mut filter = current;
        for pair in self
            .query
            .split('&')
            .chain(self.body.trim().split('&'))
            .filter(|p| !p.is_empty())
        {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "1"));
            let slot = match key {
                "attentive" => &mut filter.attentive,
                "inattentive" => &mut filter.inattentive,
                _ => continue,
            };
            *slot = parse_flag(value)?;
        }
        Ok(filter)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(anyhow!("invalid filter value '{}'", other)),
    }
}
