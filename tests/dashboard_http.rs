use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use chrono::{Local, TimeZone};

use attentiveness_monitor::{
    with_session, write_snapshot, BBox, DashboardConfig, DashboardServer, Detection, Frame,
    ObjectClass, SessionLimits, SessionState, SessionStatus, SharedSession,
};

fn shared_session() -> SharedSession {
    SessionState::new(SessionLimits {
        thumbnail_capacity: 10,
        series_capacity: 10,
    })
    .into_shared()
}

fn send(addr: SocketAddr, request: &str) -> (u16, String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect dashboard");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream.write_all(request.as_bytes()).expect("write request");
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    (status, head, body)
}

fn get(addr: SocketAddr, path: &str) -> (u16, String, Vec<u8>) {
    send(
        addr,
        &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"),
    )
}

fn apply_sample(session: &SharedSession) {
    let at = Local.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
    let frame = Frame::from_rgb(1, 160, 120, vec![90u8; 160 * 120 * 3])
        .unwrap()
        .with_captured_at(at);
    let detections = vec![
        Detection::new(ObjectClass::Attentive, BBox::new(40.0, 60.0, 20.0, 30.0), 0.9),
        Detection::new(ObjectClass::Unattentive, BBox::new(110.0, 60.0, 20.0, 30.0), 0.7),
    ];
    with_session(session, |s| {
        s.set_status(SessionStatus::Running);
        s.apply(&frame, &detections);
        s.set_overlay_png(vec![0x89, b'P', b'N', b'G']);
    })
    .unwrap();
}

#[test]
fn dashboard_serves_pages_and_updates_filters() {
    let session = shared_session();
    let handle = DashboardServer::new(
        DashboardConfig {
            addr: "127.0.0.1:0".to_string(),
            refresh_secs: 2,
        },
        session.clone(),
    )
    .spawn()
    .expect("spawn dashboard");
    let addr = handle.addr;

    let (status, _, body) = get(addr, "/overlay.png");
    assert_eq!(status, 404);
    assert!(String::from_utf8_lossy(&body).contains("no_frame"));

    let (status, _, body) = get(addr, "/health");
    assert_eq!(status, 200);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["session"]["state"], "loading");

    apply_sample(&session);

    let (status, head, body) = get(addr, "/");
    assert_eq!(status, 200);
    assert!(head.contains("text/html"));
    let html = String::from_utf8_lossy(&body);
    assert!(html.contains("students-count"));
    assert!(html.contains("attentiveness-percentage"));
    assert!(html.contains("50%"));
    assert!(html.contains("http-equiv=\"refresh\""));
    // Both students fall in the same second: one grid entry, one modal, last write wins.
    assert_eq!(html.matches("class=\"thumbnail\"").count(), 1);
    assert_eq!(html.matches("class=\"modal\"").count(), 1);
    assert!(html.contains("unattentive - 09:00:00"));
    assert!(html.contains("Status: unattentive, Time: 09:00:00"));

    let (status, _, body) = get(addr, "/overlay.png");
    assert_eq!(status, 200);
    assert_eq!(body, vec![0x89, b'P', b'N', b'G']);

    let (status, head, body) = get(addr, "/chart.svg");
    assert_eq!(status, 200);
    assert!(head.contains("image/svg+xml"));
    assert!(String::from_utf8_lossy(&body).contains("<svg"));

    let (status, _, body) = get(addr, "/state.json");
    assert_eq!(status, 200);
    let state: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(state["percentage"], 50);
    assert_eq!(state["detection_counts"]["attentive"], 1);
    assert_eq!(state["status"]["state"], "running");

    let form = "inattentive=0";
    let (status, head, _) = send(
        addr,
        &format!(
            "POST /filters HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            form.len(),
            form
        ),
    );
    assert_eq!(status, 303);
    assert!(head.contains("Location: /"));
    let filter = with_session(&session, |s| s.filter()).unwrap();
    assert!(filter.attentive);
    assert!(!filter.inattentive);

    let (status, _, _) = send(
        addr,
        "POST /filters?attentive=maybe HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
    );
    assert_eq!(status, 400);
    assert!(with_session(&session, |s| s.filter()).unwrap().attentive);

    let (status, _, _) = send(
        addr,
        "DELETE /state.json HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert_eq!(status, 405);

    let (status, _, _) = get(addr, "/thumbnails.zip");
    assert_eq!(status, 404);

    handle.stop().expect("stop dashboard");
}

#[test]
fn snapshot_writes_dashboard_artifacts() {
    let session = shared_session();
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("snapshot");

    write_snapshot(&session, &out).expect("empty snapshot");
    assert!(out.join("index.html").exists());
    assert!(out.join("chart.svg").exists());
    assert!(out.join("state.json").exists());
    assert!(!out.join("overlay.png").exists());

    apply_sample(&session);
    write_snapshot(&session, &out).expect("snapshot");
    assert!(out.join("overlay.png").exists());

    let html = std::fs::read_to_string(out.join("index.html")).unwrap();
    assert!(html.contains("overlay.png"));
    assert!(html.contains("chart.svg"));
    assert!(html.contains("09:00:00"));

    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("state.json")).unwrap()).unwrap();
    assert_eq!(state["frames_processed"], 1);
    // Both students were captured in the same second.
    assert_eq!(state["thumbnails"].as_array().map(|t| t.len()), Some(1));
}
