//! HTML page for the dashboard and the snapshot directory.
//!
//! Image links are relative (`overlay.png`, `chart.svg`) so the same markup works
//! served from `/` and opened from a snapshot directory.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::overlay::{CategoryFilter, FrameTally};
use crate::session::{SessionSnapshot, SessionStatus};

pub fn students_line(tally: &FrameTally) -> String {
    format!("Students within the frame: {}", tally.students)
}

pub fn attentiveness_line(percentage: u8) -> String {
    format!(
        "Attentiveness Percentage: {}% of students are attentive",
        percentage
    )
}

pub fn phones_line(tally: &FrameTally) -> String {
    format!("Phones within the frame detected: {}", tally.phones)
}

/// `Detection Count: attentive: 3 phone: 1`, keys in label order.
pub fn detection_count_line(counts: &BTreeMap<String, u64>) -> String {
    let mut line = "Detection Count:".to_string();
    for (label, count) in counts {
        let _ = write!(line, " {}: {}", label, count);
    }
    line
}

pub fn thumbnail_title(status: &str, timestamp: &str) -> String {
    format!("{} - {}", status, timestamp)
}

pub fn modal_info(status: &str, timestamp: &str) -> String {
    format!("Status: {}, Time: {}", status, timestamp)
}

const STYLE: &str = "body{font-family:sans-serif;margin:1.5em;background:#fafafa}\
.banner{padding:.5em 1em;border-radius:4px;display:inline-block}\
.banner.running{background:#d8f5e0}.banner.failed{background:#f8d7da}.banner.idle{background:#eee}\
#thumbnails{display:flex;flex-wrap:wrap;gap:6px}\
.thumbnail img{height:80px;border:1px solid #ccc}\
.modal{display:none;position:fixed;inset:0;background:rgba(0,0,0,.7)}\
.modal:target{display:flex;align-items:center;justify-content:center;flex-direction:column}\
.modal img{max-width:80vw;max-height:70vh}\
.modal p{color:white}.modal .close{color:white;font-size:2em;text-decoration:none}";

/// Render the whole page. `refresh_secs` adds a meta refresh when serving live.
pub fn render_index(snapshot: &SessionSnapshot, refresh_secs: Option<u32>) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    if let Some(secs) = refresh_secs {
        let _ = write!(html, "<meta http-equiv=\"refresh\" content=\"{}\">", secs);
    }
    let _ = write!(
        html,
        "<title>Classroom Attentiveness</title><style>{}</style></head><body>",
        STYLE
    );
    html.push_str("<h1>Classroom Attentiveness</h1>");
    render_status(&mut html, &snapshot.status);

    html.push_str("<div id=\"view\"><img id=\"overlay\" src=\"overlay.png\" alt=\"Detection overlay\"></div>");
    render_filters(&mut html, &snapshot.filter);

    html.push_str("<div id=\"stats\">");
    let _ = write!(
        html,
        "<p id=\"students-count\">{}</p><p id=\"attentiveness-percentage\">{}</p><p id=\"phones-count\">{}</p><p id=\"detection-count\">{}</p>",
        escape(&students_line(&snapshot.tally)),
        escape(&attentiveness_line(snapshot.percentage)),
        escape(&phones_line(&snapshot.tally)),
        escape(&detection_count_line(&snapshot.detection_counts)),
    );
    html.push_str("</div>");

    html.push_str("<img id=\"attentiveness-chart\" src=\"chart.svg\" alt=\"Attentiveness chart\">");
    render_thumbnails(&mut html, snapshot);
    html.push_str("</body></html>");
    html
}

fn render_status(html: &mut String, status: &SessionStatus) {
    let class = match status {
        SessionStatus::Running => "running",
        SessionStatus::Failed { .. } => "failed",
        SessionStatus::Loading | SessionStatus::Stopped => "idle",
    };
    let _ = write!(
        html,
        "<p id=\"status\" class=\"banner {}\">{}</p>",
        class,
        escape(&status.describe())
    );
}

fn render_filters(html: &mut String, filter: &CategoryFilter) {
    // Hidden zeros precede each checkbox; the last value for a key wins.
    let checked = |on: bool| if on { " checked" } else { "" };
    let _ = write!(
        html,
        "<form id=\"filters\" method=\"post\" action=\"/filters\">\
<input type=\"hidden\" name=\"attentive\" value=\"0\">\
<label><input type=\"checkbox\" name=\"attentive\" value=\"1\"{}> attentive</label>\
<input type=\"hidden\" name=\"inattentive\" value=\"0\">\
<label><input type=\"checkbox\" name=\"inattentive\" value=\"1\"{}> inattentive</label>\
<button type=\"submit\">Apply</button></form>",
        checked(filter.attentive),
        checked(filter.inattentive)
    );
}

fn render_thumbnails(html: &mut String, snapshot: &SessionSnapshot) {
    html.push_str("<div id=\"thumbnails\">");
    for (i, record) in snapshot.thumbnails.iter().enumerate() {
        let status = record.status.label();
        let _ = write!(
            html,
            "<a class=\"thumbnail\" href=\"#thumb-{i}\" title=\"{title}\"><img src=\"{src}\" alt=\"Detected Student\"></a>",
            i = i,
            title = escape(&thumbnail_title(status, &record.timestamp)),
            src = escape(&record.image_data_url),
        );
    }
    html.push_str("</div>");

    for (i, record) in snapshot.thumbnails.iter().enumerate() {
        let status = record.status.label();
        let _ = write!(
            html,
            "<div class=\"modal\" id=\"thumb-{i}\"><a class=\"close\" href=\"#\">&times;</a><img src=\"{src}\" alt=\"Detected Student\"><p class=\"modal-info\">{info}</p></div>",
            i = i,
            src = escape(&record.image_data_url),
            info = escape(&modal_info(status, &record.timestamp)),
        );
    }
}

pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
