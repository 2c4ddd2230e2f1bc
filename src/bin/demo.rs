//! demo - end-to-end synthetic run for the attentiveness monitor

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use attentiveness_monitor::config::parse_canvas;
use attentiveness_monitor::{
    with_session, write_snapshot, CameraConfig, CaptureSource, CategoryFilter, FrameLoop,
    PipelineConfig, SessionLimits, SessionState, SharedBackend, StubBackend,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Number of synthetic frames to capture.
    #[arg(long, default_value_t = 60)]
    frames: u64,
    /// Frames per second for the synthetic camera (0 = as fast as possible).
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Run detection every N frames.
    #[arg(long, default_value_t = 5)]
    detect_every: u32,
    /// Synthetic frame width.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Synthetic frame height.
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Overlay resolution as WIDTHxHEIGHT (defaults to the frame size).
    #[arg(long, value_name = "WxH", value_parser = parse_canvas)]
    canvas: Option<(u32, u32)>,
    /// Leave unattentive students out of boxes, counts and thumbnails.
    #[arg(long)]
    hide_inattentive: bool,
    /// Output directory for dashboard artifacts.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.frames == 0 {
        return Err(anyhow!("frames must be >= 1"));
    }
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);
    let out_dir = PathBuf::from(&args.out);

    let session = SessionState::new(SessionLimits {
        thumbnail_capacity: 50,
        series_capacity: 1_000,
    })
    .into_shared();
    with_session(&session, |s| s.set_canvas(args.canvas))?;
    if args.hide_inattentive {
        with_session(&session, |s| {
            s.set_filter(CategoryFilter {
                attentive: true,
                inattentive: false,
            })
        })?;
    }

    let source = ui.run_stage("open camera", || {
        let mut source = CaptureSource::new(CameraConfig {
            source: "stub://demo".to_string(),
            ideal_width: args.width,
            ideal_height: args.height,
            target_fps: args.fps,
            ..CameraConfig::default()
        })?;
        source.connect()?;
        Ok(source)
    })?;
    let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::new()));

    let summary = {
        let _stage = ui.stage("run frame loop");
        let config = PipelineConfig {
            detect_every: args.detect_every,
            max_frames: Some(args.frames),
            ..PipelineConfig::default()
        };
        let shutdown = AtomicBool::new(false);
        FrameLoop::new(source, backend, session.clone(), config).run(&shutdown)?
    };

    ui.run_stage("write dashboard snapshot", || {
        write_snapshot(&session, &out_dir)
    })?;

    let (percentage, thumbnails, counts) = with_session(&session, |s| {
        (
            s.last_percentage(),
            s.thumbnails().len(),
            s.detection_counts().clone(),
        )
    })?;

    println!("demo summary:");
    println!("  frames captured: {}", summary.frames_captured);
    println!("  detections issued: {}", summary.detections_issued);
    println!("  results applied: {}", summary.results_applied);
    println!("  skipped (detector busy): {}", summary.skipped_busy);
    println!("  last attentiveness: {}%", percentage);
    println!("  thumbnails kept: {}", thumbnails);
    for (label, count) in &counts {
        println!("  {}: {}", label, count);
    }
    println!("  output: {}", out_dir.display());
    println!("next steps:");
    println!("  open {}", out_dir.join("index.html").display());
    Ok(())
}
