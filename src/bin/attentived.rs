//! attentived - classroom attentiveness monitor daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, flags)
//! 2. Starts the local dashboard
//! 3. Opens the camera and loads the detector
//! 4. Runs the frame loop until Ctrl-C
//!
//! A startup failure is recorded as the session status (visible on the
//! dashboard and in `/state.json`) and the process exits non-zero.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use attentiveness_monitor::config::parse_canvas;
use attentiveness_monitor::{
    with_session, CaptureSource, ConfigOverrides, DashboardServer, DetectorKind, FacingMode,
    FailureStage, FrameLoop, HostedBackend, MonitorConfig, SessionState, SharedBackend,
    StubBackend,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (overrides $ATTENTIVENESS_CONFIG).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Camera source: auto, /dev/videoN, http(s)://..., or stub://name.
    #[arg(long)]
    camera: Option<String>,
    /// Preferred camera when the source is `auto` (environment|user).
    #[arg(long)]
    facing: Option<FacingMode>,
    /// Detector backend (hosted|stub).
    #[arg(long)]
    detector: Option<DetectorKind>,
    /// Publishable key for the hosted detector.
    #[arg(long, env = "ATTENTIVENESS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Hosted model name.
    #[arg(long)]
    model: Option<String>,
    /// Hosted model version.
    #[arg(long)]
    model_version: Option<u32>,
    /// Run detection every N frames.
    #[arg(long)]
    detect_every: Option<u32>,
    /// Dashboard listen address.
    #[arg(long)]
    dashboard_addr: Option<String>,
    /// Overlay resolution as WIDTHxHEIGHT (defaults to the camera's native size).
    #[arg(long, value_name = "WxH", value_parser = parse_canvas)]
    canvas: Option<(u32, u32)>,
    /// Keep serving the dashboard after a startup failure until Ctrl-C.
    #[arg(long)]
    hold_on_failure: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let cfg = match ui.run_stage("load config", || load_config(&args)) {
        Ok(cfg) => cfg,
        Err(err) => {
            log::error!("{} failed: {:#}", FailureStage::Config, err);
            return Err(err);
        }
    };
    let session = SessionState::new(cfg.limits).into_shared();
    with_session(&session, |s| s.set_canvas(cfg.canvas))?;

    let dashboard = ui.run_stage("start dashboard", || {
        DashboardServer::new(cfg.dashboard.clone(), session.clone()).spawn()
    });
    let dashboard = match dashboard {
        Ok(handle) => handle,
        Err(err) => {
            with_session(&session, |s| s.fail(FailureStage::Dashboard, &err))?;
            return Err(err);
        }
    };
    log::info!("dashboard listening on http://{}", dashboard.addr);

    let started = start_pipeline(&ui, &cfg);
    let (source, backend) = match started {
        Ok(parts) => parts,
        Err((stage, err)) => {
            with_session(&session, |s| s.fail(stage, &err))?;
            log::error!("{} failed: {:#}", stage, err);
            if args.hold_on_failure {
                log::info!("serving failure status until Ctrl-C");
                while !shutdown.load(Ordering::SeqCst) {
                    std::thread::sleep(std::time::Duration::from_millis(200));
                }
            }
            dashboard.stop()?;
            return Err(err);
        }
    };

    let frame_loop = FrameLoop::new(source, backend, session.clone(), cfg.pipeline.clone());
    let result = frame_loop.run(&shutdown);
    dashboard.stop()?;

    let summary = result?;
    log::info!(
        "attentived stopped after {} frames ({} detections applied)",
        summary.frames_captured,
        summary.results_applied
    );
    Ok(())
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
    MonitorConfig::load_with(&ConfigOverrides {
        config: args.config.clone(),
        camera: args.camera.clone(),
        facing: args.facing,
        detector: args.detector,
        api_key: args.api_key.clone(),
        model: args.model.clone(),
        model_version: args.model_version,
        detect_every: args.detect_every,
        dashboard_addr: args.dashboard_addr.clone(),
        canvas: args.canvas,
    })
}

fn start_pipeline(
    ui: &ui::Ui,
    cfg: &MonitorConfig,
) -> std::result::Result<(CaptureSource, SharedBackend), (FailureStage, anyhow::Error)> {
    let source = ui
        .run_stage("open camera", || {
            let mut source = CaptureSource::new(cfg.camera.clone())?;
            source.connect()?;
            Ok(source)
        })
        .map_err(|err| (FailureStage::Capture, err))?;

    let backend = ui
        .run_stage("load model", || load_backend(cfg))
        .map_err(|err| (FailureStage::Detector, err))?;
    Ok((source, backend))
}

fn load_backend(cfg: &MonitorConfig) -> Result<SharedBackend> {
    let backend: SharedBackend = match cfg.detector_kind {
        DetectorKind::Hosted => Arc::new(Mutex::new(HostedBackend::load(cfg.detector.clone())?)),
        DetectorKind::Stub => Arc::new(Mutex::new(StubBackend::new())),
    };
    let name = backend
        .lock()
        .map_err(|_| anyhow!("detector lock poisoned"))?
        .name();
    log::info!("detector backend: {}", name);
    Ok(backend)
}
