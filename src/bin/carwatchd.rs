//! carwatchd - real-time vehicle detection daemon.
//!
//! This daemon:
//! 1. Opens the configured camera (synthetic `stub://` scene or V4L2 device)
//! 2. Captures frames on a dedicated thread into a bounded drop-oldest queue
//! 3. Runs the vehicle detector (cascade when a model loads, motion otherwise)
//! 4. Presents annotated frames (preview JPEG) and live rates, and takes
//!    single-key commands
//! 5. Optionally publishes per-frame summaries to the dashboard

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use carwatch::{
    Camera, CarwatchConfig, Command, Console, DetectionSink, FramePreview, FrameSource,
    HeadlessConsole, HttpSink, LogSink, PipelineLoop, PipelineState, TerminalConsole,
    VehicleDetector,
};

/// Preview written in interactive mode when none is configured.
const DEFAULT_PREVIEW_NAME: &str = "carwatch_preview.jpg";

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time vehicle detection from a camera stream")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CARWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Camera device: stub://<name>[?fail_after=N] or a V4L2 path.
    #[arg(long)]
    device: Option<String>,

    /// Run without the interactive terminal.
    #[arg(long)]
    headless: bool,

    /// Dashboard endpoint receiving detection records.
    #[arg(long)]
    sink_url: Option<String>,

    /// Directory for saved detection snapshots.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// JPEG kept up to date with the latest annotated frame.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Capture rate cap.
    #[arg(long)]
    target_fps: Option<u32>,
}

fn main() -> Result<()> {
    // The terminal console holds raw mode, so every log line carries its own
    // carriage return.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            write!(
                buf,
                "[{} {:<5} {}] {}\r\n",
                buf.timestamp(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
    let args = Args::parse();

    let mut cfg = CarwatchConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.camera.device = device;
    }
    if let Some(url) = args.sink_url {
        cfg.sink.url = Some(url);
    }
    if let Some(dir) = args.output_dir {
        cfg.display.output_dir = dir;
    }
    if let Some(path) = args.preview {
        cfg.display.preview_path = Some(path);
    }
    if let Some(fps) = args.target_fps {
        cfg.camera.target_fps = fps;
    }
    cfg.display.headless |= args.headless;
    cfg.validate()?;

    let state = PipelineState::new(cfg.queue.capacity)?;
    let signal_cancel = state.cancel.clone();
    ctrlc::set_handler(move || {
        signal_cancel.cancel();
    })
    .context("install Ctrl-C handler")?;

    let camera = Camera::open(cfg.camera.clone())
        .with_context(|| format!("open camera {}", cfg.camera.device))?;
    let detector = VehicleDetector::from_settings(&cfg.detector)?;
    let mode = detector.mode();

    let sink: Box<dyn DetectionSink> = match &cfg.sink.url {
        Some(url) => {
            log::info!("publishing detection records to {url}");
            Box::new(HttpSink::new(url, cfg.sink.timeout)?)
        }
        None => Box::new(LogSink),
    };

    let interactive = !cfg.display.headless && std::io::stdin().is_terminal();
    if !cfg.display.headless && !interactive {
        log::info!("stdin is not a terminal, running headless");
    }
    if interactive {
        println!("carwatchd commands:");
        for line in Command::help() {
            println!("  {line}");
        }
    }
    let preview_path = cfg.display.preview_path.clone().or_else(|| {
        interactive.then(|| cfg.display.output_dir.join(DEFAULT_PREVIEW_NAME))
    });
    let preview = match preview_path {
        Some(path) => {
            let preview = FramePreview::new(path)?;
            log::info!("annotated frames shown in {}", preview.path().display());
            Some(preview)
        }
        None => None,
    };
    let console: Box<dyn Console> = if interactive {
        Box::new(TerminalConsole::new(preview)?)
    } else {
        Box::new(HeadlessConsole::new(preview))
    };

    let source = FrameSource::new(
        Box::new(camera),
        Arc::clone(&state.queue),
        state.cancel.clone(),
        Arc::clone(&state.capture),
        cfg.camera.target_fps,
    )?
    .spawn()?;

    let mut pipeline = PipelineLoop::new(state, detector, console, cfg.loop_settings())
        .with_source(source)
        .with_sink(sink)?
        .with_mode_label(mode.describe());
    let summary = pipeline.run()?;

    log::info!(
        "carwatchd done: {} frames shown, {} detections, display {:.1} fps, detection {:.1} fps",
        summary.frames_displayed,
        summary.total_detections,
        summary.display_fps,
        summary.detection_fps
    );
    Ok(())
}
