//! Display and keyboard surface of the pipeline.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use image::{ImageFormat, Rgb, RgbImage};

use crate::overlay;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);
/// Placeholder size before the first real frame was seen.
const DEFAULT_PREVIEW_SIZE: (u32, u32) = (640, 480);
const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([32, 32, 32]);

/// Single-key user commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    SaveFrame,
    TogglePause,
    ShowInfo,
    ResetCounters,
}

impl Command {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'q' => Some(Command::Quit),
            's' => Some(Command::SaveFrame),
            'p' => Some(Command::TogglePause),
            'i' => Some(Command::ShowInfo),
            'r' => Some(Command::ResetCounters),
            _ => None,
        }
    }

    pub fn help() -> &'static [&'static str] {
        &[
            "q - quit",
            "s - save current frame",
            "p - pause / resume",
            "i - show pipeline info",
            "r - reset counters",
        ]
    }
}

/// Where annotated frames go and where commands come from.
///
/// Owned by the pipeline consumer; every call happens on that thread.
pub trait Console {
    /// Show an annotated canvas. `Ok(true)` when the frame reached a visual
    /// output, `Ok(false)` when this console only reports status.
    fn present(&mut self, canvas: &RgbImage, hud: &[String]) -> Result<bool>;
    /// Placeholder shown while no frames arrive.
    fn present_waiting(&mut self, capture_running: bool) -> Result<()>;
    /// Wait at most `timeout` for a command.
    fn poll_command(&mut self, timeout: Duration) -> Result<Option<Command>>;
    fn release(&mut self) -> Result<()>;
}

/// Throttles status logging to one line per interval.
#[derive(Debug)]
struct StatusThrottle {
    last: Option<Instant>,
}

impl StatusThrottle {
    fn new() -> Self {
        Self { last: None }
    }

    fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < STATUS_INTERVAL => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Single JPEG on disk that always holds the latest presented frame.
///
/// Each frame is encoded to a staging file next to the target and renamed
/// over it, so viewers never read a half-written image.
pub struct FramePreview {
    path: PathBuf,
    staging: PathBuf,
    size: (u32, u32),
}

impl FramePreview {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("preview path {} must name a file", path.display()))?;
        let staging = path.with_file_name(format!(".{}.part", name.to_string_lossy()));
        Ok(Self {
            path,
            staging,
            size: DEFAULT_PREVIEW_SIZE,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, canvas: &RgbImage) -> Result<()> {
        self.size = canvas.dimensions();
        canvas
            .save_with_format(&self.staging, ImageFormat::Jpeg)
            .with_context(|| format!("encode preview {}", self.staging.display()))?;
        std::fs::rename(&self.staging, &self.path)
            .with_context(|| format!("replace preview {}", self.path.display()))
    }

    /// Dark placeholder carrying the waiting message.
    pub fn write_waiting(&mut self, capture_running: bool) -> Result<()> {
        let (width, height) = self.size;
        let mut canvas = RgbImage::from_pixel(width, height, PLACEHOLDER_BACKGROUND);
        overlay::draw_hud(&mut canvas, &[waiting_line(capture_running)]);
        self.write(&canvas)
    }
}

fn present_preview(preview: &mut Option<FramePreview>, canvas: &RgbImage) -> Result<bool> {
    match preview {
        Some(preview) => preview.write(canvas).map(|()| true),
        None => Ok(false),
    }
}

fn waiting_preview(preview: &mut Option<FramePreview>, capture_running: bool) -> Result<()> {
    match preview {
        Some(preview) => preview.write_waiting(capture_running),
        None => Ok(()),
    }
}

fn waiting_line(capture_running: bool) -> String {
    format!(
        "waiting for frames (capture thread: {})",
        if capture_running { "running" } else { "stopped" }
    )
}

/// Interactive terminal: raw-mode single-key input, status on the log,
/// frames on the preview image.
pub struct TerminalConsole {
    raw_mode: bool,
    status: StatusThrottle,
    preview: Option<FramePreview>,
}

impl TerminalConsole {
    pub fn new(preview: Option<FramePreview>) -> Result<Self> {
        enable_raw_mode().context("enable terminal raw mode")?;
        Ok(Self {
            raw_mode: true,
            status: StatusThrottle::new(),
            preview,
        })
    }
}

impl Console for TerminalConsole {
    fn present(&mut self, canvas: &RgbImage, hud: &[String]) -> Result<bool> {
        if self.status.due(Instant::now()) {
            log::info!("[{}x{}] {}", canvas.width(), canvas.height(), hud.join(" | "));
        }
        present_preview(&mut self.preview, canvas)
    }

    fn present_waiting(&mut self, capture_running: bool) -> Result<()> {
        if self.status.due(Instant::now()) {
            log::info!("{}", waiting_line(capture_running));
        }
        waiting_preview(&mut self.preview, capture_running)
    }

    fn poll_command(&mut self, timeout: Duration) -> Result<Option<Command>> {
        if !event::poll(timeout).context("poll terminal events")? {
            return Ok(None);
        }
        let Event::Key(key) = event::read().context("read terminal event")? else {
            return Ok(None);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }
        Ok(match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Command::Quit)
            }
            KeyCode::Char(c) => Command::from_key(c.to_ascii_lowercase()),
            _ => None,
        })
    }

    fn release(&mut self) -> Result<()> {
        if self.raw_mode {
            self.raw_mode = false;
            disable_raw_mode().context("restore terminal mode")?;
        }
        Ok(())
    }
}

impl Drop for TerminalConsole {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("terminal console: {err:#}");
        }
    }
}

/// No keyboard; status goes to the log, frames to the preview image when one
/// is configured. Used for services and tests.
pub struct HeadlessConsole {
    status: StatusThrottle,
    preview: Option<FramePreview>,
}

impl HeadlessConsole {
    pub fn new(preview: Option<FramePreview>) -> Self {
        Self {
            status: StatusThrottle::new(),
            preview,
        }
    }
}

impl Default for HeadlessConsole {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Console for HeadlessConsole {
    fn present(&mut self, canvas: &RgbImage, hud: &[String]) -> Result<bool> {
        if self.status.due(Instant::now()) {
            log::info!("{}", hud.join(" | "));
        }
        present_preview(&mut self.preview, canvas)
    }

    fn present_waiting(&mut self, capture_running: bool) -> Result<()> {
        if self.status.due(Instant::now()) {
            log::info!("{}", waiting_line(capture_running));
        }
        waiting_preview(&mut self.preview, capture_running)
    }

    fn poll_command(&mut self, timeout: Duration) -> Result<Option<Command>> {
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
