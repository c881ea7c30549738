//! Rate meters and pipeline metric snapshots.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Counter/reset rate estimator over rolling windows.
///
/// Events accumulate until the window has lasted at least one second, then the
/// rate becomes `count / elapsed` and the window restarts.
#[derive(Clone, Debug)]
pub struct RateMeter {
    window: Duration,
    window_start: Instant,
    count: u64,
    rate: f64,
}

impl RateMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            window: RATE_WINDOW,
            window_start: now,
            count: 0,
            rate: 0.0,
        }
    }

    /// Record one event at `now`. Returns the fresh rate when a window closed.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        self.rate = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.window_start = now;
        Some(self.rate)
    }

    /// Rate computed at the last window boundary.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::starting_at(now);
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture-side statistics, written by the frame source and read by everyone
/// else.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_captured: AtomicU64,
    capture_fps_bits: AtomicU64,
    running: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_frame(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_capture_fps(&self, fps: f64) {
        self.capture_fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self, message: String) {
        let mut failure = self
            .failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *failure = Some(message);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn capture_fps(&self) -> f64 {
        f64::from_bits(self.capture_fps_bits.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Camera failure that stopped capture, if any.
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Point-in-time view of the pipeline, shown by the `i` command.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineMetrics {
    pub capture_fps: f64,
    pub detection_fps: f64,
    pub display_fps: f64,
    pub total_detections: u64,
    pub frames_displayed: u64,
    pub last_detection_count: usize,
    pub last_process_time_ms: f64,
    /// Capture to presentation, for the last shown frame.
    pub frame_latency_ms: f64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub frames_dropped: u64,
    pub capture_running: bool,
    pub paused: bool,
}

impl PipelineMetrics {
    /// HUD lines drawn next to the video.
    pub fn hud_lines(&self, mode: &str) -> Vec<String> {
        vec![
            format!("vehicles: {}", self.last_detection_count),
            format!("total detections: {}", self.total_detections),
            format!("capture fps: {:.1}", self.capture_fps),
            format!("detection fps: {:.1}", self.detection_fps),
            format!("display fps: {:.1}", self.display_fps),
            format!("detection time: {:.1}ms", self.last_process_time_ms),
            format!("latency: {:.1}ms", self.frame_latency_ms),
            format!("queue: {}/{}", self.queue_depth, self.queue_capacity),
            format!(
                "capture thread: {}",
                if self.capture_running { "running" } else { "stopped" }
            ),
            mode.to_string(),
        ]
    }
}
