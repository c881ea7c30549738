//! The pipeline consumer.
//!
//! `PipelineLoop` dequeues frames, runs the detector, draws the overlay,
//! presents the result, and reacts to console commands until the shared
//! cancellation token fires. Leaving the loop always runs the cleanup phase,
//! whichever component asked for shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::console::{Command, Console};
use crate::detect::{DetectorBackend, VEHICLE_LABELS};
use crate::frame::Frame;
use crate::ingest::{FrameSourceHandle, JoinOutcome};
use crate::metrics::{CaptureStats, PipelineMetrics, RateMeter};
use crate::overlay;
use crate::queue::BoundedFrameQueue;
use crate::sink::{unix_seconds_f64, DetectionRecord, DetectionSink, SinkWorker, SINK_QUEUE_CAPACITY};

/// Shared handles created at startup and injected into both the frame source
/// and the pipeline loop.
#[derive(Clone)]
pub struct PipelineState {
    pub cancel: CancellationToken,
    pub queue: Arc<BoundedFrameQueue>,
    pub capture: Arc<CaptureStats>,
}

impl PipelineState {
    pub fn new(queue_capacity: usize) -> Result<Self> {
        Ok(Self {
            cancel: CancellationToken::new(),
            queue: Arc::new(BoundedFrameQueue::new(queue_capacity)?),
            capture: Arc::new(CaptureStats::new()),
        })
    }
}

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Longest wait for a frame per cycle.
    pub get_timeout: Duration,
    /// Consecutive empty polls before the waiting placeholder shows.
    pub waiting_after_empty_polls: u32,
    /// Longest wait for a key per cycle.
    pub key_poll: Duration,
    /// Where `s` writes snapshots.
    pub output_dir: PathBuf,
    /// Minimum spacing of sink publications.
    pub sink_interval: Duration,
    /// How long shutdown waits for the frame source thread.
    pub join_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            get_timeout: Duration::from_millis(100),
            waiting_after_empty_polls: 10,
            key_poll: Duration::from_millis(1),
            output_dir: PathBuf::from("."),
            sink_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Final counters, returned by `shutdown`.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineSummary {
    pub frames_displayed: u64,
    pub total_detections: u64,
    pub display_fps: f64,
    pub detection_fps: f64,
    pub frames_captured: u64,
    pub frames_dropped: u64,
}

pub struct PipelineLoop<D: DetectorBackend> {
    state: PipelineState,
    detector: D,
    console: Box<dyn Console>,
    sink: Option<SinkWorker>,
    source: Option<FrameSourceHandle>,
    settings: LoopSettings,
    mode: String,

    paused: bool,
    empty_polls: u32,
    total_detections: u64,
    frames_displayed: u64,
    last_detection_count: usize,
    last_process_time: Duration,
    last_latency: Duration,
    detection_rate: RateMeter,
    display_rate: RateMeter,
    current_frame: Option<RgbImage>,
    last_publish: Option<Instant>,
    summary: Option<PipelineSummary>,
}

impl<D: DetectorBackend> PipelineLoop<D> {
    pub fn new(state: PipelineState, detector: D, console: Box<dyn Console>, settings: LoopSettings) -> Self {
        let mode = detector.name().to_string();
        Self {
            state,
            detector,
            console,
            sink: None,
            source: None,
            settings,
            mode,
            paused: false,
            empty_polls: 0,
            total_detections: 0,
            frames_displayed: 0,
            last_detection_count: 0,
            last_process_time: Duration::ZERO,
            last_latency: Duration::ZERO,
            detection_rate: RateMeter::new(),
            display_rate: RateMeter::new(),
            current_frame: None,
            last_publish: None,
            summary: None,
        }
    }

    /// Publish records through `sink` from a dedicated thread.
    pub fn with_sink(mut self, sink: Box<dyn DetectionSink>) -> Result<Self> {
        self.sink = Some(SinkWorker::spawn(sink, SINK_QUEUE_CAPACITY)?);
        Ok(self)
    }

    /// Hand over the running frame source so shutdown can join it.
    pub fn with_source(mut self, source: FrameSourceHandle) -> Self {
        self.source = Some(source);
        self
    }

    /// Mode line shown on the HUD (defaults to the detector name).
    pub fn with_mode_label(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Run until cancelled, then clean up.
    ///
    /// Returns `Err` when capture stopped because the camera failed; cleanup
    /// has already run by then.
    pub fn run(&mut self) -> Result<PipelineSummary> {
        log::info!("pipeline running ({})", self.mode);
        if let Err(err) = self.detector.warm_up() {
            log::warn!("{} warm-up failed: {err:#}", self.detector.name());
        }
        while !self.state.cancel.is_cancelled() {
            self.cycle();
            match self.console.poll_command(self.settings.key_poll) {
                Ok(Some(command)) => self.handle_command(command),
                Ok(None) => {}
                Err(err) => log::warn!("console poll failed: {err:#}"),
            }
        }

        let summary = self.shutdown();
        match self.state.capture.failure() {
            Some(reason) => Err(anyhow!("capture stopped: {reason}")),
            None => Ok(summary),
        }
    }

    /// One consumer cycle: take a frame (unless paused) and process it.
    pub fn cycle(&mut self) {
        if self.paused {
            return;
        }
        match self.state.queue.get(self.settings.get_timeout) {
            Some(frame) => {
                self.empty_polls = 0;
                self.process_frame(frame);
            }
            None => {
                self.empty_polls = self.empty_polls.saturating_add(1);
                if self.empty_polls > self.settings.waiting_after_empty_polls {
                    let running = self.state.capture.is_running();
                    if let Err(err) = self.console.present_waiting(running) {
                        log::warn!("failed to present waiting screen: {err:#}");
                    }
                }
            }
        }
    }

    fn process_frame(&mut self, frame: Frame) {
        let started = Instant::now();
        let detections = self.detector.detect(&frame).unwrap_or_else(|err| {
            log::warn!(
                "{} detection failed on {}x{} frame: {err:#}",
                self.detector.name(),
                frame.width(),
                frame.height()
            );
            Vec::new()
        });
        self.last_process_time = started.elapsed();

        let mut canvas = frame.to_rgb_image();
        let drawn = overlay::annotate(&mut canvas, &detections, VEHICLE_LABELS);
        self.last_detection_count = drawn.len();
        self.total_detections += drawn.len() as u64;
        self.detection_rate.tick(Instant::now());

        self.last_latency = frame.captured_at().elapsed();
        let hud = self.metrics().hud_lines(&self.mode);
        overlay::draw_hud(&mut canvas, &hud);
        match self.console.present(&canvas, &hud) {
            Ok(true) => {
                self.frames_displayed += 1;
                self.display_rate.tick(Instant::now());
            }
            Ok(false) => {}
            Err(err) => log::warn!(
                "failed to present {}x{} frame: {err:#}",
                canvas.width(),
                canvas.height()
            ),
        }
        self.current_frame = Some(canvas);
        self.publish(Instant::now());
    }

    fn publish(&mut self, now: Instant) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Some(last) = self.last_publish {
            if now.saturating_duration_since(last) < self.settings.sink_interval {
                return;
            }
        }
        self.last_publish = Some(now);

        let record = DetectionRecord::now(
            self.last_detection_count as u32,
            self.total_detections,
            self.display_rate.rate(),
            self.last_process_time.as_secs_f64() * 1000.0,
        );
        sink.offer(record);
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Quit => {
                log::info!("quit requested");
                self.state.cancel.cancel();
            }
            Command::SaveFrame => match self.save_current_frame() {
                Ok(Some(path)) => log::info!("saved detection result {}", path.display()),
                Ok(None) => {}
                Err(err) => log::error!("failed to save frame: {err:#}"),
            },
            Command::TogglePause => {
                self.paused = !self.paused;
                log::info!("{}", if self.paused { "paused" } else { "resumed" });
            }
            Command::ShowInfo => {
                self.show_info();
            }
            Command::ResetCounters => self.reset_counters(),
        }
    }

    /// Write the last presented canvas as a JPEG. `Ok(None)` while paused or
    /// before any frame was shown.
    pub fn save_current_frame(&self) -> Result<Option<PathBuf>> {
        if self.paused {
            log::info!("save ignored while paused");
            return Ok(None);
        }
        let Some(canvas) = self.current_frame.as_ref() else {
            log::info!("no frame to save yet");
            return Ok(None);
        };
        let name = format!("detection_result_{}.jpg", unix_seconds_f64() as u64);
        let path = self.settings.output_dir.join(name);
        canvas
            .save(&path)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(Some(path))
    }

    pub fn show_info(&self) -> PipelineMetrics {
        let metrics = self.metrics();
        log::info!(
            "capture {:.1} fps | detection {:.1} fps | display {:.1} fps | latency {:.1}ms | {} detections ({} in last frame) | {} frames shown | queue {}/{} ({} dropped) | capture thread {} | {}",
            metrics.capture_fps,
            metrics.detection_fps,
            metrics.display_fps,
            metrics.frame_latency_ms,
            metrics.total_detections,
            metrics.last_detection_count,
            metrics.frames_displayed,
            metrics.queue_depth,
            metrics.queue_capacity,
            metrics.frames_dropped,
            if metrics.capture_running { "running" } else { "stopped" },
            if metrics.paused { "paused" } else { "live" }
        );
        metrics
    }

    pub fn reset_counters(&mut self) {
        self.total_detections = 0;
        self.frames_displayed = 0;
        log::info!("counters reset");
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            capture_fps: self.state.capture.capture_fps(),
            detection_fps: self.detection_rate.rate(),
            display_fps: self.display_rate.rate(),
            total_detections: self.total_detections,
            frames_displayed: self.frames_displayed,
            last_detection_count: self.last_detection_count,
            last_process_time_ms: self.last_process_time.as_secs_f64() * 1000.0,
            frame_latency_ms: self.last_latency.as_secs_f64() * 1000.0,
            queue_depth: self.state.queue.len(),
            queue_capacity: self.state.queue.capacity(),
            frames_dropped: self.state.queue.dropped_total(),
            capture_running: self.state.capture.is_running(),
            paused: self.paused,
        }
    }

    /// Tear everything down. Runs once; later calls return the same summary.
    ///
    /// Steps are independent: a failing step is logged and the rest still run.
    pub fn shutdown(&mut self) -> PipelineSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        self.state.cancel.cancel();

        if let Some(mut source) = self.source.take() {
            match source.join_timeout(self.settings.join_timeout) {
                JoinOutcome::Joined(Ok(())) => log::debug!("frame source joined"),
                JoinOutcome::Joined(Err(err)) => log::warn!("frame source ended with error: {err:#}"),
                JoinOutcome::TimedOut => log::warn!(
                    "frame source did not stop within {:?}; leaving it detached",
                    self.settings.join_timeout
                ),
            }
        }

        let drained = self.state.queue.drain().len();
        if drained > 0 {
            log::debug!("discarded {drained} queued frames");
        }

        if let Some(mut sink) = self.sink.take() {
            if !sink.close(self.settings.join_timeout) {
                log::warn!(
                    "detection sink did not finish within {:?}; leaving it detached",
                    self.settings.join_timeout
                );
            }
            if sink.discarded() > 0 {
                log::info!("detection sink discarded {} records while busy", sink.discarded());
            }
        }

        if let Err(err) = self.detector.release() {
            log::warn!("detector release failed: {err:#}");
        }
        if let Err(err) = self.console.release() {
            log::warn!("console release failed: {err:#}");
        }
        self.current_frame = None;

        let summary = PipelineSummary {
            frames_displayed: self.frames_displayed,
            total_detections: self.total_detections,
            display_fps: self.display_rate.rate(),
            detection_fps: self.detection_rate.rate(),
            frames_captured: self.state.capture.frames_captured(),
            frames_dropped: self.state.queue.dropped_total(),
        };
        log::info!(
            "pipeline stopped: {} frames shown, {} detections, {} captured, {} dropped",
            summary.frames_displayed,
            summary.total_detections,
            summary.frames_captured,
            summary.frames_dropped
        );
        self.summary = Some(summary.clone());
        summary
    }
}

impl<D: DetectorBackend> Drop for PipelineLoop<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
