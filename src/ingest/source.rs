use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};

use super::FrameGrabber;
use crate::cancel::CancellationToken;
use crate::metrics::{CaptureStats, RateMeter};
use crate::queue::{BoundedFrameQueue, PutOutcome};

/// Longest single sleep while waiting for the next capture slot, so a
/// cancellation is noticed within about a millisecond.
const PACING_SLEEP: Duration = Duration::from_millis(1);
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Producer side of the pipeline: reads the camera no faster than
/// `target_fps` and publishes every frame into the queue.
pub struct FrameSource {
    camera: Box<dyn FrameGrabber>,
    queue: Arc<BoundedFrameQueue>,
    cancel: CancellationToken,
    stats: Arc<CaptureStats>,
    frame_interval: Duration,
}

impl FrameSource {
    pub fn new(
        camera: Box<dyn FrameGrabber>,
        queue: Arc<BoundedFrameQueue>,
        cancel: CancellationToken,
        stats: Arc<CaptureStats>,
        target_fps: u32,
    ) -> Result<Self> {
        if target_fps == 0 {
            bail!("frame source target fps must be positive");
        }
        Ok(Self {
            camera,
            queue,
            cancel,
            stats,
            frame_interval: Duration::from_secs_f64(1.0 / target_fps as f64),
        })
    }

    /// Start capturing on a dedicated thread.
    pub fn spawn(self) -> Result<FrameSourceHandle> {
        let stats = Arc::clone(&self.stats);
        // Reported as running from the moment the thread exists.
        stats.set_running(true);
        let handle = thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || self.run())
            .map_err(|err| {
                stats.set_running(false);
                anyhow::Error::new(err).context("spawn frame source thread")
            })?;
        Ok(FrameSourceHandle {
            handle: Some(handle),
        })
    }

    /// Capture until cancelled or the camera fails. The camera is released
    /// before returning either way.
    ///
    /// A camera failure is recorded in the capture stats and cancels the whole
    /// pipeline.
    pub fn run(mut self) -> Result<()> {
        log::info!(
            "frame source started: {} at up to {:.1} fps",
            self.camera.describe(),
            1.0 / self.frame_interval.as_secs_f64()
        );
        self.stats.set_running(true);
        let result = self.capture_loop();
        self.stats.set_running(false);

        if let Err(err) = self.camera.release() {
            log::warn!("frame source: camera release failed: {err:#}");
        }
        log::info!(
            "frame source stopped after {} frames ({} dropped by queue)",
            self.stats.frames_captured(),
            self.queue.dropped_total()
        );
        result
    }

    fn capture_loop(&mut self) -> Result<()> {
        let mut meter = RateMeter::new();
        let mut next_due = Instant::now();

        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            if now < next_due {
                thread::sleep((next_due - now).min(PACING_SLEEP));
                continue;
            }

            let frame = match self.camera.grab() {
                Ok(frame) => frame,
                Err(err) => {
                    let reason = format!("{err:#}");
                    log::error!("camera read failed, stopping capture: {reason}");
                    self.stats.record_failure(reason);
                    self.cancel.cancel();
                    return Err(err.context("camera read failed"));
                }
            };
            next_due = now + self.frame_interval;

            self.stats.record_frame();
            if self.queue.put(frame) == PutOutcome::DroppedOldest {
                log::trace!("frame queue full, dropped oldest frame");
            }
            if let Some(fps) = meter.tick(Instant::now()) {
                self.stats.set_capture_fps(fps);
                log::debug!("capture fps {:.1}", fps);
            }
        }
        Ok(())
    }
}

pub enum JoinOutcome {
    /// The thread finished; carries its result.
    Joined(Result<()>),
    TimedOut,
}

/// Owner's handle to a running frame source thread.
pub struct FrameSourceHandle {
    handle: Option<JoinHandle<Result<()>>>,
}

impl FrameSourceHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the thread to end. A timed-out thread is left
    /// detached; it still releases the camera once it notices cancellation.
    pub fn join_timeout(&mut self, timeout: Duration) -> JoinOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_finished() {
                return JoinOutcome::Joined(self.join_finished());
            }
            let now = Instant::now();
            if now >= deadline {
                return JoinOutcome::TimedOut;
            }
            thread::sleep((deadline - now).min(JOIN_POLL));
        }
    }

    fn join_finished(&mut self) -> Result<()> {
        match self.handle.take() {
            None => Ok(()),
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("frame source thread panicked"))
                .and_then(|result| result)
                .context("frame source"),
        }
    }
}
