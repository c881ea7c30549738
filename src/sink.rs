//! Publication of detection summaries to the dashboard.
//!
//! The pipeline never talks to a sink directly: records go through a
//! `SinkWorker`, whose thread owns the sink. Handing a record over never
//! blocks; when the worker falls behind, new records are discarded.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use url::Url;

/// Records waiting for the sink thread before new ones are discarded.
pub const SINK_QUEUE_CAPACITY: usize = 4;
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Flat record the dashboard's `/video_data` endpoint accepts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub car_count: u32,
    pub total_detections: u64,
    pub frame_fps: f64,
    /// Detector time for the frame, in milliseconds.
    pub ai_process_time: f64,
}

impl DetectionRecord {
    pub fn now(car_count: u32, total_detections: u64, frame_fps: f64, ai_process_time: f64) -> Self {
        Self {
            timestamp: unix_seconds_f64(),
            car_count,
            total_detections,
            frame_fps,
            ai_process_time,
        }
    }
}

pub trait DetectionSink: Send {
    fn publish(&mut self, record: &DetectionRecord) -> Result<()>;
}

/// Parse a dashboard endpoint. Only http(s) URLs with a host are accepted.
pub fn parse_sink_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("parse sink url {raw:?}"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "unsupported sink scheme '{}'; expected http(s)",
                other
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("sink url {raw:?} has no host"));
    }
    Ok(url)
}

/// POSTs each record as JSON.
pub struct HttpSink {
    url: Url,
    timeout: Duration,
}

impl HttpSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: parse_sink_url(url)?,
            timeout,
        })
    }
}

impl DetectionSink for HttpSink {
    fn publish(&mut self, record: &DetectionRecord) -> Result<()> {
        let body = serde_json::to_string(record).context("serialize detection record")?;
        ureq::request_url("POST", &self.url)
            .timeout(self.timeout)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("post detection record to {}", self.url))?;
        Ok(())
    }
}

/// Writes records to the log at debug level.
#[derive(Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn publish(&mut self, record: &DetectionRecord) -> Result<()> {
        log::debug!(
            "detections: {} in frame, {} total, {:.1} fps, {:.1}ms",
            record.car_count,
            record.total_detections,
            record.frame_fps,
            record.ai_process_time
        );
        Ok(())
    }
}

/// Dedicated publisher thread fed through a small bounded channel.
pub struct SinkWorker {
    tx: Option<Sender<DetectionRecord>>,
    handle: Option<JoinHandle<()>>,
    discarded: u64,
}

impl SinkWorker {
    pub fn spawn(mut sink: Box<dyn DetectionSink>, capacity: usize) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<DetectionRecord>(capacity.max(1));
        let handle = thread::Builder::new()
            .name("detection-sink".to_string())
            .spawn(move || {
                for record in rx.iter() {
                    if let Err(err) = sink.publish(&record) {
                        log::warn!("detection sink: {err:#}");
                    }
                }
            })
            .context("spawn detection sink thread")?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            discarded: 0,
        })
    }

    /// Queue a record for publication without waiting. Returns false when the
    /// record was discarded.
    pub fn offer(&mut self, record: DetectionRecord) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.discarded += 1;
                log::trace!("detection sink busy, record discarded");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.discarded += 1;
                log::warn!("detection sink thread is gone, record discarded");
                false
            }
        }
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Stop accepting records and wait up to `timeout` for the queued ones to
    /// go out. Returns false when the thread was left detached.
    pub fn close(&mut self, timeout: Duration) -> bool {
        self.tx = None;
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(JOIN_POLL));
        }
        if handle.join().is_err() {
            log::warn!("detection sink thread panicked");
        }
        true
    }
}

impl Drop for SinkWorker {
    fn drop(&mut self) {
        // Disconnect only; never wait here.
        self.tx = None;
    }
}

pub(crate) fn unix_seconds_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
