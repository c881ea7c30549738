//! carwatch - real-time vehicle detection pipeline.
//!
//! A capture thread reads a camera at a capped rate and feeds a small bounded
//! queue; the pipeline loop on the main thread takes frames from the queue,
//! runs a vehicle detector, draws the detections, and presents the result
//! while tracking capture, detection, and display rates.
//!
//! # Module Structure
//!
//! - `frame`: immutable RGB frames stamped with their capture instant
//! - `queue`: bounded frame queue that drops the oldest frame when full
//! - `ingest`: cameras (synthetic `stub://`, V4L2) and the `FrameSource` thread
//! - `detect`: motion (background subtraction) and cascade detectors
//! - `overlay`: box, label, and HUD drawing
//! - `pipeline`: the consumer loop, commands, and the cleanup phase
//! - `console`: terminal / headless display (preview JPEG) and keyboard surface
//! - `sink`: dashboard record publication from a background thread
//! - `config`: file + environment configuration
//!
//! Shutdown is coordinated by one `CancellationToken` shared by the frame
//! source, the pipeline loop, and the process signal handler.

pub mod cancel;
pub mod config;
pub mod console;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod overlay;
pub mod pipeline;
pub mod queue;
pub mod sink;

pub use cancel::CancellationToken;
pub use config::CarwatchConfig;
pub use console::{Command, Console, FramePreview, HeadlessConsole, TerminalConsole};
pub use detect::{
    BoundingBox, Detection, DetectionMode, DetectorBackend, DetectorSettings, VehicleDetector,
};
pub use frame::Frame;
pub use ingest::{Camera, CameraConfig, FrameGrabber, FrameSource, FrameSourceHandle, JoinOutcome};
pub use metrics::{CaptureStats, PipelineMetrics, RateMeter};
pub use overlay::{annotate, Annotation};
pub use pipeline::{LoopSettings, PipelineLoop, PipelineState, PipelineSummary};
pub use queue::{BoundedFrameQueue, PutOutcome, DEFAULT_QUEUE_CAPACITY};
pub use sink::{parse_sink_url, DetectionRecord, DetectionSink, HttpSink, LogSink, SinkWorker};
