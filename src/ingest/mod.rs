//! Frame acquisition.
//!
//! - `Camera`: the camera handle, either the synthetic `stub://` scene or a
//!   V4L2 device (feature: ingest-v4l2)
//! - `FrameSource`: the producer thread that reads the camera at a capped rate
//!   and publishes into the frame queue
//!
//! Every backend copies driver memory into an owned buffer before building a
//! `Frame`, so frames never alias device buffers.

use anyhow::Result;

use crate::frame::Frame;

mod camera;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod source;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use camera::{Camera, CameraConfig};
pub use source::{FrameSource, FrameSourceHandle, JoinOutcome};
pub use synthetic::SyntheticCamera;

/// Anything the frame source can read frames from.
pub trait FrameGrabber: Send {
    /// Block until the next frame is available. An `Err` means the camera is
    /// gone; the caller stops capturing.
    fn grab(&mut self) -> Result<Frame>;

    /// Release the underlying device. Must be idempotent.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String;
}
