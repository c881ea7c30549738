use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Implementations are driven by the single pipeline consumer, one frame at a
/// time, so they may keep mutable state (background models, trackers) without
/// locking.
///
/// `detect` must return promptly. An `Err` is scoped to that one frame: the
/// pipeline logs it and renders the frame without detections. Reported boxes
/// must already be clipped to the frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release model resources at shutdown.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
