use std::path::PathBuf;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::backends::{CascadeDetector, CascadeParams, MotionDetector, MotionParams};
use crate::detect::result::{Detection, DetectionMode};
use crate::frame::Frame;

/// Everything needed to build a [`VehicleDetector`].
#[derive(Clone, Debug, Default)]
pub struct DetectorSettings {
    /// Cascade model files, tried in order.
    pub cascade_paths: Vec<PathBuf>,
    pub cascade: CascadeParams,
    pub motion: MotionParams,
}

/// The pipeline's detector. The variant is fixed at construction.
pub enum VehicleDetector {
    Motion(MotionDetector),
    /// Cascade first; frames where it finds nothing use the motion result.
    Cascade {
        cascade: CascadeDetector,
        motion: MotionDetector,
    },
}

impl VehicleDetector {
    /// Look for a loadable cascade model and fall back to motion-only detection.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let motion = MotionDetector::new(settings.motion.clone())?;
        let detector = match CascadeDetector::probe(&settings.cascade_paths, &settings.cascade) {
            Some(cascade) => Self::Cascade { cascade, motion },
            None => Self::Motion(motion),
        };
        log::info!("vehicle detector mode: {}", detector.mode().describe());
        Ok(detector)
    }

    pub fn mode(&self) -> DetectionMode {
        match self {
            VehicleDetector::Motion(_) => DetectionMode::Motion,
            VehicleDetector::Cascade { .. } => DetectionMode::CascadeWithMotionFallback,
        }
    }
}

impl DetectorBackend for VehicleDetector {
    fn name(&self) -> &'static str {
        match self {
            VehicleDetector::Motion(_) => "motion",
            VehicleDetector::Cascade { .. } => "cascade+motion",
        }
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        match self {
            VehicleDetector::Motion(motion) => motion.detect(frame),
            VehicleDetector::Cascade { cascade, motion } => {
                let hits = cascade.detect(frame).unwrap_or_else(|err| {
                    log::warn!(
                        "cascade detection failed on {}x{} frame: {err:#}",
                        frame.width(),
                        frame.height()
                    );
                    Vec::new()
                });
                // The background model sees every frame so the fallback never
                // starts from a stale scene.
                let moving = motion.detect(frame)?;
                Ok(if hits.is_empty() { moving } else { hits })
            }
        }
    }
}
