use std::path::Path;

use anyhow::{bail, Context, Result};

use super::synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::DeviceCamera;
use super::FrameGrabber;
use crate::frame::Frame;

const STUB_SCHEME: &str = "stub://";

/// Camera request: device plus the format asked of it.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// `stub://<name>[?fail_after=N]` or a V4L2 device path.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Driver-side buffer count. One keeps latency minimal.
    pub buffer_frames: u32,
    /// Frames read and discarded after opening so exposure settles.
    pub warmup_frames: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://street".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
            buffer_frames: 1,
            warmup_frames: 10,
        }
    }
}

/// An opened camera. Owned by the frame source thread, which releases it when
/// capture ends.
pub struct Camera {
    config: CameraConfig,
    backend: CameraBackend,
    frames_captured: u64,
    released: bool,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl Camera {
    /// Open the configured device and run the warm-up reads.
    pub fn open(config: CameraConfig) -> Result<Self> {
        let backend = if let Some(spec) = config.device.strip_prefix(STUB_SCHEME) {
            CameraBackend::Synthetic(SyntheticCamera::new(spec, config.width, config.height)?)
        } else {
            open_device(&config)?
        };

        let mut camera = Self {
            config,
            backend,
            frames_captured: 0,
            released: false,
        };
        camera.warm_up()?;
        log::info!("camera ready: {}", camera.describe());
        Ok(camera)
    }

    fn warm_up(&mut self) -> Result<()> {
        for i in 0..self.config.warmup_frames {
            self.grab()
                .with_context(|| format!("camera warm-up read {} of {}", i + 1, self.config.warmup_frames))?;
        }
        Ok(())
    }
}

impl FrameGrabber for Camera {
    fn grab(&mut self) -> Result<Frame> {
        if self.released {
            bail!("camera {} already released", self.config.device);
        }
        let frame = match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.grab(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.grab(),
        }?;
        self.frames_captured += 1;
        Ok(frame)
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        log::info!(
            "releasing camera {} after {} frames",
            self.config.device,
            self.frames_captured
        );
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.release(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.describe(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(camera) => camera.describe(),
        }
    }
}

fn open_device(config: &CameraConfig) -> Result<CameraBackend> {
    if !Path::new(&config.device).exists() {
        bail!("camera device {} does not exist", config.device);
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(CameraBackend::Device(DeviceCamera::open(config)?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        bail!(
            "camera device {} needs V4L2 support (build with --features ingest-v4l2)",
            config.device
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(device: &str) -> CameraConfig {
        CameraConfig {
            device: device.to_string(),
            width: 64,
            height: 48,
            warmup_frames: 3,
            ..CameraConfig::default()
        }
    }

    #[test]
    fn open_runs_warm_up_reads() -> Result<()> {
        let mut camera = Camera::open(stub_config("stub://test"))?;
        assert_eq!(camera.frames_captured, 3);

        let frame = camera.grab()?;
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(camera.frames_captured, 4);
        Ok(())
    }

    #[test]
    fn missing_device_path_is_an_error() {
        let err = Camera::open(stub_config("/dev/carwatch-missing-video9"))
            .err()
            .expect("open must fail");
        assert!(format!("{err:#}").contains("does not exist"));
    }

    #[test]
    fn warm_up_failure_fails_open() {
        assert!(Camera::open(stub_config("stub://test?fail_after=1")).is_err());
    }

    #[test]
    fn released_camera_refuses_reads() -> Result<()> {
        let mut camera = Camera::open(stub_config("stub://test"))?;
        camera.release()?;
        camera.release()?;
        let err = camera.grab().err().expect("released camera must not read");
        assert!(format!("{err:#}").contains("already released"));
        Ok(())
    }

    #[test]
    fn read_errors_are_not_counted() -> Result<()> {
        let mut camera = Camera::open(stub_config("stub://test?fail_after=3"))?;
        assert!(camera.grab().is_err());
        assert_eq!(camera.frames_captured, 3);
        Ok(())
    }
}
