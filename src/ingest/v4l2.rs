//! V4L2 camera backend.
//!
//! Requests the configured size and rate in YUYV (what most USB webcams
//! deliver), accepts RGB3 when the driver insists on it, and converts every
//! captured buffer into an owned RGB frame.

use anyhow::{bail, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraConfig, FrameGrabber};
use crate::frame::Frame;

pub(crate) struct DeviceCamera {
    device_path: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    width: u32,
    height: u32,
    /// Driver bytes per line; rows can be padded past the image.
    stride: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceCamera {
    pub(crate) fn open(config: &CameraConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2: failed to set format on {}: {}", config.device, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"YUYV" => PixelFormat::Yuyv,
            b"RGB3" => PixelFormat::Rgb24,
            other => bail!(
                "v4l2 device {} delivers unsupported pixel format {}",
                config.device,
                String::from_utf8_lossy(other)
            ),
        };
        if (format.width, format.height) != (config.width, config.height) {
            log::warn!(
                "v4l2: {} runs at {}x{} instead of requested {}x{}",
                config.device,
                format.width,
                format.height,
                config.width,
                config.height
            );
        }

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2: failed to set fps on {}: {}", config.device, err);
            }
        }

        let buffers = config.buffer_frames.max(1);
        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, buffers)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "v4l2: opened {} ({}x{}, {:?}, {} buffer(s))",
            config.device,
            format.width,
            format.height,
            pixel_format,
            buffers
        );
        Ok(Self {
            device_path: config.device.clone(),
            state: Some(state),
            format: pixel_format,
            width: format.width,
            height: format.height,
            stride: format.stride,
        })
    }
}

impl FrameGrabber for DeviceCamera {
    fn grab(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
        let rgb = normalize_to_rgb(buf, self.width, self.height, self.stride, self.format)
            .with_context(|| format!("convert frame from {}", self.device_path))?;
        Frame::new(rgb, self.width, self.height)
    }

    fn release(&mut self) -> Result<()> {
        // Dropping the stream unmaps the buffers and stops streaming.
        self.state = None;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{}, {:?})",
            self.device_path, self.width, self.height, self.format
        )
    }
}
