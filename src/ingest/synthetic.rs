use anyhow::{anyhow, bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::FrameGrabber;
use crate::frame::Frame;

const CAR_WIDTH: u32 = 140;
const CAR_HEIGHT: u32 = 70;
const CAR_SPEED_PX: i64 = 4;
const CAR_BODY: [u8; 3] = [180, 30, 30];
const CAR_WINDOW: [u8; 3] = [40, 50, 70];
const TEXTURE_SEED: u64 = 0x0c47_57a7;

/// Camera stand-in for `stub://<name>[?fail_after=N]` devices.
///
/// Renders a car-sized block driving across a textured road. The road texture
/// is fixed, so a background model settles on it quickly. With `fail_after`
/// the camera errors on every grab after the Nth, like an unplugged device.
pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    road: Vec<u8>,
    frame_count: u64,
    fail_after: Option<u64>,
}

impl SyntheticCamera {
    /// `spec` is the device string without the `stub://` prefix.
    pub fn new(spec: &str, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("synthetic camera needs non-zero dimensions ({}x{})", width, height);
        }
        let (name, query) = match spec.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (spec, None),
        };

        let mut fail_after = None;
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("fail_after", value)) => {
                    let frames = value
                        .parse::<u64>()
                        .with_context(|| format!("invalid fail_after value {value:?}"))?;
                    fail_after = Some(frames);
                }
                _ => return Err(anyhow!("unknown synthetic camera option {pair:?}")),
            }
        }

        Ok(Self {
            name: name.to_string(),
            width,
            height,
            road: road_texture(width, height),
            frame_count: 0,
            fail_after,
        })
    }

    /// Left edge of the car for the current frame; wraps once it leaves the
    /// right border.
    fn car_x(&self) -> i64 {
        let track = self.width as i64 + CAR_WIDTH as i64;
        (self.frame_count as i64 * CAR_SPEED_PX) % track - CAR_WIDTH as i64
    }

    fn render(&self) -> Vec<u8> {
        let mut pixels = self.road.clone();
        let car_x = self.car_x();
        let car_y = (self.height as i64 * 11 / 20) - CAR_HEIGHT as i64 / 2;
        for dy in 0..CAR_HEIGHT as i64 {
            let y = car_y + dy;
            if y < 0 || y >= self.height as i64 {
                continue;
            }
            for dx in 0..CAR_WIDTH as i64 {
                let x = car_x + dx;
                if x < 0 || x >= self.width as i64 {
                    continue;
                }
                let is_window = dy < CAR_HEIGHT as i64 / 3
                    && dx > CAR_WIDTH as i64 / 5
                    && dx < CAR_WIDTH as i64 * 4 / 5;
                let color = if is_window { CAR_WINDOW } else { CAR_BODY };
                let offset = (y as usize * self.width as usize + x as usize) * 3;
                pixels[offset..offset + 3].copy_from_slice(&color);
            }
        }
        pixels
    }
}

impl FrameGrabber for SyntheticCamera {
    fn grab(&mut self) -> Result<Frame> {
        if let Some(limit) = self.fail_after {
            if self.frame_count >= limit {
                bail!(
                    "synthetic camera {} disconnected after {} frames",
                    self.name,
                    limit
                );
            }
        }
        let pixels = self.render();
        self.frame_count += 1;
        Frame::new(pixels, self.width, self.height)
    }

    fn describe(&self) -> String {
        format!("stub://{} ({}x{}, synthetic)", self.name, self.width, self.height)
    }
}

/// Gray asphalt with fixed grain and dashed lane markings.
fn road_texture(width: u32, height: u32) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(TEXTURE_SEED);
    let lane_y = height / 3;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let marking = y.abs_diff(lane_y) < 3 && (x / 40) % 2 == 0;
            let base: i16 = if marking { 210 } else { 90 };
            let grain: i16 = rng.gen_range(-6..=6);
            let value = (base + grain).clamp(0, 255) as u8;
            pixels.extend_from_slice(&[value, value, value]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_frames_of_requested_size() -> Result<()> {
        let mut camera = SyntheticCamera::new("street", 320, 240)?;
        let frame = camera.grab()?;
        assert_eq!((frame.width(), frame.height()), (320, 240));
        assert_eq!(camera.frame_count, 1);
        assert!(camera.describe().starts_with("stub://street"));
        Ok(())
    }

    #[test]
    fn car_moves_between_frames() -> Result<()> {
        let mut camera = SyntheticCamera::new("street", 320, 240)?;
        for _ in 0..40 {
            camera.grab()?;
        }
        let a = camera.grab()?;
        let b = camera.grab()?;
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn fail_after_simulates_disconnect() -> Result<()> {
        let mut camera = SyntheticCamera::new("street?fail_after=2", 64, 48)?;
        camera.grab()?;
        camera.grab()?;
        assert!(camera.grab().is_err());
        assert!(camera.grab().is_err());
        Ok(())
    }

    #[test]
    fn rejects_bad_options() {
        assert!(SyntheticCamera::new("street?fail_after=soon", 64, 48).is_err());
        assert!(SyntheticCamera::new("street?exposure=3", 64, 48).is_err());
        assert!(SyntheticCamera::new("street", 0, 48).is_err());
    }
}
