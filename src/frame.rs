//! Captured frame container.
//!
//! - `Frame`: immutable RGB pixel buffer stamped with its capture instant.
//!
//! A frame is built from an owned copy of the driver buffer, so once the
//! producer hands it to the queue nothing else aliases its pixels. Frames are
//! moved, never shared: camera → queue → consumer.

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, RgbImage};
use std::time::Instant;

/// Samples per pixel (R, G, B).
pub const FRAME_CHANNELS: usize = 3;

/// Immutable RGB frame. Pixels are row-major, 8 bits per sample.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: Instant,
}

impl Frame {
    /// Create a frame stamped with the current instant.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::with_capture_instant(pixels, width, height, Instant::now())
    }

    fn with_capture_instant(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(FRAME_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow ({}x{})", width, height))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame length mismatch for {}x{}: expected {}, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Copy into an `RgbImage` canvas (the overlay draws on the copy).
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let offset = self.offset(x, y);
            image::Rgb([
                self.pixels[offset],
                self.pixels[offset + 1],
                self.pixels[offset + 2],
            ])
        })
    }

    /// Grayscale conversion with BT.601 weights.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let offset = self.offset(x, y);
            let r = self.pixels[offset] as u32;
            let g = self.pixels[offset + 1] as u32;
            let b = self.pixels[offset + 2] as u32;
            Luma([((299 * r + 587 * g + 114 * b + 500) / 1000) as u8])
        })
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * FRAME_CHANNELS
    }
}
