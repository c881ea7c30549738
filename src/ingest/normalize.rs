//! Conversion of driver buffers into tightly packed RGB.

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
}

impl PixelFormat {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Yuyv => 2,
        }
    }
}

/// Convert one captured buffer to packed RGB.
///
/// `stride` is the driver's bytes per line (V4L2 `bytesperline`); rows may be
/// padded past the image width. Zero means rows are tightly packed.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    if format == PixelFormat::Yuyv && width % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }
    let row_bytes = (width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or_else(|| anyhow!("frame dimensions overflow ({}x{})", width, height))?;
    let stride = if stride == 0 { row_bytes } else { stride as usize };
    if stride < row_bytes {
        return Err(anyhow!(
            "{:?} stride {} shorter than a {}-pixel row ({} bytes)",
            format,
            stride,
            width,
            row_bytes
        ));
    }
    // The last row needs no trailing padding.
    let expected = stride
        .checked_mul((height as usize).saturating_sub(1))
        .and_then(|v| v.checked_add(row_bytes))
        .ok_or_else(|| anyhow!("frame dimensions overflow ({}x{})", width, height))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame too short for {}x{} (stride {}): expected {}, got {}",
            format,
            width,
            height,
            stride,
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for row in 0..height as usize {
        let start = row * stride;
        let line = &pixels[start..start + row_bytes];
        match format {
            PixelFormat::Rgb24 => rgb.extend_from_slice(line),
            PixelFormat::Yuyv => yuyv_row_to_rgb(line, &mut rgb),
        }
    }
    Ok(rgb)
}

fn yuyv_row_to_rgb(line: &[u8], rgb: &mut Vec<u8>) {
    for chunk in line.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<()> {
        let yuyv = [100u8, 128, 200, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, 0, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
        Ok(())
    }

    #[test]
    fn yuyv_rejects_short_buffers_and_odd_widths() {
        assert!(normalize_to_rgb(&[0u8; 6], 2, 2, 0, PixelFormat::Yuyv).is_err());
        assert!(normalize_to_rgb(&[0u8; 12], 3, 2, 0, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn padded_rows_are_skipped() -> Result<()> {
        // 2x2 RGB, 8 bytes per line: 6 pixel bytes then 2 padding bytes.
        let pixels = [
            1, 1, 1, 2, 2, 2, 0xee, 0xee, //
            3, 3, 3, 4, 4, 4, 0xee, 0xee,
        ];
        let rgb = normalize_to_rgb(&pixels, 2, 2, 8, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);

        // The final row may end right after its pixels.
        let rgb = normalize_to_rgb(&pixels[..14], 2, 2, 8, PixelFormat::Rgb24)?;
        assert_eq!(rgb.len(), 12);
        Ok(())
    }

    #[test]
    fn padded_yuyv_rows_convert_per_line() -> Result<()> {
        let pixels = [
            50u8, 128, 60, 128, 0xee, 0xee, //
            70, 128, 80, 128,
        ];
        let rgb = normalize_to_rgb(&pixels, 2, 2, 6, PixelFormat::Yuyv)?;
        assert_eq!(
            rgb,
            vec![50, 50, 50, 60, 60, 60, 70, 70, 70, 80, 80, 80]
        );
        Ok(())
    }

    #[test]
    fn stride_shorter_than_row_is_rejected() {
        assert!(normalize_to_rgb(&[0u8; 64], 4, 2, 8, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn trailing_buffer_bytes_are_ignored() -> Result<()> {
        let mut pixels = vec![7u8; 6];
        pixels.extend_from_slice(&[0, 0]);
        let rgb = normalize_to_rgb(&pixels, 2, 1, 0, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![7u8; 6]);
        Ok(())
    }
}
