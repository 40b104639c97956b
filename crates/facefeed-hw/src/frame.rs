//! Frame type and pixel format conversion.

use image::{Rgb, RgbImage};
use std::time::Instant;

/// One captured RGB frame.
///
/// Owned by exactly one pipeline stage at a time; moved, never shared.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Per-session capture counter, starting at 0.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("odd frame width {0} for YUYV")]
    OddWidth(u32),
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YUV → RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    Rgb([
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ])
}

/// Convert packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per pixel pair) to RGB.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    if width % 2 != 0 {
        return Err(FrameError::OddWidth(width));
    }
    check_len(yuyv, (width * height * 2) as usize)?;

    let mut image = RgbImage::new(width, height);
    for (i, quad) in yuyv.chunks_exact(4).take((width * height / 2) as usize).enumerate() {
        let x = (i as u32 * 2) % width;
        let y = (i as u32 * 2) / width;
        image.put_pixel(x, y, yuv_to_rgb(quad[0], quad[1], quad[3]));
        image.put_pixel(x + 1, y, yuv_to_rgb(quad[2], quad[1], quad[3]));
    }
    Ok(image)
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    check_len(grey, (width * height) as usize)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let g = grey[(y * width + x) as usize];
        Rgb([g, g, g])
    }))
}

/// Decode one Motion-JPEG buffer.
pub fn mjpg_to_rgb(data: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgb8())
}
