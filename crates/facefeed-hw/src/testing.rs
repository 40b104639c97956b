//! Synthetic frame sources for tests.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::source::FrameSource;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A bright square painted into every synthetic frame.
#[derive(Debug, Clone, Copy)]
pub struct Spot {
    pub x: u32,
    pub y: u32,
    pub size: u32,
    pub color: [u8; 3],
}

/// Produces `limit` frames (or forever), then reports end of stream.
///
/// Pixel (0, 0) carries the low byte of the sequence number in its red
/// channel so tests can check ordering after the frame went through a
/// pipeline.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    limit: Option<u64>,
    latency: Duration,
    spots: Vec<Spot>,
    sequence: u64,
    produced: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            limit: None,
            latency: Duration::ZERO,
            spots: Vec::new(),
            sequence: 0,
            produced: Arc::new(AtomicU64::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Block each `read_frame` for `latency`, as a camera does between frames.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_spot(mut self, spot: Spot) -> Self {
        self.spots.push(spot);
        self
    }

    /// Frames handed out so far, shared with the test.
    pub fn produced(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.produced)
    }

    /// Set once the source has been dropped.
    pub fn released(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    fn render(&self) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([40, 40, 40]));
        for spot in &self.spots {
            for y in spot.y..(spot.y + spot.size).min(self.height) {
                for x in spot.x..(spot.x + spot.size).min(self.width) {
                    image.put_pixel(x, y, Rgb(spot.color));
                }
            }
        }
        if self.width > 0 && self.height > 0 {
            image.put_pixel(0, 0, Rgb([(self.sequence & 0xff) as u8, 0, 0]));
        }
        image
    }
}

/// Sequence tag written by `SyntheticSource` into pixel (0, 0).
pub fn sequence_tag(image: &RgbImage) -> u8 {
    image.get_pixel(0, 0)[0]
}

impl FrameSource for SyntheticSource {
    fn configure(&mut self, width: u32, height: u32) -> Result<(u32, u32), CameraError> {
        self.width = width;
        self.height = height;
        Ok((width, height))
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(CameraError::EndOfStream);
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let frame = Frame::new(self.render(), self.sequence);
        self.sequence += 1;
        self.produced.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// A source whose every read fails.
pub struct FailingSource;

impl FrameSource for FailingSource {
    fn configure(&mut self, width: u32, height: u32) -> Result<(u32, u32), CameraError> {
        Ok((width, height))
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        Err(CameraError::CaptureFailed("synthetic failure".into()))
    }
}
