//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use crate::source::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame conversion failed: {0}")]
    Conversion(#[from] FrameError),
    #[error("end of stream")]
    EndOfStream,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    fn fourcc(self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::new(b"YUYV"),
            Self::Mjpg => FourCC::new(b"MJPG"),
            Self::Grey => FourCC::new(b"GREY"),
        }
    }
}

/// V4L2 camera device handle.
///
/// The mmap stream is created on the first `read_frame` after a
/// (re)configuration and lives until the camera is dropped, which releases
/// the device.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    sequence: u64,
}

impl Camera {
    /// Open `/dev/video{index}`.
    pub fn open(index: usize) -> Result<Self, CameraError> {
        Self::open_path(&format!("/dev/video{index}"))
    }

    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open_path(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(fmt.fourcc).unwrap_or(PixelFormat::Yuyv);

        Ok(Self {
            stream: None,
            device,
            width: fmt.width,
            height: fmt.height,
            device_path: device_path.to_string(),
            pixel_format,
            sequence: 0,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Request `width`×`height`, preferring YUYV and falling back to MJPG.
    /// GREY is accepted if the driver insists on it.
    fn negotiate(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
        // The driver refuses S_FMT while buffers are mapped.
        self.stream = None;

        let mut last = None;
        for wanted in [PixelFormat::Yuyv, PixelFormat::Mjpg] {
            let mut fmt = self.device.format().map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
            fmt.fourcc = wanted.fourcc();
            fmt.width = width;
            fmt.height = height;

            let negotiated = self.device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;

            match PixelFormat::from_fourcc(negotiated.fourcc) {
                Some(pixel_format) => {
                    self.pixel_format = pixel_format;
                    self.width = negotiated.width;
                    self.height = negotiated.height;
                    tracing::info!(
                        width = negotiated.width,
                        height = negotiated.height,
                        fourcc = ?negotiated.fourcc,
                        "negotiated format"
                    );
                    return Ok(());
                }
                None => last = Some(negotiated.fourcc),
            }
        }

        Err(CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {last:?} (need YUYV, MJPG, or GREY)"
        )))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for index in 0..16 {
            let path = format!("/dev/video{index}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                index,
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn configure(&mut self, width: u32, height: u32) -> Result<(u32, u32), CameraError> {
        self.negotiate(width, height)?;
        Ok((self.width, self.height))
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream =
                MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                    .map_err(|e| {
                        CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                    })?;
            self.stream = Some(stream);
        }
        let (format, width, height) = (self.pixel_format, self.width, self.height);
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream unavailable".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        let image = convert(format, data, width, height)?;
        let frame = Frame::new(image, self.sequence);
        self.sequence += 1;
        Ok(frame)
    }
}

fn convert(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<image::RgbImage, CameraError> {
    let image = match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)?,
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)?,
        PixelFormat::Mjpg => frame::mjpg_to_rgb(buf)?,
    };
    Ok(image)
}
