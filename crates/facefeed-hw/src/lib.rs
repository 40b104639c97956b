//! Frame sources for the capture stage.
//!
//! Provides the RGB `Frame` type, the `FrameSource` trait, and a
//! V4L2-based camera implementation.

pub mod camera;
pub mod frame;
pub mod source;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::FrameSource;
