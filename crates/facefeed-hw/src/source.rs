use crate::camera::CameraError;
use crate::frame::Frame;

/// A producer of frames at a fixed resolution.
///
/// `read_frame` blocks until the next frame is available. Any error ends the
/// capture session; `CameraError::EndOfStream` is the orderly case.
pub trait FrameSource: Send {
    /// Request a capture resolution. Returns the resolution actually negotiated.
    fn configure(&mut self, width: u32, height: u32) -> Result<(u32, u32), CameraError>;

    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn configure(&mut self, width: u32, height: u32) -> Result<(u32, u32), CameraError> {
        (**self).configure(width, height)
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).read_frame()
    }
}
