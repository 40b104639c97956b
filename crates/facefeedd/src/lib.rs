//! Live face-annotated MJPEG streaming daemon.
//!
//! Each `/video_feed` viewer gets a dedicated capture → analysis pipeline;
//! the known-identity gallery and recognition engine are shared.

pub mod config;
pub mod pipeline;
pub mod server;
