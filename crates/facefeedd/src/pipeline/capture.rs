//! Capture stage: paced frame acquisition into the raw channel.

use super::channel::FrameSender;
use facefeed_hw::{CameraError, FrameSource};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames: u64,
    /// Pending frames evicted from the raw channel.
    pub dropped: u64,
}

/// Read frames until the source ends or `cancel` fires, pushing each to `tx`
/// and sleeping out the rest of each `1 / target_fps` interval.
pub fn run<S: FrameSource + ?Sized>(
    source: &mut S,
    tx: &FrameSender,
    target_fps: f32,
    cancel: &CancellationToken,
) -> CaptureReport {
    let mut report = CaptureReport::default();
    let interval = match Duration::try_from_secs_f32(1.0 / target_fps) {
        Ok(interval) => interval,
        Err(e) => {
            tracing::warn!(target_fps, error = %e, "invalid capture rate, not capturing");
            return report;
        }
    };

    while !cancel.is_cancelled() {
        let started = Instant::now();

        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(CameraError::EndOfStream) => {
                tracing::info!("frame source reached end of stream");
                break;
            }
            Err(e) => {
                tracing::info!(error = %e, "frame acquisition failed, stopping capture");
                break;
            }
        };
        report.frames += 1;

        if let Some(old) = tx.push(frame) {
            report.dropped += 1;
            tracing::debug!(sequence = old.sequence, "dropped stale pending frame");
        }

        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    report
}
