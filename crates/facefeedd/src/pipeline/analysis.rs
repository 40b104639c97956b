//! Analysis stage: sampled face annotation between the raw and output channels.

use super::channel::FrameReceiver;
use facefeed_core::{AnnotateSettings, EngineError, Gallery, SharedEngine};
use facefeed_hw::Frame;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub frames: u64,
    pub analyzed: u64,
    pub failed: u64,
}

pub struct AnalysisStage {
    engine: SharedEngine,
    gallery: Arc<Gallery>,
    settings: AnnotateSettings,
    skip_interval: u64,
}

impl AnalysisStage {
    pub fn new(
        engine: SharedEngine,
        gallery: Arc<Gallery>,
        settings: AnnotateSettings,
        skip_interval: u64,
    ) -> Self {
        Self {
            engine,
            gallery,
            settings,
            skip_interval: skip_interval.max(1),
        }
    }

    /// Frames 0, k, 2k, ... are analyzed.
    pub fn should_analyze(&self, counter: u64) -> bool {
        counter % self.skip_interval == 0
    }

    /// Annotate one frame in place. Returns the number of faces drawn.
    /// On error the frame is left as captured.
    pub fn process(&self, frame: &mut Frame) -> Result<usize, EngineError> {
        let mut engine = self.engine.lock().map_err(|_| EngineError::Poisoned)?;
        let annotations =
            facefeed_core::annotate(&mut *engine, &self.gallery, &mut frame.image, &self.settings)?;
        Ok(annotations.len())
    }

    /// Forward every frame from `rx` to `tx`, annotating the sampled ones.
    ///
    /// Returns when the raw channel is drained and closed, when `cancel`
    /// fires, or when the output side goes away (which also cancels).
    pub fn run(
        &self,
        rx: FrameReceiver,
        tx: mpsc::Sender<Frame>,
        cancel: &CancellationToken,
    ) -> AnalysisReport {
        let mut report = AnalysisReport::default();
        let mut counter = 0u64;

        while let Some(mut frame) = rx.recv(cancel) {
            if self.should_analyze(counter) {
                report.analyzed += 1;
                match self.process(&mut frame) {
                    Ok(faces) => {
                        tracing::trace!(sequence = frame.sequence, faces, "frame annotated")
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(
                            sequence = frame.sequence,
                            error = %e,
                            "analysis failed, forwarding frame unannotated"
                        );
                    }
                }
            } else {
                tracing::trace!(sequence = frame.sequence, "frame skipped");
            }
            counter += 1;
            report.frames += 1;

            if tx.blocking_send(frame).is_err() {
                tracing::debug!("output channel closed");
                cancel.cancel();
                break;
            }
        }

        report
    }
}
