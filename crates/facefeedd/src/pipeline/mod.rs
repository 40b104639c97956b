//! Per-viewer capture → analysis → stream pipeline.
//!
//! Each viewer gets its own capture and analysis threads joined by a raw
//! frame channel, and an output channel feeding the HTTP body. Frames move
//! between stages by value.

pub mod analysis;
pub mod capture;
pub mod channel;
pub mod stream;

use analysis::AnalysisStage;
use facefeed_core::{AnnotateSettings, Gallery, SharedEngine};
use facefeed_hw::{CameraError, Frame, FrameSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Opens a fresh frame source for each pipeline.
pub type SourceOpener = Arc<dyn Fn() -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: f32,
    pub skip_interval: u64,
    /// 0 = unbounded.
    pub raw_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub jpeg_quality: u8,
    pub annotate: AnnotateSettings,
}

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// A running pipeline. Dropping `guard` cancels both workers.
pub struct Pipeline {
    pub id: u64,
    pub output: mpsc::Receiver<Frame>,
    pub guard: DropGuard,
}

impl Pipeline {
    /// Start the capture and analysis threads.
    ///
    /// The source is opened and configured on the capture thread; if that
    /// fails, the output channel simply closes without producing a frame.
    /// Cancelling `parent` stops this pipeline too.
    pub fn spawn(
        settings: &PipelineSettings,
        opener: SourceOpener,
        engine: SharedEngine,
        gallery: Arc<Gallery>,
        parent: &CancellationToken,
    ) -> std::io::Result<Self> {
        let id = NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed);
        let cancel = parent.child_token();
        // Armed before the threads start so a failed spawn still cancels.
        let guard = cancel.clone().drop_guard();

        let (raw_tx, raw_rx) = channel::frame_channel(settings.raw_queue_capacity);
        let (out_tx, out_rx) = mpsc::channel(settings.output_queue_capacity.max(1));

        let capture_cancel = cancel.clone();
        let (width, height) = (settings.frame_width, settings.frame_height);
        let fps = settings.target_fps;
        thread::Builder::new()
            .name(format!("facefeed-capture-{id}"))
            .spawn(move || {
                let mut source = match opener() {
                    Ok(source) => source,
                    Err(e) => {
                        tracing::warn!(stream = id, error = %e, "failed to open frame source");
                        return;
                    }
                };
                match source.configure(width, height) {
                    Ok((w, h)) => {
                        tracing::info!(stream = id, width = w, height = h, "capture started")
                    }
                    Err(e) => {
                        tracing::warn!(stream = id, error = %e, "failed to configure frame source");
                        return;
                    }
                }
                let report = capture::run(source.as_mut(), &raw_tx, fps, &capture_cancel);
                tracing::info!(
                    stream = id,
                    frames = report.frames,
                    dropped = report.dropped,
                    "capture stopped"
                );
            })?;

        let stage = AnalysisStage::new(engine, gallery, settings.annotate, settings.skip_interval);
        let analysis_cancel = cancel;
        thread::Builder::new()
            .name(format!("facefeed-analysis-{id}"))
            .spawn(move || {
                let report = stage.run(raw_rx, out_tx, &analysis_cancel);
                tracing::info!(
                    stream = id,
                    frames = report.frames,
                    analyzed = report.analyzed,
                    failed = report.failed,
                    "analysis stopped"
                );
            })?;

        Ok(Self {
            id,
            output: out_rx,
            guard,
        })
    }
}
