//! HTTP routes: viewer page, live MJPEG feed, status.

use crate::pipeline::stream::{self, CONTENT_TYPE};
use crate::pipeline::{Pipeline, PipelineSettings, SourceOpener};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use facefeed_core::{Gallery, SharedEngine};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    engine: SharedEngine,
    gallery: Arc<Gallery>,
    opener: SourceOpener,
    settings: PipelineSettings,
    active_streams: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        engine: SharedEngine,
        gallery: Arc<Gallery>,
        opener: SourceOpener,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            gallery,
            opener,
            settings,
            active_streams: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token ends every open stream.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/status", get(status))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Counts an open stream for as long as its response body lives.
struct ActiveStream {
    id: u64,
    counter: Arc<AtomicUsize>,
}

impl ActiveStream {
    fn new(id: u64, counter: Arc<AtomicUsize>) -> Self {
        let active = counter.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(stream = id, active, "stream opened");
        Self { id, counter }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        let active = self.counter.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::info!(stream = self.id, active, "stream closed");
    }
}

async fn video_feed(State(state): State<AppState>) -> Response {
    let pipeline = match Pipeline::spawn(
        &state.settings,
        Arc::clone(&state.opener),
        Arc::clone(&state.engine),
        Arc::clone(&state.gallery),
        &state.shutdown,
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "failed to start pipeline workers");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to start stream").into_response();
        }
    };

    let active = ActiveStream::new(pipeline.id, Arc::clone(&state.active_streams));
    let body = stream::mjpeg_body(
        pipeline.output,
        state.settings.jpeg_quality,
        (pipeline.guard, active),
    );

    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct StatusReport {
    version: &'static str,
    identities: Vec<String>,
    active_streams: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        identities: state.gallery.entries().iter().map(|e| e.name.clone()).collect(),
        active_streams: state.active_streams(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facefeed_core::engine::shared;
    use facefeed_core::testing::ScriptedEngine;
    use facefeed_core::{AnnotateSettings, Embedding, FaceRegion, GalleryEntry};
    use facefeed_hw::testing::SyntheticSource;
    use facefeed_hw::{CameraError, FrameSource};
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const PART_HEADER: &str = "--frame\r\nContent-Type: image/jpeg\r\n\r\n";

    fn settings() -> PipelineSettings {
        PipelineSettings {
            frame_width: 64,
            frame_height: 48,
            target_fps: 200.0,
            skip_interval: 2,
            raw_queue_capacity: 0,
            output_queue_capacity: 2,
            jpeg_quality: 80,
            annotate: AnnotateSettings::default(),
        }
    }

    fn state(opener: SourceOpener) -> AppState {
        let engine = ScriptedEngine::new().with_faces(vec![FaceRegion::new(2, 8, 8, 2)]);
        let gallery = Gallery::from_entries(vec![GalleryEntry {
            name: "Alice".into(),
            embedding: Embedding::new(vec![1.0, 0.0]),
        }]);
        AppState::new(shared(engine), Arc::new(gallery), opener, settings())
    }

    fn limited(frames: u64) -> SourceOpener {
        Arc::new(move || -> Result<Box<dyn FrameSource>, CameraError> {
            Ok(Box::new(SyntheticSource::new(64, 48).with_limit(frames)))
        })
    }

    async fn serve(state: AppState) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    async fn request(addr: std::net::SocketAddr, path: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        stream
    }

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = request(addr, path).await;
        let mut raw = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&raw).into_owned()
    }

    #[tokio::test]
    async fn test_index_embeds_video_feed() {
        let addr = serve(state(limited(0))).await;
        let response = get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"<img src="/video_feed""#));
    }

    #[tokio::test]
    async fn test_video_feed_streams_one_part_per_frame() {
        let addr = serve(state(limited(5))).await;
        let response = get(addr, "/video_feed").await;

        assert!(response.starts_with("HTTP/1.1 200"));
        let lower = response.to_ascii_lowercase();
        assert!(lower.contains("content-type: multipart/x-mixed-replace; boundary=frame"));
        assert!(lower.contains("cache-control: no-cache"));
        assert_eq!(response.matches(PART_HEADER).count(), 5);
    }

    #[tokio::test]
    async fn test_camera_open_failure_ends_stream_without_parts() {
        let opener: SourceOpener = Arc::new(|| -> Result<Box<dyn FrameSource>, CameraError> {
            Err(CameraError::DeviceBusy)
        });
        let addr = serve(state(opener)).await;
        let response = get(addr, "/video_feed").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert_eq!(response.matches(PART_HEADER).count(), 0);
    }

    #[tokio::test]
    async fn test_status_reports_identities() {
        let addr = serve(state(limited(0))).await;
        let response = get(addr, "/status").await;
        let body = response.split("\r\n\r\n").nth(1).unwrap_or_default();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["identities"], serde_json::json!(["Alice"]));
        assert_eq!(json["active_streams"], 0);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_disconnect_tears_down_workers() {
        let source = SyntheticSource::new(64, 48).with_latency(Duration::from_millis(5));
        let released: Arc<AtomicBool> = source.released();
        let slot = std::sync::Mutex::new(Some(source));
        let opener: SourceOpener = Arc::new(move || -> Result<Box<dyn FrameSource>, CameraError> {
            slot.lock()
                .ok()
                .and_then(|mut s| s.take())
                .map(|s| Box::new(s) as Box<dyn FrameSource>)
                .ok_or(CameraError::DeviceBusy)
        });
        let app = state(opener);
        let observer = app.clone();
        let addr = serve(app).await;

        let mut stream = request(addr, "/video_feed").await;
        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        assert_eq!(observer.active_streams(), 1);
        drop(stream);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !(released.load(Ordering::SeqCst) && observer.active_streams() == 0) {
            assert!(Instant::now() < deadline, "workers still running after disconnect");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_token_ends_open_streams() {
        let opener: SourceOpener = Arc::new(|| -> Result<Box<dyn FrameSource>, CameraError> {
            Ok(Box::new(SyntheticSource::new(64, 48)))
        });
        let app = state(opener);
        let shutdown = app.shutdown_token();
        let addr = serve(app).await;

        let mut stream = request(addr, "/video_feed").await;
        let mut first = vec![0u8; 1024];
        let _ = stream.read(&mut first).await.unwrap();
        shutdown.cancel();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut rest))
            .await
            .expect("stream did not end after shutdown")
            .unwrap();
    }
}
