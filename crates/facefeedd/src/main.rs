use anyhow::{Context, Result};
use facefeed_core::engine::shared;
use facefeed_core::{Gallery, OnnxEngine};
use facefeed_hw::{Camera, CameraError, FrameSource};
use facefeedd::config::{self, Config};
use facefeedd::pipeline::SourceOpener;
use facefeedd::server::{self, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facefeedd starting");

    let config_path = config::config_path_from_env();
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let mut engine = OnnxEngine::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.similarity_threshold,
    )
    .context("failed to load recognition models")?;

    // An identity that cannot be enrolled is fatal: never serve a partial gallery.
    let gallery = Gallery::enroll(&config.identities, &mut engine, config.multi_face_policy)
        .context("failed to enroll known identities")?;
    tracing::info!(identities = gallery.len(), "gallery ready");

    let device = config.camera_device;
    let opener: SourceOpener = Arc::new(move || -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(Camera::open(device)?))
    });

    let state = AppState::new(
        shared(engine),
        Arc::new(gallery),
        opener,
        config.pipeline_settings(),
    );
    let shutdown = state.shutdown_token();

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, device, "facefeedd ready");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("facefeedd shutting down");
            // Open streams never end on their own; stop their workers so
            // graceful shutdown can complete.
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
