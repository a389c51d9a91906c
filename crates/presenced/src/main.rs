use std::sync::Arc;

use anyhow::{Context, Result};
use presence_core::{FfmpegBackend, MediaBackend};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;
mod pipeline;
mod staging;
#[cfg(test)]
mod testing;

use config::Config;
use pipeline::VerificationPipeline;
use staging::PermanentStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("presenced starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        listen = %config.listen_addr,
        storage_root = %config.storage_root.display(),
        model_dir = %config.model_dir.display(),
        liveness = config.liveness.enabled,
        require_audio = config.liveness.require_audio,
        bypass_when_unavailable = config.liveness.bypass_when_unavailable,
        allow_missing_video = config.liveness.allow_missing_video,
        "configuration loaded"
    );

    if config.verify_model_checksums {
        presence_models::verify_models_dir(&config.model_dir)
            .with_context(|| format!("model integrity check failed in {}", config.model_dir.display()))?;
        tracing::info!("model checksums verified");
    } else {
        tracing::warn!("model checksum verification disabled");
    }

    let models = engine::load_models(&config).context("failed to load models")?;
    let media: Arc<dyn MediaBackend> =
        Arc::new(FfmpegBackend::default().with_max_frame_pixels(config.liveness.max_frame_pixels));
    let engine = engine::spawn_engine(models, media, config.liveness.clone(), config.request_timeout())
        .context("failed to start inference engine")?;

    let store = PermanentStore::open(&config.storage_root)
        .with_context(|| format!("failed to open storage root {}", config.storage_root.display()))?;

    let listen_addr = config.listen_addr;
    let max_upload_bytes = config.max_upload_bytes;
    let pipeline = Arc::new(VerificationPipeline::new(Arc::new(config), engine, store));
    let app = http::router(pipeline, max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "presenced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("presenced shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
