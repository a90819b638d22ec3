//! Screening pipeline server binary
//!
//! Run with: cargo run -p screening-pipeline --bin screening-pipeline-server

use std::sync::Arc;

use screening_pipeline::{server::ScreeningServer, Pipeline, PipelineConfig};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screening_pipeline=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = PipelineConfig::from_env()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - LLM model: {} at {}", config.llm.model, config.llm.base_url);
    tracing::info!("  - Data directory: {}", config.storage.data_dir.display());
    tracing::info!(
        "  - Batch size: {}, retry attempts: {}",
        config.queues.batch_size,
        config.retry.max_attempts
    );

    let pipeline = Arc::new(Pipeline::local(&config)?);

    if !pipeline.inference_healthy().await {
        tracing::warn!("Ollama not available at {}", config.llm.base_url);
        tracing::warn!("  Start it with `ollama serve` and pull {}", config.llm.model);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = pipeline.run(shutdown_rx.clone());

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let server = ScreeningServer::new(config.server.clone(), pipeline);
    tracing::info!("  API: http://{}/api", server.address());
    tracing::info!("  Health: http://{}/health", server.address());
    server.start(shutdown_rx).await?;

    for worker in workers {
        worker.await?;
    }
    tracing::info!("Stopped");
    Ok(())
}
