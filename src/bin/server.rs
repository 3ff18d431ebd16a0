use anyhow::Context;
use axum::Router;
use chunkshare::api::create_api_server;
use chunkshare::config::ServerConfig;
use chunkshare::events::EventHub;
use chunkshare::metrics::{install_recorder, metrics_route};
use chunkshare::session::UploadManager;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chunkshare-server", about = "Chunked, resumable file upload server")]
struct Args {
    /// JSON configuration file; missing fields use defaults.
    #[arg(short, long, env = "CHUNKSHARE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref()).context("loading configuration")?;

    install_recorder().context("installing metrics recorder")?;

    let manager = Arc::new(
        UploadManager::from_config(&config, EventHub::default())
            .await
            .context("initializing upload manager")?,
    );

    let shutdown = CancellationToken::new();
    let cleanup = manager
        .clone()
        .spawn_cleanup(config.storage.cleanup_interval(), shutdown.clone());

    let app = Router::new()
        .route("/metrics", metrics_route())
        .merge(create_api_server(manager));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(
        addr = %config.bind_addr,
        root = %config.storage.root.display(),
        directories = config.directories.len(),
        "Upload server listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    cleanup.await.context("joining cleanup task")?;
    Ok(())
}
