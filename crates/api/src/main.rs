use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;

use scanqueue_api::app::{build_app, services};
use scanqueue_api::shutdown::install_shutdown_handler;
use scanqueue_infra::Settings;

/// Scan job API: submission, status, artifacts and the live event stream.
#[derive(Debug, Parser)]
#[command(name = "scanqueue-api", version)]
struct Cli {
    /// Address the HTTP server binds to
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scanqueue_observability::init();
    let cli = Cli::parse();

    let shutdown = install_shutdown_handler().context("failed to install signal handlers")?;
    let runtime = services::start(&cli.settings).await?;
    let registry = runtime.services.registry.clone();
    let app = build_app(runtime.services.clone());

    let listener = tokio::net::TcpListener::bind(cli.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Event streams never finish on their own.
            let closed = registry.shutdown_all();
            tracing::info!(observers = closed, "closed live event streams");
        })
        .await
        .context("server error")?;

    runtime.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}
