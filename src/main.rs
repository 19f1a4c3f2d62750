use std::net::SocketAddr;

use dotenvy::dotenv;
use tracing::info;

use roster::bootstrap::app::compose;
use roster::bootstrap::config::Config;
use roster::infrastructure::db::SqlxConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "roster=debug,axum=info,tower_http=info".into()),
        )
        .init();

    let cfg = Config::from_env()?;
    info!(?cfg, "Starting roster");

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let app = compose(cfg, &SqlxConnector).await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "Failed to listen for shutdown signal");
    }
}
