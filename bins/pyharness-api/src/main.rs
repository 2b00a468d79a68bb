mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use pyharness_common::config::SandboxConfig;
use pyharness_engine::Sandbox;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

pub struct AppState {
    pub sandbox: Arc<dyn Sandbox>,
    pub timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("pyharness API booting...");

    let config = SandboxConfig::load_default().context("Failed to load sandbox configuration")?;

    info!(
        backend = ?config.backend,
        image = %config.image,
        timeout_ms = config.timeout_ms,
        memory_mb = config.memory_limit_mb,
        "Sandbox configured"
    );

    let sandbox = pyharness_engine::connect(&config).context("Failed to initialize sandbox")?;

    let state = Arc::new(AppState {
        sandbox,
        timeout: config.timeout(),
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            warn!("Received shutdown signal, finishing in-flight requests...");
        })
        .await
        .context("Server error")?;

    info!("API shutdown complete");
    Ok(())
}
