mod compiler;
mod config;
mod core;
mod engine;
mod http;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::compiler::LatexCompiler;
use crate::config::Config;
use crate::http::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("texd=info".parse()?),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let limits = &config.compiler;
    info!(
        "Compiler: {} passes={} timeout={:?} memory_limit={}B sample_interval={:?}",
        limits.program,
        limits.passes,
        limits.timeout,
        limits.memory_limit_bytes,
        limits.sample_interval
    );
    info!(
        "Limits: max_input={}B max_artifact={}B",
        config.server.max_input_bytes, limits.max_artifact_bytes
    );

    if let Err(e) = which::which(&limits.program) {
        warn!(
            "Compiler {} not found ({}); every request will fail until it is installed",
            limits.program, e
        );
    }

    let bind = config.server.bind.clone();
    let compiler = LatexCompiler::new(config.compiler.clone());
    let router = create_router(AppState::new(config, compiler));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on {}", bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
