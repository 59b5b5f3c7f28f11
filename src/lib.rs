//! confirmd -- single-run orchestrator for the reservation confirmation
//! automation worker.
//!
//! This crate provides the job executor (config materialization, worker
//! launch, supervision, termination, history) and the HTTP control surface
//! that drives it.

pub mod api;
pub mod config;
pub mod executor;
pub mod settings;

use anyhow::Result;

use crate::settings::Settings;

/// Start the confirmd daemon: executor plus API server.
pub async fn serve(bind: &str, settings: Settings) -> Result<()> {
    // 1. Initialize Executor
    let executor = executor::Executor::new(&settings)?;

    // 2. Start API Server
    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(api::state::AppState::new(executor, settings));

    tracing::info!(%addr, "confirmd listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
