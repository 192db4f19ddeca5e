use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use super::agent::CliAgent;
use super::api::{self, AppState, SharedState};
use super::db::{BuilderDb, DbHandle};
use super::deploy::CliDeployer;
use super::events::ProgressBus;
use super::pipeline::BuildOrchestrator;
use super::session::SessionManager;
use super::workspace::WorkspaceManager;
use super::ws;
use crate::config::Config;

/// Configuration for the foundry server process.
pub struct ServerConfig {
    pub config: Config,
    pub dev_mode: bool,
}

/// Build the full application router: REST API plus the per-project
/// progress WebSocket.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws/builds/{id}", get(ws::ws_handler))
        .with_state(state)
}

/// Assemble the component graph. Every shared registry (bus, sessions,
/// workspaces) is constructed exactly once here and passed by reference —
/// no module-level globals.
pub fn build_state(config: &Config) -> Result<SharedState> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = DbHandle::new(
        BuilderDb::new(&config.db_path).context("Failed to initialize build database")?,
    );
    let workspaces = Arc::new(
        WorkspaceManager::new(config.workspace_root.clone())
            .context("Failed to initialize workspace root")?,
    );
    let bus = Arc::new(ProgressBus::new());
    let sessions = Arc::new(SessionManager::new());
    let agent = Arc::new(CliAgent::new(config.agent_cmd.clone(), Arc::clone(&bus)));
    let deployer = Arc::new(CliDeployer::new(config.deploy_cmd.clone()));

    let orchestrator = BuildOrchestrator::new(db, workspaces, bus, agent, deployer, sessions);
    Ok(Arc::new(AppState { orchestrator }))
}

/// Start the foundry server.
pub async fn start_server(server_config: ServerConfig) -> Result<()> {
    let state = build_state(&server_config.config)?;
    let mut app = build_router(state);

    if server_config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server_config.dev_mode {
        "0.0.0.0"
    } else {
        "127.0.0.1"
    };
    let addr = format!("{}:{}", host, server_config.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "foundry server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
