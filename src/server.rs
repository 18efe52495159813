use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::FolioConfig;
use crate::reset::api::{self, AppState, SharedState};
use crate::reset::db::{DbHandle, ResetDb};
use crate::reset::gate::AdminGate;
use crate::reset::orchestrator::ResetOrchestrator;
use crate::reset::strategy::build_strategy;

pub fn build_router(state: SharedState, cors_permissive: bool) -> Router {
    let mut app = api::reset_router(state)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());
    if cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

async fn health_check() -> &'static str {
    "ok"
}

/// Wire the reset subsystem to an opened database.
///
/// Startup recovery only fails jobs whose lease has run out, so a job another
/// process is running on the same database is left alone.
pub async fn build_state(config: &FolioConfig, db: ResetDb) -> Result<SharedState> {
    let strategy = build_strategy(config.reset.strategy, &config.reset.collections)
        .context("Failed to build clearing strategy")?;
    let db = DbHandle::new(db.with_lease_ttl(config.reset.lease_ttl()));
    let orchestrator = ResetOrchestrator::new(db, strategy)
        .with_stream_timeout(config.reset.stream_timeout())
        .with_abandoned_recovery(config.reset.recover_abandoned);

    if config.reset.recover_abandoned {
        // A busy database here is not fatal: `start` retries the same sweep.
        match orchestrator.recover_abandoned_jobs().await {
            Ok(recovered) if !recovered.is_empty() => {
                tracing::warn!(count = recovered.len(), "recovered abandoned reset jobs");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "skipped abandoned reset job recovery"),
        }
    }

    if config.reset.enabled && config.reset.admin_token.as_deref().is_none_or(str::is_empty) {
        tracing::warn!("reset is enabled but no admin token is configured; every reset request will be rejected");
    }

    Ok(Arc::new(AppState {
        gate: AdminGate::new(
            config.reset.admin_token.as_deref(),
            config.reset.rate_limit_period(),
        )
        .trust_forwarded_headers(config.server.trust_forwarded_headers),
        orchestrator,
        reset_enabled: config.reset.enabled,
    }))
}

pub async fn start_server(config: FolioConfig) -> Result<()> {
    if let Some(parent) = config.database.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = ResetDb::new(&config.database.path).context("Failed to initialize folio database")?;
    let state = build_state(&config, db).await?;
    let app = build_router(Arc::clone(&state), config.server.cors_permissive);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        reset_enabled = config.reset.enabled,
        strategy = state.orchestrator.strategy_name(),
        database = %config.database.path.display(),
        "folio listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // Running jobs are never cancelled; let them reach a terminal state.
    state.orchestrator.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
