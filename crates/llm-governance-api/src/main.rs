//! LLM Governance API Server

use anyhow::Context;
use llm_governance_api::{create_router, AppState, ServiceSettings};
use llm_governance_core::{compile_rules, AuditStore, Governor};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = ServiceSettings::load().context("failed to load settings")?;

    let policies = compile_rules(&settings.rules).context("invalid rule in settings")?;

    let store = if settings.audit_db_path == ":memory:" {
        AuditStore::open_in_memory()
    } else {
        AuditStore::open(&settings.audit_db_path)
    }
    .with_context(|| format!("failed to open audit database {}", settings.audit_db_path))?;

    // Refuses to start on a configuration the consent validator rejects.
    let governor = Governor::builder()
        .config(settings.enforcement.clone())
        .policies(policies)
        .evaluation_timeout(settings.evaluation_timeout())
        .audit_store(Arc::new(store))
        .build()
        .context("enforcement configuration rejected")?;
    let governor = Arc::new(governor);

    let mut state = AppState::new(Arc::clone(&governor));
    match settings.operator_secret.as_deref() {
        Some(secret) => state = state.with_operator_secret(secret, settings.operator_token_ttl_seconds),
        None => tracing::warn!("no operator secret configured; admin and audit routes are disabled"),
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_address))?;

    info!(address = %settings.bind_address, audit_db = %settings.audit_db_path, "governance API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = governor.audit().flush().await?;
    info!(
        written = report.written,
        pending = report.pending,
        dropped = report.dropped,
        "audit trail flushed, shutdown complete"
    );

    Ok(())
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, starting graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
