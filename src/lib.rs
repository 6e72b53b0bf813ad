//! TestPilot -- staged website test runs with live progress and reports.
//!
//! This crate provides the run orchestration engine, pluggable check
//! strategies, the run store, and the HTTP API that presents runs to a UI.

pub mod api;
pub mod category;
pub mod config;
pub mod engine;
pub mod executor;
pub mod model;
pub mod observer;
pub mod projects;
pub mod script;
pub mod storage;
pub mod target;

use anyhow::{Context, Result};
use config::{Config, LogFormat, StrategyKind};
use engine::Pacing;
use executor::{CaseExecutor, CheckStrategy, DriverStrategy, HttpDriver, SimulatedStrategy};
use std::sync::Arc;
use std::time::Duration;

/// Initialize the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(cfg: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cfg.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Build the case executor selected by configuration.
pub fn build_executor(cfg: &config::ExecutionConfig) -> Result<CaseExecutor> {
    let strategy: Arc<dyn CheckStrategy> = match cfg.strategy {
        StrategyKind::Simulated => Arc::new(SimulatedStrategy::from_config(cfg)),
        StrategyKind::Http => {
            let timeout = cfg.case_timeout().unwrap_or(Duration::from_secs(30));
            Arc::new(DriverStrategy::new(
                HttpDriver::new(timeout).context("Failed to build HTTP client")?,
            ))
        }
    };
    Ok(CaseExecutor::new(strategy).with_timeout(cfg.case_timeout()))
}

pub fn pacing(cfg: &config::ExecutionConfig) -> Pacing {
    Pacing {
        generate: cfg.generate_delay(),
        settle: cfg.settle_delay(),
    }
}

/// Start the TestPilot API server.
pub async fn serve(config: &Config) -> Result<()> {
    // 1. Initialize Storage
    let store = storage::open(&config.storage)?;

    // 2. Wire engine and API state
    let executor = build_executor(&config.execution)?;
    let state = api::state::AppState::new(store.clone(), executor, pacing(&config.execution));
    let app = api::router(state);

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;
    tracing::info!(%addr, "TestPilot listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    store.close().await?;
    Ok(())
}
