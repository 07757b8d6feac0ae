//! Caries Scoring Service - Main Entry Point
//!
//! Resolves the configured model from the registry, then serves
//! `POST /predict` over HTTP until Ctrl-C.

use anyhow::{Context, Result};
use caries_scoring::{
    config::{AppConfig, LoggingConfig},
    metrics::MetricsReporter,
    models::{self, ScoredModel},
    schema::CARIES_SCHEMA,
    server::{router, AppState},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "caries_scoring={level},caries_server={level},tower_http={level}",
            level = logging.level
        ))
    })?;

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Caries Scoring Service");
    info!(
        schema = CARIES_SCHEMA.version,
        features = CARIES_SCHEMA.width(),
        backend = ?config.model.backend,
        "Configuration loaded successfully"
    );

    let registry = models::from_config(&config.model);
    let model = ScoredModel::new(&config.model.name, &config.model.alias, registry.as_ref())
        .context("Model could not be resolved, refusing to start")?;

    let state = AppState::new(model);
    let metrics = state.metrics.clone();

    if config.metrics.report_interval_secs > 0 {
        let reporter =
            MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(address = %addr, "Listening for prediction requests");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
