//! Market Price Oracle - Entry Point
//!
//! Initializes configuration, logging and every pricing task. Runs until
//! SIGINT or until the aggregator stops on a stalled market service.
//!
//! Wiring sequence:
//! 1. Load config (first CLI argument, default `config.toml`) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create the shared cancellation token and metrics registry
//! 4. Spawn health/metrics server (/live, /ready, /metrics)
//! 5. Start sources, market services and the aggregator
//! 6. Wait for SIGINT or aggregator failure, then cancel and drain

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use market_price_oracle::adapters::feeds::SourceRegistry;
use market_price_oracle::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use market_price_oracle::adapters::sinks::{LoggingPriceSink, MeteredSink};
use market_price_oracle::config::loader::load_config;
use market_price_oracle::ports::PriceSink;
use market_price_oracle::usecases::PricingService;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "Oracle stopped with error");
            eprintln!("market-price-oracle: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.oracle.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.oracle.name,
        version = env!("CARGO_PKG_VERSION"),
        markets = config.markets.len(),
        config = %config_path,
        "Starting market price oracle"
    );

    // ── 3. Shared cancellation and metrics ──────────────────
    let cancel = CancellationToken::new();
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);
    let health = Arc::new(HealthState::new());

    // ── 4. Health/metrics server ────────────────────────────
    let health_handle = if config.metrics.enabled {
        let server = HealthServer::new(
            Arc::clone(&health),
            Arc::clone(&metrics),
            config.metrics.bind_address.clone(),
        );
        let server_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(server_cancel).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        None
    };

    // ── 5. Sources, market services and aggregator ──────────
    let registry = SourceRegistry::new(Arc::clone(&metrics));
    let sink: Arc<dyn PriceSink> = Arc::new(MeteredSink::new(
        LoggingPriceSink::default(),
        Arc::clone(&metrics),
    ));
    let pricing = PricingService::start(&config, &registry, sink, metrics, &cancel)
        .context("Failed to start pricing")?;

    health.set_ready(true);
    info!(markets = ?pricing.markets(), "All tasks spawned, oracle is running");

    // ── 6. Wait for SIGINT or a fatal aggregator stop ───────
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for SIGINT");
            }
            info!("SIGINT received, initiating graceful shutdown");
        }
        () = cancel.cancelled() => {
            warn!("Pricing cancelled internally");
        }
    }

    health.set_ready(false);
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(30), pricing.wait())
        .await
        .context("Timed out waiting for pricing tasks")?;

    if let Some(handle) = health_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    outcome?;
    info!("Shutdown complete");
    Ok(())
}
