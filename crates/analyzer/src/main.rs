use std::path::PathBuf;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;

use logrelay_analyzer::autoscaler::spawn_autoscaler;
use logrelay_analyzer::{AnalyzerPool, CoordinatorClient};
use logrelay_common::config::{self, AnalyzerConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("LogRelay Analyzer pool starting");

    // Load configuration — fail loudly on misconfiguration.
    let mut analyzer_config = match std::env::var("ANALYZER_CONFIG").map(PathBuf::from) {
        Ok(path) => match config::load_analyzer_config(&path) {
            Ok(loaded) => {
                tracing::info!(path = %path.display(), "Configuration loaded");
                loaded
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration — refusing to start");
                std::process::exit(1);
            }
        },
        Err(_) => AnalyzerConfig::default(),
    };

    if let Ok(url) = std::env::var("COORDINATOR_URL") {
        analyzer_config.runtime.coordinator_url = url;
    }

    if let Err(e) = config::validate_analyzer(&analyzer_config) {
        tracing::error!(error = %e, "Invalid configuration — refusing to start");
        std::process::exit(1);
    }

    // Prometheus exporter on its own port; the analyzer has no API server.
    let metrics_port: u16 = std::env::var("ANALYZER_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9100);
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to install Prometheus metrics exporter");

    let client = match CoordinatorClient::new(&analyzer_config.runtime.coordinator_url) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build coordinator client");
            std::process::exit(1);
        }
    };

    if let Err(e) = client.health().await {
        tracing::warn!(error = %e, "Coordinator not reachable yet, analyzers will retry");
    }

    let pool = Arc::new(AnalyzerPool::new(
        Arc::clone(&client),
        analyzer_config.runtime.clone(),
        analyzer_config.autoscaler.clone(),
    ));
    pool.start(&analyzer_config.pool).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let autoscaler = spawn_autoscaler(Arc::clone(&pool), shutdown_rx);

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = autoscaler.await;
    pool.stop().await;

    let stats = pool.stats().await;
    tracing::info!(
        processed = stats.processed,
        failed = stats.failed,
        scale_ups = stats.scale_ups,
        scale_downs = stats.scale_downs,
        "LogRelay Analyzer pool stopped"
    );
}
