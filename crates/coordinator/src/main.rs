use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;

use logrelay_common::config::CoordinatorConfig;
use logrelay_coordinator::{monitor, routes, QueueState};

#[tokio::main]
async fn main() {
    let config = CoordinatorConfig::from_env();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                config
                    .log_level
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            ),
        )
        .init();

    tracing::info!("LogRelay Coordinator starting");

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration — refusing to start");
        std::process::exit(1);
    }

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let state = Arc::new(QueueState::new(config.clone()));

    monitor::spawn_monitor(Arc::clone(&state));

    let prometheus_handler = move || {
        let handle = metrics_handle.clone();
        async move { handle.render() }
    };

    let app = routes::router(state).route("/prometheus", get(prometheus_handler));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = config.port, "LogRelay Coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("HTTP server error");

    tracing::info!("LogRelay Coordinator stopped");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
