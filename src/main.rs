use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use transcode_dispatch::{app_state::AppState, config::AppConfig, routes, services::telemetry};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        queue_backend = %config.queue_backend,
        compute_backend = %config.compute_backend,
        "Initializing transcode dispatcher"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    telemetry::describe_metrics();

    // Queue, blob store and compute platform clients; exits if a backend is unreachable
    let state = AppState::from_config(&config)
        .await
        .expect("Failed to initialize backends");

    if config.sweep_max_age() <= config.max_wait() {
        tracing::warn!(
            sweep_max_age_secs = config.sweep_max_age_secs,
            max_wait_secs = config.max_wait_secs,
            "Sweep max age does not exceed the poll bound; units still being awaited may be reclaimed"
        );
    }

    // Reclaim compute units abandoned after a poll timeout
    let reconciler = state.reconciler(&config);
    tokio::spawn(async move { reconciler.run().await });

    // Health and metrics endpoints
    let app = routes::router(state.clone(), prometheus_handle);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!("Operator endpoints listening on {}", config.bind_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Operator HTTP server stopped");
        }
    });

    state.dispatcher(&config).run().await;
}
