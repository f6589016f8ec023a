//! One reconciliation pass: delete managed compute units older than
//! `SWEEP_MAX_AGE_SECS`, print what was removed, exit.

use tracing_subscriber::EnvFilter;

use transcode_dispatch::{
    app_state::build_platform, config::AppConfig, services::compute::Reconciler,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let platform = build_platform(&config).expect("Failed to initialize compute platform");
    let reconciler = Reconciler::new(platform, config.sweep_max_age(), config.sweep_interval());

    match reconciler.sweep_once().await {
        Ok(report) => {
            tracing::info!(
                examined = report.examined,
                deleted = ?report.deleted,
                failed = ?report.failed,
                "Reconciliation pass finished"
            );
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Reconciliation pass failed");
            std::process::exit(1);
        }
    }
}
