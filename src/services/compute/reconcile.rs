use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::{ComputePlatform, PlatformError};
use crate::services::telemetry;

/// Result of one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Periodically deletes managed compute units older than a bound.
///
/// The launcher never cancels a unit it stopped waiting for, so anything
/// that outlives the poll bound is abandoned and is reclaimed here.
pub struct Reconciler {
    platform: Arc<dyn ComputePlatform>,
    max_age: Duration,
    interval: Duration,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn ComputePlatform>, max_age: Duration, interval: Duration) -> Self {
        Self {
            platform,
            max_age,
            interval,
        }
    }

    /// Run forever; spawn this as a background task.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Starting compute unit sweep"
        );
        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Compute unit sweep failed");
            }
        }
    }

    /// List managed units and delete the ones past `max_age`. Units without
    /// a readable creation time are left alone.
    pub async fn sweep_once(&self) -> Result<SweepReport, PlatformError> {
        let units = self.platform.list_managed().await?;
        let now = Utc::now();
        let mut report = SweepReport {
            examined: units.len(),
            ..Default::default()
        };

        for unit in units {
            let Some(created_at) = unit.created_at else {
                debug!(unit = %unit.name, "Skipping unit without creation time");
                continue;
            };
            // A creation time in the future fails to_std and counts as young.
            let old = (now - created_at)
                .to_std()
                .map(|age| age > self.max_age)
                .unwrap_or(false);
            if !old {
                continue;
            }

            match self.platform.delete(&unit.name).await {
                Ok(()) => {
                    warn!(
                        unit = %unit.name,
                        created_at = %created_at,
                        "Deleted abandoned compute unit"
                    );
                    metrics::counter!(telemetry::SWEEP_DELETED).increment(1);
                    report.deleted.push(unit.name);
                }
                Err(e) => {
                    error!(
                        unit = %unit.name,
                        error = %e,
                        "Failed to delete abandoned compute unit"
                    );
                    report.failed.push(unit.name);
                }
            }
        }

        if !report.deleted.is_empty() || !report.failed.is_empty() {
            info!(
                examined = report.examined,
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Compute unit sweep complete"
            );
        }
        Ok(report)
    }
}
