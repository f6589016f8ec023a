use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::{ComputePlatform, PlatformError, UnitStatus};
use crate::models::job::{ComputeJob, ComputeState, JobDescriptor};
use crate::services::telemetry;

#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Prefix of every unit name; the rest is a v4 UUID.
    pub name_prefix: String,
    pub poll_interval: Duration,
    /// Upper bound on the wait for a terminal state, measured from acceptance.
    pub max_wait: Duration,
}

/// A unit that reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub job_id: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    /// Whether the platform accepted the delete request afterwards.
    pub deleted: bool,
}

/// Why a unit did not reach a terminal state. All of these mean the record
/// failed; they are kept apart so logs and metrics can tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum LaunchFailure {
    #[error("Compute unit {job_id} could not be created: {source}")]
    Submission {
        job_id: String,
        #[source]
        source: PlatformError,
    },

    #[error("Status query for compute unit {job_id} failed: {source}")]
    StatusQuery {
        job_id: String,
        #[source]
        source: PlatformError,
    },

    #[error("Compute unit {job_id} disappeared before terminating (last seen {last_state})")]
    Disappeared {
        job_id: String,
        last_state: ComputeState,
    },

    #[error("Compute unit {job_id} did not terminate within {waited:?} (last seen {last_state})")]
    Timeout {
        job_id: String,
        waited: Duration,
        last_state: ComputeState,
    },
}

impl LaunchFailure {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            LaunchFailure::Submission { .. } => "submission",
            LaunchFailure::StatusQuery { .. } => "status_query",
            LaunchFailure::Disappeared { .. } => "disappeared",
            LaunchFailure::Timeout { .. } => "timeout",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            LaunchFailure::Submission { job_id, .. }
            | LaunchFailure::StatusQuery { job_id, .. }
            | LaunchFailure::Disappeared { job_id, .. }
            | LaunchFailure::Timeout { job_id, .. } => job_id,
        }
    }
}

/// Runs one compute unit per descriptor and waits for it to finish.
pub struct Launcher {
    platform: Arc<dyn ComputePlatform>,
    settings: LauncherSettings,
}

impl Launcher {
    pub fn new(platform: Arc<dyn ComputePlatform>, settings: LauncherSettings) -> Self {
        Self { platform, settings }
    }

    /// Create a unit for `descriptor`, poll it until it terminates, then
    /// delete it.
    ///
    /// Deletion is best effort: a failed delete is logged and the outcome
    /// stays a success. On timeout the unit is left running; the reconciliation
    /// sweep reclaims it.
    pub async fn submit_and_await(
        &self,
        descriptor: &JobDescriptor,
    ) -> Result<CompletedJob, LaunchFailure> {
        let mut job = ComputeJob::new(&self.settings.name_prefix, descriptor.clone());

        info!(
            job_id = %job.id,
            bucket = %descriptor.source_bucket,
            key = %descriptor.source_key,
            "Creating compute unit"
        );
        metrics::counter!(telemetry::JOBS_SUBMITTED).increment(1);

        if let Err(source) = self.platform.create(&job).await {
            job.advance(ComputeState::SubmissionFailed);
            return Err(self.fail(LaunchFailure::Submission {
                job_id: job.id,
                source,
            }));
        }

        let started = Instant::now();
        let deadline = started + self.settings.max_wait;

        let exit_code = loop {
            match self.platform.status(&job.id).await {
                Err(source) => {
                    return Err(self.fail(LaunchFailure::StatusQuery {
                        job_id: job.id,
                        source,
                    }));
                }
                Ok(UnitStatus::Absent) => {
                    return Err(self.fail(LaunchFailure::Disappeared {
                        job_id: job.id,
                        last_state: job.state,
                    }));
                }
                Ok(UnitStatus::Present { state, exit_code }) => {
                    if job.advance(state) {
                        info!(job_id = %job.id, state = %job.state, "Compute unit state changed");
                    }
                    if job.state == ComputeState::Terminated {
                        break exit_code;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.fail(LaunchFailure::Timeout {
                    job_id: job.id,
                    waited: now - started,
                    last_state: job.state,
                }));
            }
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        };

        let elapsed = started.elapsed();
        metrics::counter!(telemetry::JOBS_SUCCEEDED).increment(1);
        metrics::histogram!(telemetry::JOB_DURATION).record(elapsed.as_secs_f64());
        info!(
            job_id = %job.id,
            exit_code = ?exit_code,
            elapsed_secs = elapsed.as_secs(),
            "Compute unit completed"
        );

        let deleted = match self.platform.delete(&job.id).await {
            Ok(()) => {
                job.advance(ComputeState::Deleted);
                info!(job_id = %job.id, "Compute unit deleted");
                true
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to delete compute unit");
                false
            }
        };

        Ok(CompletedJob {
            job_id: job.id,
            exit_code,
            elapsed,
            deleted,
        })
    }

    fn fail(&self, failure: LaunchFailure) -> LaunchFailure {
        warn!(
            job_id = %failure.job_id(),
            reason = failure.reason(),
            error = %failure,
            "Compute unit failed"
        );
        metrics::counter!(telemetry::JOBS_FAILED, "reason" => failure.reason()).increment(1);
        failure
    }
}
