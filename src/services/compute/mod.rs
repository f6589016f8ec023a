//! Ephemeral compute units that run the transcoding worker.
//!
//! [`ComputePlatform`] is the thin seam over a container runtime;
//! [`launcher::Launcher`] drives one unit through its lifecycle and
//! [`reconcile::Reconciler`] reclaims units nobody is waiting on anymore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{ComputeJob, ComputeState};

pub mod azure;
pub mod docker;
pub mod launcher;
pub mod reconcile;

pub use azure::{AzureContainerInstances, AzureSettings};
pub use docker::DockerPlatform;
pub use launcher::{CompletedJob, LaunchFailure, Launcher, LauncherSettings};
pub use reconcile::{Reconciler, SweepReport};

/// Tag/label marking units created by this dispatcher.
pub const MANAGED_BY_KEY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "transcode-dispatch";
/// Tag/label holding the RFC 3339 creation time, read by the sweep.
pub const CREATED_AT_KEY: &str = "created-at";

/// What a status query found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// The platform has no unit by that name.
    Absent,
    Present {
        state: ComputeState,
        /// Reported by some platforms; informational only.
        exit_code: Option<i32>,
    },
}

/// A unit carrying this dispatcher's managed marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedUnit {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Request a unit for `job`. Returns once the platform has accepted the
    /// request, not when the unit finishes.
    async fn create(&self, job: &ComputeJob) -> Result<(), PlatformError>;

    async fn status(&self, name: &str) -> Result<UnitStatus, PlatformError>;

    /// Reclaim a unit. Deleting an absent unit succeeds.
    async fn delete(&self, name: &str) -> Result<(), PlatformError>;

    async fn list_managed(&self) -> Result<Vec<ManagedUnit>, PlatformError>;
}

/// Parse a creation-time tag, tolerating absence and junk.
pub fn parse_created_at(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Compute unit {0} failed to provision")]
    ProvisioningFailed(String),

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Failed to run container CLI: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected platform response: {0}")]
    Parse(String),
}
