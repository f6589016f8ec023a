use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::event::UploadRecord;

pub const ENV_SOURCE_BUCKET: &str = "SOURCE_BUCKET";
pub const ENV_SOURCE_KEY: &str = "SOURCE_KEY";
pub const ENV_OUTPUT_BUCKET: &str = "OUTPUT_BUCKET";

/// Everything a transcoding worker needs to know about its input and output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub source_bucket: String,
    pub source_key: String,
    pub output_bucket: String,
}

impl JobDescriptor {
    pub fn for_record(record: &UploadRecord, output_bucket: &str) -> Self {
        Self {
            source_bucket: record.bucket.clone(),
            source_key: record.key.clone(),
            output_bucket: output_bucket.to_string(),
        }
    }

    /// Environment handed to the worker container. These three variables are
    /// the only job-specific configuration it receives.
    pub fn environment(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_SOURCE_BUCKET, self.source_bucket.clone()),
            (ENV_SOURCE_KEY, self.source_key.clone()),
            (ENV_OUTPUT_BUCKET, self.output_bucket.clone()),
        ]
    }
}

/// Lifecycle of a compute unit as tracked by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComputeState {
    Submitting,
    Running,
    Terminated,
    Deleted,
    SubmissionFailed,
}

impl ComputeState {
    /// Forward-only transitions. Re-observing the current state is not a
    /// transition.
    pub fn can_transition_to(self, next: ComputeState) -> bool {
        use ComputeState::*;
        matches!(
            (self, next),
            (Submitting, Running)
                | (Submitting, Terminated)
                | (Submitting, SubmissionFailed)
                | (Running, Terminated)
                | (Terminated, Deleted)
        )
    }
}

/// One dispatch of a descriptor onto the compute platform.
#[derive(Debug, Clone, Serialize)]
pub struct ComputeJob {
    pub id: String,
    pub descriptor: JobDescriptor,
    pub state: ComputeState,
    pub submitted_at: DateTime<Utc>,
}

impl ComputeJob {
    /// Create a job with a fresh identifier. Identifiers are never reused,
    /// including when the same record is redelivered.
    pub fn new(name_prefix: &str, descriptor: JobDescriptor) -> Self {
        Self {
            id: format!("{}-{}", name_prefix, Uuid::new_v4()),
            descriptor,
            state: ComputeState::Submitting,
            submitted_at: Utc::now(),
        }
    }

    /// Apply an observed state. Returns false when the observation does not
    /// move the job forward.
    pub fn advance(&mut self, observed: ComputeState) -> bool {
        if self.state.can_transition_to(observed) {
            self.state = observed;
            true
        } else {
            false
        }
    }
}
