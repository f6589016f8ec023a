use serde::Deserialize;
use std::time::Duration;
use strum::{Display, EnumString};

/// Which queue implementation the dispatcher consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueueBackend {
    Sqs,
    Redis,
}

/// Which platform runs the transcoding containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComputeBackend {
    Azure,
    Docker,
}

/// What to do with the remaining records of a message after one fails.
///
/// Either way the message is not acknowledged; this only controls whether
/// the rest of the batch is still attempted in the same delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordFailurePolicy {
    Continue,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Operator HTTP surface (health and metrics).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // Queue
    #[serde(default = "default_queue_backend")]
    pub queue_backend: QueueBackend,

    /// SQS queue URL (sqs backend)
    pub sqs_queue_url: Option<String>,

    /// Redis connection string (redis backend)
    pub redis_url: Option<String>,

    #[serde(default = "default_redis_queue_name")]
    pub redis_queue_name: String,

    /// Visibility timeout applied by the redis backend. SQS owns its own.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_receive_wait_secs")]
    pub receive_wait_secs: u64,

    #[serde(default = "default_receive_count_warn_threshold")]
    pub receive_count_warn_threshold: u32,

    // AWS
    pub aws_region: Option<String>,
    pub aws_access_key: Option<String>,
    pub aws_access_secret: Option<String>,

    /// Custom S3-compatible endpoint; unset means AWS S3 in `aws_region`.
    pub s3_endpoint: Option<String>,

    /// Bucket the worker publishes renditions into.
    pub output_bucket: String,

    // Compute
    #[serde(default = "default_compute_backend")]
    pub compute_backend: ComputeBackend,

    pub azure_subscription_id: Option<String>,
    pub azure_resource_group: Option<String>,
    pub azure_tenant_id: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,

    #[serde(default = "default_azure_location")]
    pub azure_location: String,

    /// Container registry name; images resolve to `<acr_name>.azurecr.io/<worker_image>`.
    #[serde(default = "default_acr_name")]
    pub acr_name: String,
    pub acr_username: Option<String>,
    pub acr_password: Option<String>,

    #[serde(default = "default_worker_image")]
    pub worker_image: String,

    #[serde(default = "default_worker_cpu")]
    pub worker_cpu: f64,

    #[serde(default = "default_worker_memory_gb")]
    pub worker_memory_gb: f64,

    #[serde(default = "default_job_name_prefix")]
    pub job_name_prefix: String,

    // Lifecycle tracking
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    #[serde(default = "default_record_failure_policy")]
    pub record_failure_policy: RecordFailurePolicy,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_sweep_max_age_secs")]
    pub sweep_max_age_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Sqs
}

fn default_redis_queue_name() -> String {
    "transcode:uploads".to_string()
}

fn default_visibility_timeout_secs() -> u64 {
    900
}

fn default_receive_wait_secs() -> u64 {
    20
}

fn default_receive_count_warn_threshold() -> u32 {
    5
}

fn default_compute_backend() -> ComputeBackend {
    ComputeBackend::Azure
}

fn default_azure_location() -> String {
    "southindia".to_string()
}

fn default_acr_name() -> String {
    "transcoder".to_string()
}

fn default_worker_image() -> String {
    "transcoder-image:latest".to_string()
}

fn default_worker_cpu() -> f64 {
    1.0
}

fn default_worker_memory_gb() -> f64 {
    1.5
}

fn default_job_name_prefix() -> String {
    "transcoder".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_wait_secs() -> u64 {
    3600
}

fn default_record_failure_policy() -> RecordFailurePolicy {
    RecordFailurePolicy::Continue
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_sweep_max_age_secs() -> u64 {
    7200
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env().map_err(ConfigError::Env)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an explicit set of variables instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars).map_err(ConfigError::Env)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot run: zero intervals panic the
    /// sweep timer or busy-poll the platform, and unit names must satisfy the
    /// strictest platform's naming rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("POLL_INTERVAL_SECS", self.poll_interval_secs),
            ("MAX_WAIT_SECS", self.max_wait_secs),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        validate_name_prefix(&self.job_name_prefix)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_max_age(&self) -> Duration {
        Duration::from_secs(self.sweep_max_age_secs)
    }

    /// Region used for both SQS and S3. Defaults to us-east-1 like the SDKs.
    pub fn region(&self) -> String {
        self.aws_region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string())
    }
}

/// Unwrap a setting the selected backend cannot run without.
pub fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

/// Longest unit name Azure accepts for a container group.
pub const MAX_UNIT_NAME_LEN: usize = 63;

/// Length of the `-<uuid>` suffix appended to every unit name.
const UNIT_NAME_SUFFIX_LEN: usize = 1 + 36;

/// Unit names are `<prefix>-<uuid>`; the prefix must keep them within
/// container group rules: lowercase letters, digits and inner hyphens.
fn validate_name_prefix(prefix: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name: "JOB_NAME_PREFIX",
        reason,
    };

    if prefix.is_empty() {
        return Err(invalid("must not be empty".to_string()));
    }
    let max_len = MAX_UNIT_NAME_LEN - UNIT_NAME_SUFFIX_LEN;
    if prefix.len() > max_len {
        return Err(invalid(format!("must be at most {} characters", max_len)));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "may only contain lowercase letters, digits and hyphens".to_string(),
        ));
    }
    if prefix.starts_with('-') || prefix.ends_with('-') || prefix.contains("--") {
        return Err(invalid(
            "must not start or end with a hyphen or repeat hyphens".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Missing required setting {0} for the selected backend")]
    Missing(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_vars(vars(&[("OUTPUT_BUCKET", "out")])).unwrap();
        assert_eq!(config.queue_backend, QueueBackend::Sqs);
        assert_eq!(config.compute_backend, ComputeBackend::Azure);
        assert_eq!(config.record_failure_policy, RecordFailurePolicy::Continue);
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.receive_wait_secs, 20);
        assert_eq!(config.azure_location, "southindia");
        assert_eq!(config.worker_memory_gb, 1.5);
        assert_eq!(config.region(), "us-east-1");
    }

    #[test]
    fn test_backend_selection() {
        let config = AppConfig::from_vars(vars(&[
            ("OUTPUT_BUCKET", "out"),
            ("QUEUE_BACKEND", "redis"),
            ("COMPUTE_BACKEND", "docker"),
            ("RECORD_FAILURE_POLICY", "stop"),
            ("MAX_WAIT_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(config.queue_backend, QueueBackend::Redis);
        assert_eq!(config.compute_backend, ComputeBackend::Docker);
        assert_eq!(config.record_failure_policy, RecordFailurePolicy::Stop);
        assert_eq!(config.max_wait(), Duration::from_secs(120));
    }

    #[test]
    fn test_output_bucket_is_required() {
        assert!(AppConfig::from_vars(vars(&[])).is_err());
    }

    #[test]
    fn test_require_rejects_empty() {
        assert!(matches!(
            require(&Some(String::new()), "SQS_QUEUE_URL"),
            Err(ConfigError::Missing("SQS_QUEUE_URL"))
        ));
        assert_eq!(require(&Some("x".into()), "X").unwrap(), "x");
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for key in ["POLL_INTERVAL_SECS", "SWEEP_INTERVAL_SECS", "MAX_WAIT_SECS"] {
            let err = AppConfig::from_vars(vars(&[("OUTPUT_BUCKET", "out"), (key, "0")]))
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { name, .. } if name == key),
                "{} = 0 was not rejected: {:?}",
                key,
                err
            );
        }
    }

    #[test]
    fn test_uppercase_prefix_is_rejected() {
        let err = AppConfig::from_vars(vars(&[
            ("OUTPUT_BUCKET", "out"),
            ("JOB_NAME_PREFIX", "Transcoder"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "JOB_NAME_PREFIX",
                ..
            }
        ));
    }

    #[test]
    fn test_prefix_length_keeps_names_within_limit() {
        let longest = "a".repeat(MAX_UNIT_NAME_LEN - 37);
        assert!(validate_name_prefix(&longest).is_ok());
        assert_eq!(format!("{}-{}", longest, uuid::Uuid::new_v4()).len(), MAX_UNIT_NAME_LEN);

        let too_long = "a".repeat(MAX_UNIT_NAME_LEN - 36);
        assert!(validate_name_prefix(&too_long).is_err());
    }

    #[test]
    fn test_prefix_shape() {
        assert!(validate_name_prefix("transcoder-prod-2").is_ok());
        assert!(validate_name_prefix("").is_err());
        assert!(validate_name_prefix("-transcoder").is_err());
        assert!(validate_name_prefix("transcoder-").is_err());
        assert!(validate_name_prefix("trans--coder").is_err());
        assert!(validate_name_prefix("trans_coder").is_err());
    }

    #[test]
    fn test_policy_parses_from_str() {
        use std::str::FromStr;
        assert_eq!(
            RecordFailurePolicy::from_str("continue").unwrap(),
            RecordFailurePolicy::Continue
        );
    }
}
