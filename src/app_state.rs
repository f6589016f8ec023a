use std::sync::Arc;
use tracing::info;

use crate::config::{require, AppConfig, ComputeBackend, ConfigError, QueueBackend};
use crate::services::{
    cleanup::SourceCleanup,
    compute::{
        azure::{DEFAULT_LOGIN_ENDPOINT, DEFAULT_MANAGEMENT_ENDPOINT},
        AzureContainerInstances, AzureSettings, ComputePlatform, DockerPlatform, Launcher,
        LauncherSettings, PlatformError, Reconciler,
    },
    dispatcher::{Dispatcher, DispatcherSettings},
    queue::{MessageQueue, QueueError, RedisQueue, SqsQueue},
    storage::{BlobStore, S3BlobStore, StorageError},
};

/// The three external collaborators, constructed once at startup and shared
/// by the dispatcher, the sweep and the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn MessageQueue>,
    pub storage: Arc<dyn BlobStore>,
    pub platform: Arc<dyn ComputePlatform>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        storage: Arc<dyn BlobStore>,
        platform: Arc<dyn ComputePlatform>,
    ) -> Self {
        Self {
            queue,
            storage,
            platform,
        }
    }

    /// Build the clients selected by `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let queue = build_queue(config).await?;
        let storage = build_storage(config)?;
        let platform = build_platform(config)?;
        let state = Self::new(queue, storage, platform);
        state.verify().await?;
        Ok(state)
    }

    /// Contact the queue and the compute platform once. Client construction
    /// alone never connects, so an unreachable or unauthorized backend would
    /// otherwise surface only as endless retries inside the dispatch loop.
    pub async fn verify(&self) -> Result<(), StartupError> {
        let depth = self.queue.depth().await.map_err(StartupError::QueueCheck)?;
        let units = self
            .platform
            .list_managed()
            .await
            .map_err(StartupError::PlatformCheck)?;
        info!(
            queue_depth = depth,
            managed_units = units.len(),
            "Queue and compute platform reachable"
        );
        Ok(())
    }

    pub fn dispatcher(&self, config: &AppConfig) -> Dispatcher {
        let launcher = Launcher::new(
            self.platform.clone(),
            LauncherSettings {
                name_prefix: config.job_name_prefix.clone(),
                poll_interval: config.poll_interval(),
                max_wait: config.max_wait(),
            },
        );
        Dispatcher::new(
            self.queue.clone(),
            launcher,
            SourceCleanup::new(self.storage.clone()),
            DispatcherSettings {
                output_bucket: config.output_bucket.clone(),
                receive_wait: std::time::Duration::from_secs(config.receive_wait_secs),
                failure_policy: config.record_failure_policy,
                receive_count_warn_threshold: config.receive_count_warn_threshold,
            },
        )
    }

    pub fn reconciler(&self, config: &AppConfig) -> Reconciler {
        Reconciler::new(
            self.platform.clone(),
            config.sweep_max_age(),
            config.sweep_interval(),
        )
    }
}

pub async fn build_queue(config: &AppConfig) -> Result<Arc<dyn MessageQueue>, StartupError> {
    let queue: Arc<dyn MessageQueue> = match config.queue_backend {
        QueueBackend::Sqs => {
            let queue_url = require(&config.sqs_queue_url, "SQS_QUEUE_URL")?;
            Arc::new(
                SqsQueue::new(
                    &config.region(),
                    config.aws_access_key.as_deref(),
                    config.aws_access_secret.as_deref(),
                    queue_url,
                )
                .await,
            )
        }
        QueueBackend::Redis => {
            let redis_url = require(&config.redis_url, "REDIS_URL")?;
            Arc::new(RedisQueue::new(
                redis_url,
                &config.redis_queue_name,
                std::time::Duration::from_secs(config.visibility_timeout_secs),
            )?)
        }
    };
    Ok(queue)
}

pub fn build_storage(config: &AppConfig) -> Result<Arc<dyn BlobStore>, StartupError> {
    let store = S3BlobStore::new(
        &config.region(),
        config.s3_endpoint.as_deref(),
        config.aws_access_key.as_deref(),
        config.aws_access_secret.as_deref(),
    )?;
    Ok(Arc::new(store))
}

pub fn build_platform(config: &AppConfig) -> Result<Arc<dyn ComputePlatform>, StartupError> {
    let platform: Arc<dyn ComputePlatform> = match config.compute_backend {
        ComputeBackend::Azure => Arc::new(AzureContainerInstances::new(AzureSettings {
            subscription_id: require(&config.azure_subscription_id, "AZURE_SUBSCRIPTION_ID")?
                .to_string(),
            resource_group: require(&config.azure_resource_group, "AZURE_RESOURCE_GROUP")?
                .to_string(),
            tenant_id: require(&config.azure_tenant_id, "AZURE_TENANT_ID")?.to_string(),
            client_id: require(&config.azure_client_id, "AZURE_CLIENT_ID")?.to_string(),
            client_secret: require(&config.azure_client_secret, "AZURE_CLIENT_SECRET")?
                .to_string(),
            location: config.azure_location.clone(),
            registry_server: format!("{}.azurecr.io", config.acr_name),
            registry_username: config.acr_username.clone(),
            registry_password: config.acr_password.clone(),
            image: config.worker_image.clone(),
            cpu: config.worker_cpu,
            memory_gb: config.worker_memory_gb,
            management_endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
        })),
        ComputeBackend::Docker => Arc::new(DockerPlatform::new(config.worker_image.clone())),
    };
    Ok(platform)
}

/// Conditions that stop the process before the dispatch loop starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize queue client: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to initialize blob store client: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue is unreachable: {0}")]
    QueueCheck(#[source] QueueError),

    #[error("Compute platform is unreachable: {0}")]
    PlatformCheck(#[source] PlatformError),
}
