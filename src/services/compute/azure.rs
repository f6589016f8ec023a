use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    parse_created_at, ComputePlatform, ManagedUnit, PlatformError, UnitStatus, CREATED_AT_KEY,
    MANAGED_BY_KEY, MANAGED_BY_VALUE,
};
use crate::models::job::{ComputeJob, ComputeState};

const API_VERSION: &str = "2023-05-01";
const CONTAINER_NAME: &str = "transcoder-container";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
/// Refresh tokens this long before Azure says they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 120;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// Everything needed to run worker containers on Azure Container Instances.
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub subscription_id: String,
    pub resource_group: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub location: String,
    /// Registry host, e.g. `transcoder.azurecr.io`.
    pub registry_server: String,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    /// Image reference without the registry host.
    pub image: String,
    pub cpu: f64,
    pub memory_gb: f64,
    pub management_endpoint: String,
    pub login_endpoint: String,
}

// ARM request bodies

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerGroupRequest {
    location: String,
    tags: HashMap<String, String>,
    properties: ContainerGroupRequestProperties,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerGroupRequestProperties {
    containers: Vec<ContainerRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_registry_credentials: Vec<RegistryCredential>,
    os_type: &'static str,
    restart_policy: &'static str,
}

#[derive(Serialize)]
struct ContainerRequest {
    name: &'static str,
    properties: ContainerRequestProperties,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerRequestProperties {
    image: String,
    resources: ResourceRequirements,
    environment_variables: Vec<EnvironmentVariable>,
}

#[derive(Serialize)]
struct ResourceRequirements {
    requests: ResourceRequests,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceRequests {
    cpu: f64,
    #[serde(rename = "memoryInGB")]
    memory_in_gb: f64,
}

#[derive(Serialize)]
struct EnvironmentVariable {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct RegistryCredential {
    server: String,
    username: String,
    password: String,
}

// ARM responses; only the fields the dispatcher reads.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContainerGroup {
    name: String,
    tags: HashMap<String, String>,
    properties: ContainerGroupProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ContainerGroupProperties {
    provisioning_state: Option<String>,
    containers: Vec<Container>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Container {
    properties: ContainerProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ContainerProperties {
    instance_view: Option<InstanceView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InstanceView {
    current_state: Option<ContainerState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ContainerState {
    state: Option<String>,
    exit_code: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ContainerGroupList {
    value: Vec<ContainerGroup>,
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

/// Azure Container Instances over the ARM REST API, one container group per job.
pub struct AzureContainerInstances {
    http: Client,
    settings: AzureSettings,
    token: Mutex<Option<CachedToken>>,
}

impl AzureContainerInstances {
    pub fn new(settings: AzureSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
            token: Mutex::new(None),
        }
    }

    fn groups_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerInstance/containerGroups",
            self.settings.management_endpoint.trim_end_matches('/'),
            self.settings.subscription_id,
            self.settings.resource_group
        )
    }

    fn group_url(&self, name: &str) -> String {
        format!("{}/{}", self.groups_url(), name)
    }

    async fn bearer_token(&self) -> Result<String, PlatformError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.settings.login_endpoint.trim_end_matches('/'),
            self.settings.tenant_id
        );
        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await
            .map_err(PlatformError::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(PlatformError::Http)?;
        let refresh_at =
            Utc::now() + ChronoDuration::seconds(token.expires_in - TOKEN_REFRESH_MARGIN_SECS);
        debug!(expires_in = token.expires_in, "Acquired Azure management token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at,
        });
        Ok(token.access_token)
    }

    fn build_request(&self, job: &ComputeJob) -> ContainerGroupRequest {
        let environment_variables = job
            .descriptor
            .environment()
            .into_iter()
            .map(|(name, value)| EnvironmentVariable {
                name: name.to_string(),
                value,
            })
            .collect();

        let image_registry_credentials = match (
            &self.settings.registry_username,
            &self.settings.registry_password,
        ) {
            (Some(username), Some(password)) => vec![RegistryCredential {
                server: self.settings.registry_server.clone(),
                username: username.clone(),
                password: password.clone(),
            }],
            _ => Vec::new(),
        };

        let mut tags = HashMap::new();
        tags.insert(MANAGED_BY_KEY.to_string(), MANAGED_BY_VALUE.to_string());
        tags.insert(CREATED_AT_KEY.to_string(), job.submitted_at.to_rfc3339());

        ContainerGroupRequest {
            location: self.settings.location.clone(),
            tags,
            properties: ContainerGroupRequestProperties {
                containers: vec![ContainerRequest {
                    name: CONTAINER_NAME,
                    properties: ContainerRequestProperties {
                        image: format!("{}/{}", self.settings.registry_server, self.settings.image),
                        resources: ResourceRequirements {
                            requests: ResourceRequests {
                                cpu: self.settings.cpu,
                                memory_in_gb: self.settings.memory_gb,
                            },
                        },
                        environment_variables,
                    },
                }],
                image_registry_credentials,
                os_type: "Linux",
                restart_policy: "Never",
            },
        }
    }
}

async fn api_error(response: reqwest::Response) -> PlatformError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    PlatformError::Api { status, body }
}

/// Map a container group document to the launcher's view of it.
fn unit_status(name: &str, group: &ContainerGroup) -> Result<UnitStatus, PlatformError> {
    if group
        .properties
        .provisioning_state
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("failed"))
    {
        return Err(PlatformError::ProvisioningFailed(name.to_string()));
    }

    let Some(container) = group.properties.containers.first() else {
        return Ok(UnitStatus::Absent);
    };

    let current = container
        .properties
        .instance_view
        .as_ref()
        .and_then(|view| view.current_state.as_ref());

    let state = match current.and_then(|s| s.state.as_deref()) {
        Some("Terminated") => ComputeState::Terminated,
        Some("Running") => ComputeState::Running,
        _ => ComputeState::Submitting,
    };

    Ok(UnitStatus::Present {
        state,
        exit_code: current.and_then(|s| s.exit_code),
    })
}

#[async_trait]
impl ComputePlatform for AzureContainerInstances {
    async fn create(&self, job: &ComputeJob) -> Result<(), PlatformError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .put(self.group_url(&job.id))
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .json(&self.build_request(job))
            .send()
            .await
            .map_err(PlatformError::Http)?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        debug!(job_id = %job.id, status = %response.status(), "Container group accepted");
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<UnitStatus, PlatformError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .get(self.group_url(name))
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(PlatformError::Http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(UnitStatus::Absent);
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let group: ContainerGroup = response.json().await.map_err(PlatformError::Http)?;
        unit_status(name, &group)
    }

    async fn delete(&self, name: &str) -> Result<(), PlatformError> {
        let token = self.bearer_token().await?;
        let response = self
            .http
            .delete(self.group_url(name))
            .query(&[("api-version", API_VERSION)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(PlatformError::Http)?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn list_managed(&self) -> Result<Vec<ManagedUnit>, PlatformError> {
        let token = self.bearer_token().await?;
        let mut units = Vec::new();
        let mut next = Some(format!("{}?api-version={}", self.groups_url(), API_VERSION));

        while let Some(url) = next.take() {
            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(PlatformError::Http)?;
            if !response.status().is_success() {
                return Err(api_error(response).await);
            }

            let page: ContainerGroupList = response.json().await.map_err(PlatformError::Http)?;
            units.extend(
                page.value
                    .into_iter()
                    .filter(|group| {
                        group.tags.get(MANAGED_BY_KEY).map(String::as_str) == Some(MANAGED_BY_VALUE)
                    })
                    .map(|group| ManagedUnit {
                        created_at: parse_created_at(
                            group.tags.get(CREATED_AT_KEY).map(String::as_str),
                        ),
                        name: group.name,
                    }),
            );
            next = page.next_link;
        }

        Ok(units)
    }
}
