//! Azure Resource Manager client implementing [`CloudClient`].
//!
//! Drives the ARM REST surface with bearer tokens from the process token
//! cache. The pipeline is synchronous; HTTP calls block on an owned tokio
//! runtime.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{HoistError, HoistResult, ResourceFailure};
use crate::identity::{TokenCache, TokenKey, TokenProvider};

use super::{
    AppServicePlan, CloudClient, IdentitySpec, ManagedIdentity, PlanSpec, ResourceGroup,
    ResourceGroupSpec, WebApp, WebAppSpec,
};

const ARM_BASE: &str = "https://management.azure.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";

const GROUPS_API: &str = "2021-04-01";
const WEB_API: &str = "2023-12-01";
const IDENTITY_API: &str = "2023-01-31";

pub struct ArmClient {
    tenant_id: String,
    subscription_id: String,
    http: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    tokens: Arc<TokenCache>,
    provider: Arc<dyn TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct ArmErrorBody {
    error: Option<ArmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ArmErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmResource {
    id: String,
    name: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    properties: Option<serde_json::Value>,
}

impl ArmClient {
    pub fn new(
        tenant_id: impl Into<String>,
        subscription_id: impl Into<String>,
        tokens: Arc<TokenCache>,
        provider: Arc<dyn TokenProvider>,
    ) -> HoistResult<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| HoistError::internal("Failed to create async runtime").with_source(anyhow::Error::new(e)))?;
        Ok(Self {
            tenant_id: tenant_id.into(),
            subscription_id: subscription_id.into(),
            http: reqwest::Client::new(),
            runtime,
            tokens,
            provider,
        })
    }

    fn bearer(&self) -> HoistResult<String> {
        let scopes = vec![ARM_SCOPE.to_string()];
        let key = TokenKey::new(&self.tenant_id, &scopes, "az-cli");
        let token = self
            .tokens
            .get_or_acquire(&key, || self.provider.acquire(&self.tenant_id, &scopes))?;
        Ok(token.token)
    }

    fn group_url(&self, name: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourcegroups/{name}?api-version={GROUPS_API}",
            self.subscription_id
        )
    }

    fn provider_url(&self, resource_group: &str, provider_path: &str, api: &str) -> String {
        format!(
            "{ARM_BASE}/subscriptions/{}/resourceGroups/{resource_group}/providers/{provider_path}?api-version={api}",
            self.subscription_id
        )
    }

    /// GET a resource; `Ok(None)` on 404.
    fn get_resource(&self, url: &str) -> HoistResult<Option<ArmResource>> {
        let token = self.bearer()?;
        self.runtime.block_on(async {
            let response = self
                .http
                .get(url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(network_error)?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let status = response.status();
            let body = response.bytes().await.map_err(network_error)?;
            if !status.is_success() {
                return Err(provider_error(status, &body));
            }
            let resource: ArmResource = serde_json::from_slice(&body).map_err(decode_error)?;
            Ok(Some(resource))
        })
    }

    /// PUT a resource; returns the provider's representation.
    fn put_resource(&self, url: &str, body: serde_json::Value) -> HoistResult<ArmResource> {
        let token = self.bearer()?;
        debug!(url, "creating resource");
        self.runtime.block_on(async {
            let response = self
                .http
                .put(url)
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await
                .map_err(network_error)?;
            let status = response.status();
            let bytes = response.bytes().await.map_err(network_error)?;
            if !status.is_success() {
                return Err(provider_error(status, &bytes));
            }
            serde_json::from_slice(&bytes).map_err(decode_error)
        })
    }

    fn property(resource: &ArmResource, key: &str) -> Option<String> {
        resource
            .properties
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl CloudClient for ArmClient {
    fn get_resource_group(&self, name: &str) -> HoistResult<Option<ResourceGroup>> {
        Ok(self.get_resource(&self.group_url(name))?.map(|r| ResourceGroup {
            id: r.id,
            name: r.name,
            location: r.location.unwrap_or_default(),
        }))
    }

    fn create_resource_group(&self, spec: &ResourceGroupSpec) -> HoistResult<ResourceGroup> {
        let resource = self.put_resource(
            &self.group_url(&spec.name),
            json!({ "location": spec.location }),
        )?;
        Ok(ResourceGroup {
            id: resource.id,
            name: resource.name,
            location: resource.location.unwrap_or_else(|| spec.location.clone()),
        })
    }

    fn get_plan(&self, resource_group: &str, name: &str) -> HoistResult<Option<AppServicePlan>> {
        let url = self.provider_url(
            resource_group,
            &format!("Microsoft.Web/serverfarms/{name}"),
            WEB_API,
        );
        Ok(self
            .get_resource(&url)?
            .map(|r| AppServicePlan { id: r.id, name: r.name }))
    }

    fn create_plan(&self, spec: &PlanSpec) -> HoistResult<AppServicePlan> {
        let url = self.provider_url(
            &spec.resource_group,
            &format!("Microsoft.Web/serverfarms/{}", spec.name),
            WEB_API,
        );
        let resource = self.put_resource(
            &url,
            json!({
                "location": spec.location,
                "sku": { "name": spec.sku },
                "properties": { "reserved": true }
            }),
        )?;
        Ok(AppServicePlan {
            id: resource.id,
            name: resource.name,
        })
    }

    fn get_web_app(&self, resource_group: &str, name: &str) -> HoistResult<Option<WebApp>> {
        let url = self.provider_url(
            resource_group,
            &format!("Microsoft.Web/sites/{name}"),
            WEB_API,
        );
        Ok(self.get_resource(&url)?.map(|r| {
            let host = Self::property(&r, "defaultHostName").unwrap_or_default();
            WebApp {
                id: r.id,
                name: r.name,
                default_host_name: host,
            }
        }))
    }

    fn create_web_app(&self, spec: &WebAppSpec) -> HoistResult<WebApp> {
        let url = self.provider_url(
            &spec.resource_group,
            &format!("Microsoft.Web/sites/{}", spec.name),
            WEB_API,
        );
        let resource = self.put_resource(
            &url,
            json!({
                "location": spec.location,
                "properties": { "serverFarmId": spec.plan_id, "httpsOnly": true }
            }),
        )?;
        let host = Self::property(&resource, "defaultHostName")
            .unwrap_or_else(|| format!("{}.azurewebsites.net", spec.name));
        Ok(WebApp {
            id: resource.id,
            name: resource.name,
            default_host_name: host,
        })
    }

    fn get_identity(
        &self,
        resource_group: &str,
        name: &str,
    ) -> HoistResult<Option<ManagedIdentity>> {
        let url = self.provider_url(
            resource_group,
            &format!("Microsoft.ManagedIdentity/userAssignedIdentities/{name}"),
            IDENTITY_API,
        );
        Ok(self.get_resource(&url)?.map(|r| ManagedIdentity {
            client_id: Self::property(&r, "clientId").unwrap_or_default(),
            principal_id: Self::property(&r, "principalId").unwrap_or_default(),
            id: r.id,
            name: r.name,
        }))
    }

    fn create_identity(&self, spec: &IdentitySpec) -> HoistResult<ManagedIdentity> {
        let url = self.provider_url(
            &spec.resource_group,
            &format!("Microsoft.ManagedIdentity/userAssignedIdentities/{}", spec.name),
            IDENTITY_API,
        );
        let resource = self.put_resource(&url, json!({ "location": spec.location }))?;
        Ok(ManagedIdentity {
            client_id: Self::property(&resource, "clientId").unwrap_or_default(),
            principal_id: Self::property(&resource, "principalId").unwrap_or_default(),
            id: resource.id,
            name: resource.name,
        })
    }

    fn upload_package(&self, web_app: &WebApp, archive: &Path) -> HoistResult<()> {
        let bytes = std::fs::read(archive).map_err(|e| {
            HoistError::internal(format!("Could not read archive: {}", archive.display()))
                .with_source(anyhow::Error::new(e))
        })?;
        // Kudu lives on the SCM host: app.azurewebsites.net -> app.scm.azurewebsites.net
        let scm_host = web_app.default_host_name.replacen('.', ".scm.", 1);
        let url = format!("https://{scm_host}/api/zipdeploy?isAsync=false");
        let token = self.bearer()?;

        debug!(web_app = %web_app.name, bytes = bytes.len(), "uploading deployment archive");
        self.runtime.block_on(async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .header(reqwest::header::CONTENT_TYPE, "application/zip")
                .body(bytes)
                .send()
                .await
                .map_err(network_error)?;
            let status = response.status();
            if !status.is_success() {
                let body = response.bytes().await.unwrap_or_default();
                return Err(provider_error(status, &body));
            }
            Ok(())
        })
    }
}

/// Network-level failures are transient: the retry orchestrator may
/// re-attempt them.
fn network_error(err: reqwest::Error) -> HoistError {
    HoistError::resource(ResourceFailure::Other, "Cloud request failed")
        .with_reason(err.to_string())
        .with_transient()
}

fn decode_error(err: serde_json::Error) -> HoistError {
    HoistError::resource(ResourceFailure::Other, "Unexpected cloud response")
        .with_reason(err.to_string())
}

/// Surface the provider's error code and message; throttling and server
/// errors are marked transient.
fn provider_error(status: reqwest::StatusCode, body: &[u8]) -> HoistError {
    let detail: Option<ArmErrorDetail> = serde_json::from_slice::<ArmErrorBody>(body)
        .ok()
        .and_then(|b| b.error);
    let reason = match detail {
        Some(detail) => format!(
            "{}: {}",
            detail.code.unwrap_or_default(),
            detail.message.unwrap_or_default()
        ),
        None => String::from_utf8_lossy(body).into_owned(),
    };
    let mut error = HoistError::resource(
        ResourceFailure::Other,
        format!("Cloud request failed with HTTP {status}"),
    )
    .with_reason(reason);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        error = error.with_transient();
    }
    error
}
