//! Microsoft Graph client implementing [`IdentityClient`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{HoistError, HoistResult};
use crate::identity::{TokenCache, TokenKey, TokenProvider};

use super::{IdentityClient, InheritableOutcome, OAuth2Grant, ServicePrincipal};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

pub struct GraphClient {
    tenant_id: String,
    http: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    tokens: Arc<TokenCache>,
    provider: Arc<dyn TokenProvider>,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpBody {
    id: String,
    app_id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantBody {
    id: String,
    client_id: String,
    resource_id: String,
    #[serde(default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationBody {
    id: String,
    #[serde(default)]
    api: ApiBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiBody {
    #[serde(default)]
    pre_authorized_applications: Vec<PreAuthorizedApp>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PreAuthorizedApp {
    app_id: String,
    #[serde(default)]
    delegated_permission_ids: Vec<String>,
}

impl GraphClient {
    pub fn new(
        tenant_id: impl Into<String>,
        tokens: Arc<TokenCache>,
        provider: Arc<dyn TokenProvider>,
    ) -> HoistResult<Self> {
        let runtime = tokio::runtime::Runtime::new().map_err(|e| {
            HoistError::internal("Failed to create async runtime").with_source(anyhow::Error::new(e))
        })?;
        Ok(Self {
            tenant_id: tenant_id.into(),
            http: reqwest::Client::new(),
            runtime,
            tokens,
            provider,
        })
    }

    fn bearer(&self) -> HoistResult<String> {
        let scopes = vec![GRAPH_SCOPE.to_string()];
        let key = TokenKey::new(&self.tenant_id, &scopes, "az-cli");
        let token = self
            .tokens
            .get_or_acquire(&key, || self.provider.acquire(&self.tenant_id, &scopes))?;
        Ok(token.token)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> HoistResult<T> {
        let token = self.bearer()?;
        self.runtime.block_on(async {
            let response = self
                .http
                .get(url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(network_error)?;
            let status = response.status();
            let body = response.bytes().await.map_err(network_error)?;
            if !status.is_success() {
                return Err(provider_error(status, &body));
            }
            serde_json::from_slice(&body).map_err(decode_error)
        })
    }

    fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: serde_json::Value,
    ) -> HoistResult<Vec<u8>> {
        let token = self.bearer()?;
        debug!(%method, url, "identity provider request");
        self.runtime.block_on(async {
            let response = self
                .http
                .request(method, url)
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
            Ok(bytes.to_vec())
        })
    }

    fn application_by_app_id(&self, app_id: &str) -> HoistResult<ApplicationBody> {
        let url = format!(
            "{GRAPH_BASE}/applications?$filter=appId eq '{app_id}'&$select=id,api"
        );
        let mut found: Collection<ApplicationBody> = self.get_json(&url)?;
        if found.value.is_empty() {
            return Err(HoistError::permission_grant(format!(
                "No application registration found for app id {app_id}"
            )));
        }
        Ok(found.value.remove(0))
    }
}

impl IdentityClient for GraphClient {
    fn service_principal_by_app_id(&self, app_id: &str) -> HoistResult<Option<ServicePrincipal>> {
        let url = format!(
            "{GRAPH_BASE}/servicePrincipals?$filter=appId eq '{app_id}'&$select=id,appId,displayName"
        );
        let mut found: Collection<SpBody> = self.get_json(&url)?;
        if found.value.is_empty() {
            return Ok(None);
        }
        let sp = found.value.remove(0);
        Ok(Some(ServicePrincipal {
            id: sp.id,
            app_id: sp.app_id,
            display_name: sp.display_name,
        }))
    }

    fn find_grant(
        &self,
        client_sp_id: &str,
        resource_sp_id: &str,
    ) -> HoistResult<Option<OAuth2Grant>> {
        let url = format!(
            "{GRAPH_BASE}/oauth2PermissionGrants?$filter=clientId eq '{client_sp_id}' and resourceId eq '{resource_sp_id}'"
        );
        let mut found: Collection<GrantBody> = self.get_json(&url)?;
        if found.value.is_empty() {
            return Ok(None);
        }
        let grant = found.value.remove(0);
        let mut scopes: Vec<String> = grant
            .scope
            .split_whitespace()
            .map(str::to_string)
            .collect();
        scopes.sort();
        Ok(Some(OAuth2Grant {
            id: grant.id,
            client_sp_id: grant.client_id,
            resource_sp_id: grant.resource_id,
            scopes,
        }))
    }

    fn create_grant(
        &self,
        client_sp_id: &str,
        resource_sp_id: &str,
        scopes: &[String],
    ) -> HoistResult<OAuth2Grant> {
        let body = json!({
            "clientId": client_sp_id,
            "consentType": "AllPrincipals",
            "resourceId": resource_sp_id,
            "scope": scopes.join(" "),
        });
        let bytes = self.send_json(
            reqwest::Method::POST,
            &format!("{GRAPH_BASE}/oauth2PermissionGrants"),
            body,
        )?;
        let grant: GrantBody = serde_json::from_slice(&bytes).map_err(decode_error)?;
        Ok(OAuth2Grant {
            id: grant.id,
            client_sp_id: grant.client_id,
            resource_sp_id: grant.resource_id,
            scopes: scopes.to_vec(),
        })
    }

    fn replace_grant_scopes(&self, grant_id: &str, scopes: &[String]) -> HoistResult<()> {
        self.send_json(
            reqwest::Method::PATCH,
            &format!("{GRAPH_BASE}/oauth2PermissionGrants/{grant_id}"),
            json!({ "scope": scopes.join(" ") }),
        )?;
        Ok(())
    }

    fn configure_inheritable_permissions(
        &self,
        blueprint_app_id: &str,
        resource_app_id: &str,
        scopes: &[String],
    ) -> HoistResult<InheritableOutcome> {
        let application = self.application_by_app_id(blueprint_app_id)?;

        let mut entries = application.api.pre_authorized_applications.clone();
        let pre_existed = entries
            .iter()
            .any(|e| e.app_id == resource_app_id && e.delegated_permission_ids == scopes);
        if pre_existed {
            return Ok(InheritableOutcome { pre_existed: true });
        }

        entries.retain(|e| e.app_id != resource_app_id);
        entries.push(PreAuthorizedApp {
            app_id: resource_app_id.to_string(),
            delegated_permission_ids: scopes.to_vec(),
        });

        self.send_json(
            reqwest::Method::PATCH,
            &format!("{GRAPH_BASE}/applications/{}", application.id),
            json!({ "api": { "preAuthorizedApplications": entries } }),
        )?;
        Ok(InheritableOutcome { pre_existed: false })
    }
}

fn network_error(err: reqwest::Error) -> HoistError {
    HoistError::permission_grant("Identity provider request failed")
        .with_reason(err.to_string())
        .with_transient()
}

fn decode_error(err: serde_json::Error) -> HoistError {
    HoistError::permission_grant("Unexpected identity provider response")
        .with_reason(err.to_string())
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: Option<GraphErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

fn provider_error(status: reqwest::StatusCode, body: &[u8]) -> HoistError {
    let detail: Option<GraphErrorDetail> = serde_json::from_slice::<GraphErrorBody>(body)
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
    let mut error = HoistError::permission_grant(format!(
        "Identity provider request failed with HTTP {status}"
    ))
    .with_reason(reason);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        error = error.with_transient();
    }
    error
}
