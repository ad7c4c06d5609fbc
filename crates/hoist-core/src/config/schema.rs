//! Agent configuration: fixed settings plus mutable deployment state.
//!
//! Settings are loaded once per invocation and never written back; state is
//! append/update-only and persisted at phase checkpoints.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// How the agent application is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingMode {
    /// Hoist provisions a web app and uploads the deployment archive.
    ManagedWebApp,
    /// The operator hosts the messaging endpoint elsewhere; no web-app
    /// resources are provisioned.
    ExternalEndpoint,
}

/// Fixed settings for a command invocation. Never mutated after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Entra tenant id (GUID).
    pub tenant_id: String,
    /// Azure subscription id (GUID).
    #[serde(default)]
    pub subscription_id: String,
    /// Resource group holding all provisioned resources.
    #[serde(default)]
    pub resource_group: String,
    /// Azure location, e.g. `westeurope`.
    #[serde(default)]
    pub location: String,
    /// App service plan name.
    #[serde(default)]
    pub plan_name: String,
    /// App service plan SKU.
    #[serde(default = "default_plan_sku")]
    pub plan_sku: String,
    /// Globally unique web app name.
    #[serde(default)]
    pub web_app_name: String,
    /// Display name for the user-assigned managed identity.
    pub agent_identity_name: String,
    /// Display name for the blueprint application.
    pub blueprint_name: String,
    /// Path to the agent project directory.
    pub project_path: PathBuf,
    /// Hosting mode; decides which validation rules apply.
    pub hosting: HostingMode,
    /// Messaging endpoint for [`HostingMode::ExternalEndpoint`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messaging_endpoint: Option<String>,
    /// Publish .NET projects self-contained instead of framework-dependent.
    #[serde(default)]
    pub self_contained: bool,
}

fn default_plan_sku() -> String {
    "B1".to_string()
}

/// Tri-state outcome of configuring inheritable permissions on the
/// blueprint application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritableStatus {
    /// Never requested for this resource.
    #[default]
    NotRequested,
    /// Configured (this run or a previous one).
    Configured,
    /// The configuration step failed; see the recorded error text.
    Failed,
}

/// Consent record for one tooling resource application.
///
/// Entries are looked up and updated by resource application id and never
/// deleted, so re-running the grant sequence is observable and idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConsent {
    /// Human-readable server name from the tooling manifest.
    pub resource_name: String,
    /// Application id of the resource service principal.
    pub resource_app_id: String,
    /// Admin-consent URL for manual consent, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_url: Option<String>,
    /// Whether the OAuth2 and admin-consent grants have been applied.
    #[serde(default)]
    pub granted: bool,
    /// When the grants were last applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
    /// Scope set requested on the last run, deduplicated and sorted.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Inheritable-permission configuration outcome.
    #[serde(default)]
    pub inheritable: InheritableStatus,
    /// Error text from a failed inheritable-permission step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inheritable_error: Option<String>,
}

impl ResourceConsent {
    pub fn new(resource_name: impl Into<String>, resource_app_id: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            resource_app_id: resource_app_id.into(),
            consent_url: None,
            granted: false,
            granted_at: None,
            scopes: Vec::new(),
            inheritable: InheritableStatus::NotRequested,
            inheritable_error: None,
        }
    }
}

/// Metadata for the most recent successful deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Detected platform at deploy time.
    pub platform: Platform,
    /// Archive file name that was uploaded.
    pub archive: String,
    /// Target web app, when hosting is managed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app_name: Option<String>,
    /// Completion timestamp.
    pub deployed_at: DateTime<Utc>,
}

/// Mutable deployment state. Append/update-only; persisted after each
/// phase that changes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// ARM resource id of the managed identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_identity_id: Option<String>,
    /// Service-principal object id of the managed identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_identity_principal_id: Option<String>,
    /// Application id of the blueprint application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blueprint_app_id: Option<String>,
    /// Application id of the agentic user/app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_app_id: Option<String>,
    /// Client secret for the blueprint application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Bot registration id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    /// Ordered consent records, one per tooling resource.
    #[serde(default)]
    pub consents: Vec<ResourceConsent>,
    /// Most recent successful deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_deployment: Option<DeploymentRecord>,
}

impl AgentState {
    /// Look up the consent record for a resource application.
    pub fn consent(&self, resource_app_id: &str) -> Option<&ResourceConsent> {
        self.consents
            .iter()
            .find(|c| c.resource_app_id == resource_app_id)
    }

    /// Get or insert the consent record for a resource application.
    pub fn consent_mut(
        &mut self,
        resource_name: &str,
        resource_app_id: &str,
    ) -> &mut ResourceConsent {
        if let Some(index) = self
            .consents
            .iter()
            .position(|c| c.resource_app_id == resource_app_id)
        {
            return &mut self.consents[index];
        }
        self.consents
            .push(ResourceConsent::new(resource_name, resource_app_id));
        self.consents.last_mut().expect("just pushed")
    }
}

/// Merged configuration record: fixed settings plus mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub settings: AgentSettings,
    #[serde(default)]
    pub state: AgentState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AgentSettings {
        AgentSettings {
            tenant_id: "11111111-1111-1111-1111-111111111111".to_string(),
            subscription_id: "22222222-2222-2222-2222-222222222222".to_string(),
            resource_group: "rg-agent".to_string(),
            location: "westeurope".to_string(),
            plan_name: "plan-agent".to_string(),
            plan_sku: "B1".to_string(),
            web_app_name: "agent-web".to_string(),
            agent_identity_name: "agent-identity".to_string(),
            blueprint_name: "agent-blueprint".to_string(),
            project_path: PathBuf::from("."),
            hosting: HostingMode::ManagedWebApp,
            messaging_endpoint: None,
            self_contained: false,
        }
    }

    #[test]
    fn consent_mut_upserts_by_resource_app_id() {
        let mut state = AgentState::default();
        state.consent_mut("server-a", "app-1").scopes = vec!["read".to_string()];
        state.consent_mut("server-a", "app-1").granted = true;
        assert_eq!(state.consents.len(), 1);
        assert!(state.consent("app-1").unwrap().granted);
        assert_eq!(state.consent("app-1").unwrap().scopes, vec!["read"]);
    }

    #[test]
    fn consents_are_never_removed_on_update() {
        let mut state = AgentState::default();
        state.consent_mut("a", "app-1");
        state.consent_mut("b", "app-2");
        state.consent_mut("a", "app-1").granted = true;
        assert_eq!(state.consents.len(), 2);
    }

    #[test]
    fn state_roundtrips_through_json() {
        let mut config = AgentConfig {
            settings: settings(),
            state: AgentState::default(),
        };
        config.state.blueprint_app_id = Some("bp-app".to_string());
        let consent = config.state.consent_mut("server-a", "app-1");
        consent.granted = true;
        consent.granted_at = Some(Utc::now());
        consent.inheritable = InheritableStatus::Configured;

        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state.blueprint_app_id.as_deref(), Some("bp-app"));
        assert_eq!(
            back.state.consent("app-1").unwrap().inheritable,
            InheritableStatus::Configured
        );
    }
}
