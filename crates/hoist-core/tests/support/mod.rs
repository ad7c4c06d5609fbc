//! Shared fixtures for pipeline integration tests: in-memory cloud and
//! identity clients, a recording tool runner, and config builders.
#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use hoist_core::build::{BuildRequest, ToolError, ToolOutput, ToolRunner};
use hoist_core::config::{AgentConfig, AgentSettings, AgentState, HostingMode};
use hoist_core::error::{HoistError, HoistResult, ResourceFailure};
use hoist_core::grants::{IdentityClient, InheritableOutcome, OAuth2Grant, ServicePrincipal};
use hoist_core::pipeline::InspectGate;
use hoist_core::provision::{
    AppServicePlan, CloudClient, IdentitySpec, ManagedIdentity, PlanSpec, ResourceGroup,
    ResourceGroupSpec, WebApp, WebAppSpec,
};

pub const TENANT: &str = "11111111-1111-1111-1111-111111111111";
pub const SUBSCRIPTION: &str = "22222222-2222-2222-2222-222222222222";

/// In-memory cloud recording every create and upload.
#[derive(Default)]
pub struct RecordingCloud {
    pub groups: RefCell<Vec<ResourceGroup>>,
    pub plans: RefCell<Vec<AppServicePlan>>,
    pub web_apps: RefCell<Vec<WebApp>>,
    pub identities: RefCell<Vec<ManagedIdentity>>,
    pub create_calls: RefCell<Vec<String>>,
    pub uploads: RefCell<Vec<PathBuf>>,
    /// When set, `create_plan` fails with this provider text.
    pub plan_failure: Option<String>,
}

impl CloudClient for RecordingCloud {
    fn get_resource_group(&self, name: &str) -> HoistResult<Option<ResourceGroup>> {
        Ok(self
            .groups
            .borrow()
            .iter()
            .find(|g| g.name == name)
            .cloned())
    }

    fn create_resource_group(&self, spec: &ResourceGroupSpec) -> HoistResult<ResourceGroup> {
        self.create_calls
            .borrow_mut()
            .push(format!("group:{}", spec.name));
        let group = ResourceGroup {
            id: format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
        };
        self.groups.borrow_mut().push(group.clone());
        Ok(group)
    }

    fn get_plan(&self, _rg: &str, name: &str) -> HoistResult<Option<AppServicePlan>> {
        Ok(self.plans.borrow().iter().find(|p| p.name == name).cloned())
    }

    fn create_plan(&self, spec: &PlanSpec) -> HoistResult<AppServicePlan> {
        self.create_calls
            .borrow_mut()
            .push(format!("plan:{}", spec.name));
        if let Some(failure) = &self.plan_failure {
            return Err(HoistError::resource(
                ResourceFailure::Other,
                "provider rejected the request",
            )
            .with_reason(failure.clone()));
        }
        let plan = AppServicePlan {
            id: format!("/plans/{}", spec.name),
            name: spec.name.clone(),
        };
        self.plans.borrow_mut().push(plan.clone());
        Ok(plan)
    }

    fn get_web_app(&self, _rg: &str, name: &str) -> HoistResult<Option<WebApp>> {
        Ok(self
            .web_apps
            .borrow()
            .iter()
            .find(|a| a.name == name)
            .cloned())
    }

    fn create_web_app(&self, spec: &WebAppSpec) -> HoistResult<WebApp> {
        self.create_calls
            .borrow_mut()
            .push(format!("webapp:{}", spec.name));
        let app = WebApp {
            id: format!("/sites/{}", spec.name),
            name: spec.name.clone(),
            default_host_name: format!("{}.azurewebsites.net", spec.name),
        };
        self.web_apps.borrow_mut().push(app.clone());
        Ok(app)
    }

    fn get_identity(&self, _rg: &str, name: &str) -> HoistResult<Option<ManagedIdentity>> {
        Ok(self
            .identities
            .borrow()
            .iter()
            .find(|i| i.name == name)
            .cloned())
    }

    fn create_identity(&self, spec: &IdentitySpec) -> HoistResult<ManagedIdentity> {
        self.create_calls
            .borrow_mut()
            .push(format!("identity:{}", spec.name));
        let identity = ManagedIdentity {
            id: format!("/identities/{}", spec.name),
            name: spec.name.clone(),
            client_id: "client-id".to_string(),
            principal_id: "principal-id".to_string(),
        };
        self.identities.borrow_mut().push(identity.clone());
        Ok(identity)
    }

    fn upload_package(&self, _web_app: &WebApp, archive: &Path) -> HoistResult<()> {
        self.uploads.borrow_mut().push(archive.to_path_buf());
        Ok(())
    }
}

/// In-memory identity provider with replace-not-duplicate grants.
#[derive(Default)]
pub struct RecordingIdentity {
    pub principals: Vec<ServicePrincipal>,
    pub grants: RefCell<Vec<OAuth2Grant>>,
    pub inheritable: RefCell<Vec<(String, String, Vec<String>)>>,
}

impl RecordingIdentity {
    pub fn with_principals(app_ids: &[(&str, &str)]) -> Self {
        Self {
            principals: app_ids
                .iter()
                .map(|(app_id, name)| ServicePrincipal {
                    id: format!("sp-{app_id}"),
                    app_id: app_id.to_string(),
                    display_name: name.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }
}

impl IdentityClient for RecordingIdentity {
    fn service_principal_by_app_id(&self, app_id: &str) -> HoistResult<Option<ServicePrincipal>> {
        Ok(self.principals.iter().find(|p| p.app_id == app_id).cloned())
    }

    fn find_grant(
        &self,
        client_sp_id: &str,
        resource_sp_id: &str,
    ) -> HoistResult<Option<OAuth2Grant>> {
        Ok(self
            .grants
            .borrow()
            .iter()
            .find(|g| g.client_sp_id == client_sp_id && g.resource_sp_id == resource_sp_id)
            .cloned())
    }

    fn create_grant(
        &self,
        client_sp_id: &str,
        resource_sp_id: &str,
        scopes: &[String],
    ) -> HoistResult<OAuth2Grant> {
        let grant = OAuth2Grant {
            id: format!("grant-{}", self.grants.borrow().len()),
            client_sp_id: client_sp_id.to_string(),
            resource_sp_id: resource_sp_id.to_string(),
            scopes: scopes.to_vec(),
        };
        self.grants.borrow_mut().push(grant.clone());
        Ok(grant)
    }

    fn replace_grant_scopes(&self, grant_id: &str, scopes: &[String]) -> HoistResult<()> {
        let mut grants = self.grants.borrow_mut();
        let grant = grants
            .iter_mut()
            .find(|g| g.id == grant_id)
            .expect("replacing unknown grant");
        grant.scopes = scopes.to_vec();
        Ok(())
    }

    fn configure_inheritable_permissions(
        &self,
        blueprint_app_id: &str,
        resource_app_id: &str,
        scopes: &[String],
    ) -> HoistResult<InheritableOutcome> {
        let mut configured = self.inheritable.borrow_mut();
        let pre_existed = configured
            .iter()
            .any(|(b, r, s)| b == blueprint_app_id && r == resource_app_id && s == scopes);
        if !pre_existed {
            configured.retain(|(b, r, _)| !(b == blueprint_app_id && r == resource_app_id));
            configured.push((
                blueprint_app_id.to_string(),
                resource_app_id.to_string(),
                scopes.to_vec(),
            ));
        }
        Ok(InheritableOutcome { pre_existed })
    }
}

/// Records tool invocations and reports success for each.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: RefCell<Vec<String>>,
}

impl ToolRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str], _cwd: &Path) -> Result<ToolOutput, ToolError> {
        self.calls
            .borrow_mut()
            .push(format!("{} {}", program, args.join(" ")));
        Ok(ToolOutput {
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Inspect gate that always declines the upload.
pub struct DenyGate;

impl InspectGate for DenyGate {
    fn pause(&self, _archive: &Path) -> HoistResult<bool> {
        Ok(false)
    }
}

/// Config targeting a managed web app, valid once `project` exists.
pub fn managed_config(project: &Path) -> AgentConfig {
    AgentConfig {
        settings: AgentSettings {
            tenant_id: TENANT.to_string(),
            subscription_id: SUBSCRIPTION.to_string(),
            resource_group: "rg-agent".to_string(),
            location: "westeurope".to_string(),
            plan_name: "plan-agent".to_string(),
            plan_sku: "B1".to_string(),
            web_app_name: "agent-web".to_string(),
            agent_identity_name: "agent-identity".to_string(),
            blueprint_name: "agent-blueprint".to_string(),
            project_path: project.to_path_buf(),
            hosting: HostingMode::ManagedWebApp,
            messaging_endpoint: None,
            self_contained: false,
        },
        state: AgentState::default(),
    }
}

/// Config for an externally hosted messaging endpoint.
pub fn external_config(project: &Path) -> AgentConfig {
    let mut config = managed_config(project);
    config.settings.subscription_id = String::new();
    config.settings.resource_group = String::new();
    config.settings.location = String::new();
    config.settings.plan_name = String::new();
    config.settings.web_app_name = String::new();
    config.settings.hosting = HostingMode::ExternalEndpoint;
    config.settings.messaging_endpoint = Some("https://agent.example.com/api".to_string());
    config
}

/// Build request staging into `<work>/publish` and archiving as deploy.zip.
pub fn request(project: &Path, work: &Path) -> BuildRequest {
    BuildRequest {
        resource_group: "rg-agent".to_string(),
        app_name: "agent-web".to_string(),
        project_path: project.to_path_buf(),
        archive_name: "deploy.zip".to_string(),
        publish_dir: work.join("publish"),
        platform_override: None,
    }
}

/// Writes a Node.js project with build and start scripts.
pub fn node_project(dir: &Path) {
    std::fs::create_dir_all(dir).expect("create project dir");
    std::fs::write(
        dir.join("package.json"),
        r#"{"name": "agent", "scripts": {"build": "tsc", "start": "node index.js"}}"#,
    )
    .expect("write package.json");
}
