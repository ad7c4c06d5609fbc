//! Ordered permission-grant sequencing against the identity provider.
//!
//! The chain per resource is strict: OAuth2 grant, then inheritable
//! permissions, then admin consent. Each step commits independently and
//! there is no cross-step rollback; recovery is re-running the sequence,
//! which converges because every step replaces rather than duplicates.

pub mod graph;

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::{AgentConfig, InheritableStatus};
use crate::error::{HoistError, HoistResult};
use crate::retry::{CancellationToken, RetryPolicy, retry, retry_transient};
use crate::tooling::ToolingManifest;

/// Service principal resolved from the identity provider.
#[derive(Debug, Clone)]
pub struct ServicePrincipal {
    /// Object id.
    pub id: String,
    pub app_id: String,
    pub display_name: String,
}

/// An OAuth2 permission grant between two service principals.
#[derive(Debug, Clone)]
pub struct OAuth2Grant {
    pub id: String,
    pub client_sp_id: String,
    pub resource_sp_id: String,
    pub scopes: Vec<String>,
}

/// Outcome of configuring inheritable permissions on the blueprint.
#[derive(Debug, Clone, Copy)]
pub struct InheritableOutcome {
    pub pre_existed: bool,
}

/// Identity-provider contract consumed by the sequencer.
pub trait IdentityClient {
    fn service_principal_by_app_id(&self, app_id: &str) -> HoistResult<Option<ServicePrincipal>>;

    /// Find the grant for a (client, resource) service-principal pair.
    fn find_grant(&self, client_sp_id: &str, resource_sp_id: &str)
    -> HoistResult<Option<OAuth2Grant>>;

    fn create_grant(
        &self,
        client_sp_id: &str,
        resource_sp_id: &str,
        scopes: &[String],
    ) -> HoistResult<OAuth2Grant>;

    /// Overwrite the scope set of an existing grant.
    fn replace_grant_scopes(&self, grant_id: &str, scopes: &[String]) -> HoistResult<()>;

    fn configure_inheritable_permissions(
        &self,
        blueprint_app_id: &str,
        resource_app_id: &str,
        scopes: &[String],
    ) -> HoistResult<InheritableOutcome>;
}

/// Progress through the grant chain for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPhase {
    Idle,
    OAuth2GrantApplied,
    InheritablePermissionsConfigured,
    AdminConsentGranted,
    Done,
}

/// What happened for one resource application.
#[derive(Debug, Clone)]
pub struct ResourceGrantOutcome {
    pub resource_name: String,
    pub resource_app_id: String,
    pub scopes: Vec<String>,
    /// True when an existing OAuth2 grant was replaced instead of created.
    pub oauth_grant_replaced: bool,
    pub inheritable_pre_existed: bool,
    /// True when an existing admin-consent grant was replaced.
    pub admin_grant_replaced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GrantSummary {
    pub resources: Vec<ResourceGrantOutcome>,
}

/// Executes the ordered grant chain for every resource in the tooling
/// manifest.
pub struct GrantSequencer<'a> {
    client: &'a dyn IdentityClient,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> GrantSequencer<'a> {
    pub fn new(client: &'a dyn IdentityClient, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    /// Run the sequence. `checkpoint` is invoked after each resource's
    /// consent record is updated, so partial progress survives a failure
    /// at a later resource.
    pub fn run(
        &self,
        manifest: &ToolingManifest,
        config: &mut AgentConfig,
        mut checkpoint: impl FnMut(&AgentConfig) -> HoistResult<()>,
    ) -> HoistResult<GrantSummary> {
        let blueprint_app_id = config.state.blueprint_app_id.clone().ok_or_else(|| {
            HoistError::permission_grant("No blueprint application is recorded")
                .with_remediation(["Run `hoist deploy app` first to provision the identity resources"])
        })?;
        let agent_app_id = config.state.agent_app_id.clone().ok_or_else(|| {
            HoistError::permission_grant("No agentic application is recorded")
                .with_remediation(["Run `hoist deploy app` first to provision the identity resources"])
        })?;

        let blueprint_sp = self.resolve_sp(&blueprint_app_id, "blueprint application")?;
        let agent_sp = self.resolve_sp(&agent_app_id, "agentic application")?;

        let mut summary = GrantSummary::default();
        for (audience, (name, scopes)) in group_by_audience(manifest) {
            let outcome = self.apply_resource(
                &blueprint_sp,
                &agent_sp,
                &blueprint_app_id,
                &name,
                &audience,
                &scopes,
                config,
            )?;
            summary.resources.push(outcome);
            checkpoint(config)?;
        }
        Ok(summary)
    }

    /// Drive one resource through the phase chain.
    #[allow(clippy::too_many_arguments)]
    fn apply_resource(
        &self,
        blueprint_sp: &ServicePrincipal,
        agent_sp: &ServicePrincipal,
        blueprint_app_id: &str,
        resource_name: &str,
        resource_app_id: &str,
        scopes: &[String],
        config: &mut AgentConfig,
    ) -> HoistResult<ResourceGrantOutcome> {
        let mut phase = GrantPhase::Idle;
        info!(resource = resource_name, ?scopes, ?phase, "applying permission grants");

        let resource_sp = self.resolve_sp(resource_app_id, resource_name)?;

        // 1. OAuth2 grant: blueprint -> resource.
        let oauth_grant_replaced = self.apply_grant(
            &blueprint_sp.id,
            &resource_sp.id,
            scopes,
            "OAuth2 grant",
            resource_name,
        )?;
        phase = GrantPhase::OAuth2GrantApplied;
        debug!(resource = resource_name, ?phase, "phase complete");

        // 2. Inheritable permissions on the blueprint application.
        let inheritable = self.retried("inheritable permissions", resource_name, || {
            self.client
                .configure_inheritable_permissions(blueprint_app_id, resource_app_id, scopes)
        });
        let inheritable = match inheritable {
            Ok(outcome) => {
                let consent = config.state.consent_mut(resource_name, resource_app_id);
                consent.inheritable = InheritableStatus::Configured;
                consent.inheritable_error = None;
                outcome
            }
            Err(err) => {
                // Step 1 stays committed; record the failure and surface it.
                let consent = config.state.consent_mut(resource_name, resource_app_id);
                consent.inheritable = InheritableStatus::Failed;
                consent.inheritable_error = Some(err.summary.clone());
                return Err(err);
            }
        };
        phase = GrantPhase::InheritablePermissionsConfigured;
        debug!(resource = resource_name, ?phase, "phase complete");

        // 3. Admin consent grant: agentic app -> resource.
        let admin_grant_replaced = self.apply_grant(
            &agent_sp.id,
            &resource_sp.id,
            scopes,
            "admin consent grant",
            resource_name,
        )?;
        phase = GrantPhase::AdminConsentGranted;
        debug!(resource = resource_name, ?phase, "phase complete");

        let consent = config.state.consent_mut(resource_name, resource_app_id);
        consent.scopes = scopes.to_vec();
        consent.granted = true;
        consent.granted_at = Some(Utc::now());
        consent.consent_url = Some(format!(
            "https://login.microsoftonline.com/{}/adminconsent?client_id={}",
            config.settings.tenant_id, blueprint_app_id
        ));

        phase = GrantPhase::Done;
        debug!(resource = resource_name, ?phase, "grants applied");

        Ok(ResourceGrantOutcome {
            resource_name: resource_name.to_string(),
            resource_app_id: resource_app_id.to_string(),
            scopes: scopes.to_vec(),
            oauth_grant_replaced,
            inheritable_pre_existed: inheritable.pre_existed,
            admin_grant_replaced,
        })
    }

    /// Create or replace the grant for a pair. Returns true when an
    /// existing grant was replaced.
    fn apply_grant(
        &self,
        client_sp_id: &str,
        resource_sp_id: &str,
        scopes: &[String],
        operation: &str,
        resource_name: &str,
    ) -> HoistResult<bool> {
        let existing = self.retried(operation, resource_name, || {
            self.client.find_grant(client_sp_id, resource_sp_id)
        })?;

        match existing {
            Some(grant) => {
                if grant.scopes == scopes {
                    debug!(resource = resource_name, operation, "grant already converged");
                    return Ok(false);
                }
                self.retried(operation, resource_name, || {
                    self.client.replace_grant_scopes(&grant.id, scopes)
                })?;
                Ok(true)
            }
            None => {
                self.retried(operation, resource_name, || {
                    self.client.create_grant(client_sp_id, resource_sp_id, scopes)
                })?;
                Ok(false)
            }
        }
    }

    fn resolve_sp(&self, app_id: &str, description: &str) -> HoistResult<ServicePrincipal> {
        let found = self.retried("service principal lookup", description, || {
            self.client.service_principal_by_app_id(app_id)
        })?;
        found.ok_or_else(|| {
            HoistError::permission_grant(format!(
                "No service principal found for {description} ({app_id})"
            ))
            .with_remediation([
                "Verify the tenant in your configuration is the one the application lives in",
                "Re-authenticate and re-run the command",
            ])
        })
    }

    /// Run a step through the retry orchestrator, wrapping failures with
    /// the operation and resource so operators can tell which step broke.
    fn retried<T>(
        &self,
        operation: &str,
        resource_name: &str,
        mut step: impl FnMut() -> HoistResult<T>,
    ) -> HoistResult<T> {
        retry(&self.policy, &self.cancel, retry_transient, |_| {
            step().map_err(|err| {
                if err.kind == crate::error::ErrorKind::PermissionGrant {
                    return err;
                }
                let transient = err.transient;
                let mut wrapped = HoistError::permission_grant(format!(
                    "{operation} failed for '{resource_name}'"
                ))
                .with_reason(err.summary.clone())
                .with_remediation([
                    "Verify the tenant id and that your account can grant admin consent",
                    "Re-authenticate and re-run; completed steps are skipped",
                ])
                .with_source(anyhow::Error::new(err));
                if transient {
                    wrapped = wrapped.with_transient();
                }
                wrapped
            })
        })
    }
}

/// Group manifest servers by resource audience, unioning their scopes.
/// Scope fields may carry several space-separated scopes.
fn group_by_audience(manifest: &ToolingManifest) -> BTreeMap<String, (String, Vec<String>)> {
    let mut grouped: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
    for server in &manifest.servers {
        let entry = grouped
            .entry(server.audience.clone())
            .or_insert_with(|| (server.name.clone(), Vec::new()));
        for scope in server.scope.split_whitespace() {
            entry.1.push(scope.to_string());
        }
    }
    for (_, (_, scopes)) in grouped.iter_mut() {
        scopes.sort();
        scopes.dedup();
    }
    grouped
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// In-memory identity provider for sequencer tests.
    #[derive(Default)]
    pub struct MockIdentity {
        pub principals: Vec<ServicePrincipal>,
        pub grants: RefCell<Vec<OAuth2Grant>>,
        pub inheritable: RefCell<Vec<(String, String, Vec<String>)>>,
        pub calls: RefCell<Vec<String>>,
        /// When set, inheritable configuration fails with this message.
        pub inheritable_failure: Option<String>,
    }

    impl MockIdentity {
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

    impl IdentityClient for MockIdentity {
        fn service_principal_by_app_id(
            &self,
            app_id: &str,
        ) -> HoistResult<Option<ServicePrincipal>> {
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
            self.calls
                .borrow_mut()
                .push(format!("create:{client_sp_id}->{resource_sp_id}"));
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
            self.calls.borrow_mut().push(format!("replace:{grant_id}"));
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
            if let Some(message) = &self.inheritable_failure {
                return Err(HoistError::permission_grant(message.clone()));
            }
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
}
