//! Idempotent cloud-resource provisioning.
//!
//! Every `ensure_*` call is get-before-create: an existing resource is a
//! no-op reported as `existed = true`, and a created resource is polled
//! until visible because visibility can lag creation. Provider failures
//! are classified into the resource-failure taxonomy, each with its own
//! mitigation path.

pub mod arm;

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{HoistError, HoistResult, ResourceFailure};
use crate::retry::CancellationToken;

/// Resource group to provision.
#[derive(Debug, Clone)]
pub struct ResourceGroupSpec {
    pub name: String,
    pub location: String,
}

/// App service plan to provision.
#[derive(Debug, Clone)]
pub struct PlanSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub sku: String,
}

/// Web app to provision, bound to an existing plan.
#[derive(Debug, Clone)]
pub struct WebAppSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub plan_id: String,
}

/// User-assigned managed identity to provision.
#[derive(Debug, Clone)]
pub struct IdentitySpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct AppServicePlan {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct WebApp {
    pub id: String,
    pub name: String,
    /// Public host name, e.g. `agent.azurewebsites.net`.
    pub default_host_name: String,
}

#[derive(Debug, Clone)]
pub struct ManagedIdentity {
    pub id: String,
    pub name: String,
    pub client_id: String,
    pub principal_id: String,
}

/// Cloud resource-management contract consumed by the provisioner.
///
/// `get_*` returns `Ok(None)` for a missing resource; `create_*` errors
/// carry the provider's code and message in their reason text so the
/// provisioner can classify them.
pub trait CloudClient {
    fn get_resource_group(&self, name: &str) -> HoistResult<Option<ResourceGroup>>;
    fn create_resource_group(&self, spec: &ResourceGroupSpec) -> HoistResult<ResourceGroup>;

    fn get_plan(&self, resource_group: &str, name: &str) -> HoistResult<Option<AppServicePlan>>;
    fn create_plan(&self, spec: &PlanSpec) -> HoistResult<AppServicePlan>;

    fn get_web_app(&self, resource_group: &str, name: &str) -> HoistResult<Option<WebApp>>;
    fn create_web_app(&self, spec: &WebAppSpec) -> HoistResult<WebApp>;

    fn get_identity(&self, resource_group: &str, name: &str)
    -> HoistResult<Option<ManagedIdentity>>;
    fn create_identity(&self, spec: &IdentitySpec) -> HoistResult<ManagedIdentity>;

    /// Upload a deployment archive to the web app.
    fn upload_package(&self, web_app: &WebApp, archive: &Path) -> HoistResult<()>;
}

/// Result of an `ensure_*` call.
#[derive(Debug, Clone)]
pub struct Ensured<T> {
    /// True when the resource already existed and nothing was created.
    pub existed: bool,
    pub resource: T,
}

/// Idempotent create-or-verify over a [`CloudClient`].
pub struct Provisioner<'a> {
    client: &'a dyn CloudClient,
    cancel: CancellationToken,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl<'a> Provisioner<'a> {
    pub fn new(client: &'a dyn CloudClient, cancel: CancellationToken) -> Self {
        Self {
            client,
            cancel,
            poll_interval: Duration::from_secs(5),
            poll_attempts: 12,
        }
    }

    /// Override the existence-polling budget (used by tests).
    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    pub fn ensure_resource_group(
        &self,
        spec: &ResourceGroupSpec,
    ) -> HoistResult<Ensured<ResourceGroup>> {
        self.ensure(
            &format!("resource group '{}'", spec.name),
            false,
            || self.client.get_resource_group(&spec.name),
            || self.client.create_resource_group(spec),
        )
    }

    pub fn ensure_plan(&self, spec: &PlanSpec) -> HoistResult<Ensured<AppServicePlan>> {
        self.ensure(
            &format!("app service plan '{}'", spec.name),
            false,
            || self.client.get_plan(&spec.resource_group, &spec.name),
            || self.client.create_plan(spec),
        )
    }

    pub fn ensure_web_app(&self, spec: &WebAppSpec) -> HoistResult<Ensured<WebApp>> {
        self.ensure(
            &format!("web app '{}'", spec.name),
            true,
            || self.client.get_web_app(&spec.resource_group, &spec.name),
            || self.client.create_web_app(spec),
        )
    }

    pub fn ensure_identity(&self, spec: &IdentitySpec) -> HoistResult<Ensured<ManagedIdentity>> {
        self.ensure(
            &format!("managed identity '{}'", spec.name),
            false,
            || self.client.get_identity(&spec.resource_group, &spec.name),
            || self.client.create_identity(spec),
        )
    }

    fn ensure<T: Clone>(
        &self,
        description: &str,
        globally_unique_name: bool,
        get: impl Fn() -> HoistResult<Option<T>>,
        create: impl FnOnce() -> HoistResult<T>,
    ) -> HoistResult<Ensured<T>> {
        if let Some(resource) = get()? {
            debug!(resource = description, "already exists, skipping creation");
            return Ok(Ensured {
                existed: true,
                resource,
            });
        }

        info!(resource = description, "creating");
        let created =
            create().map_err(|e| classify_cloud_failure(e, description, globally_unique_name))?;

        // Visibility can lag creation; poll before reporting success.
        self.await_visible(description, &get)?;
        Ok(Ensured {
            existed: false,
            resource: created,
        })
    }

    fn await_visible<T>(
        &self,
        description: &str,
        get: &impl Fn() -> HoistResult<Option<T>>,
    ) -> HoistResult<()> {
        for attempt in 1..=self.poll_attempts {
            match get() {
                Ok(Some(_)) => {
                    debug!(resource = description, attempt, "visible after creation");
                    return Ok(());
                }
                Ok(None) => {}
                // Transient read failures during propagation are tolerated.
                Err(err) => debug!(resource = description, error = %err, "existence poll failed"),
            }
            if attempt < self.poll_attempts && self.cancel.wait_timeout(self.poll_interval) {
                return Err(HoistError::cancelled());
            }
        }
        Err(HoistError::resource(
            ResourceFailure::VerificationTimeout,
            format!("Created {description} but it did not become visible in time"),
        )
        .with_reason("Creation likely succeeded; resource visibility lagged the polling budget")
        .with_remediation([
            "Re-run the command; an existing resource is detected and reused",
            "If the resource never appears, check the service health dashboard",
        ]))
    }
}

/// Refine a provider error into the resource-failure taxonomy using the
/// provider's error code and message text.
pub fn classify_cloud_failure(
    err: HoistError,
    description: &str,
    globally_unique_name: bool,
) -> HoistError {
    let text = format!(
        "{} {}",
        err.summary,
        err.reason.as_deref().unwrap_or_default()
    );
    let lower = text.to_lowercase();

    // Global-uniqueness violations get an explicit mitigation, not the
    // generic resource-failure path.
    if globally_unique_name
        && (lower.contains("already taken")
            || lower.contains("is not available")
            || lower.contains("conflict"))
    {
        return HoistError::resource(
            ResourceFailure::NameTaken,
            format!("The name for {description} is already in use"),
        )
        .with_reason(text)
        .with_remediation([
            "Choose another globally-unique name in your configuration",
            "Re-run the deploy",
        ]);
    }

    if lower.contains("quotaexceeded") || lower.contains("quota") {
        return HoistError::resource(
            ResourceFailure::QuotaExceeded,
            format!("Subscription quota exceeded while creating {description}"),
        )
        .with_reason(text)
        .with_remediation([
            "Choose a smaller SKU or a different region",
            "Or request a quota increase for the subscription",
        ]);
    }
    if lower.contains("skunotavailable")
        || lower.contains("locationnotavailableforresourcetype")
        || lower.contains("not available in region")
    {
        return HoistError::resource(
            ResourceFailure::SkuNotAvailable,
            format!("Requested SKU is not available while creating {description}"),
        )
        .with_reason(text)
        .with_remediation([
            "Choose a different SKU or region in your configuration",
        ]);
    }
    if lower.contains("authorizationfailed") || lower.contains("does not have authorization") {
        return HoistError::resource(
            ResourceFailure::AuthorizationFailed,
            format!("Not authorized to create {description}"),
        )
        .with_reason(text)
        .with_remediation([
            "Ask a subscription administrator for Contributor or Owner rights",
            "Re-run once access is granted",
        ]);
    }

    HoistError::resource(
        ResourceFailure::Other,
        format!("Failed to create {description}"),
    )
    .with_reason(text)
    .with_remediation(["Check the reported provider error and re-run"])
    .with_source(anyhow::Error::new(err))
}


#[cfg(test)]
mod tests {
    use super::testing::MockCloud;
    use super::*;
    use crate::error::ErrorKind;

    fn provisioner(cloud: &MockCloud) -> Provisioner<'_> {
        Provisioner::new(cloud, CancellationToken::new())
            .with_polling(Duration::ZERO, 3)
    }

    fn group_spec() -> ResourceGroupSpec {
        ResourceGroupSpec {
            name: "rg-agent".to_string(),
            location: "westeurope".to_string(),
        }
    }

    #[test]
    fn ensure_twice_reports_existed_second_time_without_duplicate() {
        let cloud = MockCloud::default();
        let provisioner = provisioner(&cloud);

        let first = provisioner.ensure_resource_group(&group_spec()).unwrap();
        let second = provisioner.ensure_resource_group(&group_spec()).unwrap();

        assert!(!first.existed);
        assert!(second.existed);
        assert_eq!(cloud.groups.borrow().len(), 1);
        assert_eq!(cloud.create_calls.borrow().len(), 1);
    }

    #[test]
    fn quota_failure_is_classified_with_sku_guidance() {
        let cloud = MockCloud {
            plan_failure: Some("QuotaExceeded: regional vCPU quota reached".to_string()),
            ..Default::default()
        };
        let provisioner = provisioner(&cloud);

        let err = provisioner
            .ensure_plan(&PlanSpec {
                name: "plan".to_string(),
                resource_group: "rg".to_string(),
                location: "westeurope".to_string(),
                sku: "P1v3".to_string(),
            })
            .unwrap_err();

        assert_eq!(
            err.kind,
            ErrorKind::Resource(ResourceFailure::QuotaExceeded)
        );
        assert!(err.remediation.iter().any(|s| s.contains("SKU")));
    }

    #[test]
    fn web_app_name_conflict_gets_explicit_mitigation() {
        let cloud = MockCloud {
            web_app_failure: Some("Conflict: hostname is not available".to_string()),
            ..Default::default()
        };
        let provisioner = provisioner(&cloud);

        let err = provisioner
            .ensure_web_app(&WebAppSpec {
                name: "taken-name".to_string(),
                resource_group: "rg".to_string(),
                location: "westeurope".to_string(),
                plan_id: "/plans/plan".to_string(),
            })
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Resource(ResourceFailure::NameTaken));
        assert!(err.remediation.iter().any(|s| s.contains("globally-unique")));
    }

    #[test]
    fn authorization_and_sku_failures_classify_distinctly() {
        for (text, expected) in [
            (
                "AuthorizationFailed: caller lacks permission",
                ResourceFailure::AuthorizationFailed,
            ),
            (
                "SkuNotAvailable in westeurope",
                ResourceFailure::SkuNotAvailable,
            ),
            ("something inscrutable", ResourceFailure::Other),
        ] {
            let err = classify_cloud_failure(
                HoistError::resource(ResourceFailure::Other, "create failed")
                    .with_reason(text.to_string()),
                "app service plan 'p'",
                false,
            );
            assert_eq!(err.kind, ErrorKind::Resource(expected), "{text}");
        }
    }

    #[test]
    fn verification_timeout_when_resource_never_becomes_visible() {
        // A cloud whose get always reports missing even after create.
        struct InvisibleCloud(MockCloud);
        impl CloudClient for InvisibleCloud {
            fn get_resource_group(&self, _n: &str) -> HoistResult<Option<ResourceGroup>> {
                Ok(None)
            }
            fn create_resource_group(&self, s: &ResourceGroupSpec) -> HoistResult<ResourceGroup> {
                self.0.create_resource_group(s)
            }
            fn get_plan(&self, r: &str, n: &str) -> HoistResult<Option<AppServicePlan>> {
                self.0.get_plan(r, n)
            }
            fn create_plan(&self, s: &PlanSpec) -> HoistResult<AppServicePlan> {
                self.0.create_plan(s)
            }
            fn get_web_app(&self, r: &str, n: &str) -> HoistResult<Option<WebApp>> {
                self.0.get_web_app(r, n)
            }
            fn create_web_app(&self, s: &WebAppSpec) -> HoistResult<WebApp> {
                self.0.create_web_app(s)
            }
            fn get_identity(&self, r: &str, n: &str) -> HoistResult<Option<ManagedIdentity>> {
                self.0.get_identity(r, n)
            }
            fn create_identity(&self, s: &IdentitySpec) -> HoistResult<ManagedIdentity> {
                self.0.create_identity(s)
            }
            fn upload_package(&self, a: &WebApp, p: &Path) -> HoistResult<()> {
                self.0.upload_package(a, p)
            }
        }

        let cloud = InvisibleCloud(MockCloud::default());
        let provisioner = Provisioner::new(&cloud, CancellationToken::new())
            .with_polling(Duration::ZERO, 2);

        let err = provisioner.ensure_resource_group(&group_spec()).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Resource(ResourceFailure::VerificationTimeout)
        );
        assert!(err.remediation.iter().any(|s| s.contains("Re-run")));
    }
}
