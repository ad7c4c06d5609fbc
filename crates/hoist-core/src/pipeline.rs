//! The deployment pipeline: detect, build, package, provision, upload.
//!
//! Single-threaded and sequential; each phase depends on the previous
//! phase's output. State is persisted at the end of each phase that
//! mutates it, so a failed run resumes from recorded progress.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::build::{BuildOrchestrator, BuildRequest, BuiltArtifact, DeployFlags, ToolRunner};
use crate::config::{AgentConfig, DeploymentRecord, HostingMode, StateStore, ensure_valid};
use crate::error::{HoistError, HoistResult};
use crate::grants::{GrantSequencer, GrantSummary, IdentityClient};
use crate::package;
use crate::platform::{self, Platform};
use crate::provision::{
    CloudClient, IdentitySpec, PlanSpec, Provisioner, ResourceGroupSpec, WebApp, WebAppSpec,
};
use crate::retry::{CancellationToken, RetryPolicy, retry, retry_transient};
use crate::tooling::ToolingManifest;

/// Blocking pause between packaging and upload, the only user-interaction
/// point in an otherwise unattended pipeline.
pub trait InspectGate {
    /// Returns `false` when the operator declines to continue.
    fn pause(&self, archive: &Path) -> HoistResult<bool>;
}

/// Gate that never pauses; used when `--inspect` is absent and in tests.
#[derive(Debug, Default)]
pub struct AutoApprove;

impl InspectGate for AutoApprove {
    fn pause(&self, _archive: &Path) -> HoistResult<bool> {
        Ok(true)
    }
}

/// Outcome of a deploy invocation.
#[derive(Debug)]
pub struct DeploySummary {
    pub platform: Platform,
    pub dry_run: bool,
    /// Planned steps; populated for `--dry-run` only.
    pub planned: Vec<String>,
    pub archive: Option<PathBuf>,
    pub web_app: Option<WebApp>,
    pub uploaded: bool,
}

pub struct DeploymentPipeline<'a> {
    store: &'a StateStore,
    cloud: &'a dyn CloudClient,
    runner: &'a dyn ToolRunner,
    gate: &'a dyn InspectGate,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> DeploymentPipeline<'a> {
    pub fn new(
        store: &'a StateStore,
        cloud: &'a dyn CloudClient,
        runner: &'a dyn ToolRunner,
        gate: &'a dyn InspectGate,
    ) -> Self {
        Self {
            store,
            cloud,
            runner,
            gate,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deploy the agent application.
    pub fn deploy(
        &self,
        config: &mut AgentConfig,
        request: &BuildRequest,
        flags: &DeployFlags,
    ) -> HoistResult<DeploySummary> {
        // 1. Validate: zero issues before anything runs.
        ensure_valid(config)?;

        // 2. Detect the platform once.
        let platform = match request.platform_override {
            Some(platform) => platform,
            None => platform::detect(&request.project_path)?,
        };
        if platform == Platform::Unknown {
            return Err(platform::unknown_platform_error(&request.project_path));
        }

        // 3. Build (or reuse with --restart, or plan with --dry-run).
        let orchestrator = BuildOrchestrator::new(self.runner, config.settings.self_contained);
        let artifact = orchestrator.build(request, platform, flags)?;

        if flags.dry_run {
            return Ok(self.plan_summary(config, request, platform, &artifact));
        }

        // 4. Package: hosting manifest plus deployment archive.
        let archive_path = archive_path(request);
        let (_, archive) = package::package(&artifact, platform, &request.app_name, &archive_path)?;

        // 5. Inspect pause, when requested. Declining aborts with no side
        // effects beyond the local archive.
        if flags.inspect && !self.gate.pause(&archive)? {
            return Err(HoistError::cancelled());
        }

        // 6. Externally hosted endpoints skip the cloud phase entirely.
        if config.settings.hosting == HostingMode::ExternalEndpoint {
            config.state.last_deployment = Some(DeploymentRecord {
                platform,
                archive: request.archive_name.clone(),
                web_app_name: None,
                deployed_at: Utc::now(),
            });
            self.store.save(config)?;
            info!(archive = %archive.display(), "archive ready for external hosting");
            return Ok(DeploySummary {
                platform,
                dry_run: false,
                planned: Vec::new(),
                archive: Some(archive),
                web_app: None,
                uploaded: false,
            });
        }

        // 7. Provision infrastructure, each step through the retry
        // orchestrator. Order matters: the web app references the plan.
        let web_app = self.provision(config)?;
        self.store.save(config)?;

        // 8. Upload the archive.
        retry(&self.policy, &self.cancel, retry_transient, |_| {
            self.cloud.upload_package(&web_app, &archive)
        })?;
        info!(web_app = %web_app.name, "deployment archive uploaded");

        // 9. Record the deployment.
        config.state.last_deployment = Some(DeploymentRecord {
            platform,
            archive: request.archive_name.clone(),
            web_app_name: Some(web_app.name.clone()),
            deployed_at: Utc::now(),
        });
        self.store.save(config)?;

        Ok(DeploySummary {
            platform,
            dry_run: false,
            planned: Vec::new(),
            archive: Some(archive),
            web_app: Some(web_app),
            uploaded: true,
        })
    }

    fn provision(&self, config: &mut AgentConfig) -> HoistResult<WebApp> {
        let settings = &config.settings;
        let provisioner = Provisioner::new(self.cloud, self.cancel.clone());

        let group_spec = ResourceGroupSpec {
            name: settings.resource_group.clone(),
            location: settings.location.clone(),
        };
        let group = retry(&self.policy, &self.cancel, retry_transient, |_| {
            provisioner.ensure_resource_group(&group_spec)
        })?;
        info!(
            resource_group = %group.resource.name,
            existed = group.existed,
            "resource group ready"
        );

        let plan_spec = PlanSpec {
            name: settings.plan_name.clone(),
            resource_group: settings.resource_group.clone(),
            location: settings.location.clone(),
            sku: settings.plan_sku.clone(),
        };
        let plan = retry(&self.policy, &self.cancel, retry_transient, |_| {
            provisioner.ensure_plan(&plan_spec)
        })?;
        info!(plan = %plan.resource.name, existed = plan.existed, "app service plan ready");

        let web_app_spec = WebAppSpec {
            name: settings.web_app_name.clone(),
            resource_group: settings.resource_group.clone(),
            location: settings.location.clone(),
            plan_id: plan.resource.id.clone(),
        };
        let web_app = retry(&self.policy, &self.cancel, retry_transient, |_| {
            provisioner.ensure_web_app(&web_app_spec)
        })?;
        info!(web_app = %web_app.resource.name, existed = web_app.existed, "web app ready");

        let identity_spec = IdentitySpec {
            name: settings.agent_identity_name.clone(),
            resource_group: settings.resource_group.clone(),
            location: settings.location.clone(),
        };
        let identity = retry(&self.policy, &self.cancel, retry_transient, |_| {
            provisioner.ensure_identity(&identity_spec)
        })?;
        info!(
            identity = %identity.resource.name,
            existed = identity.existed,
            "managed identity ready"
        );

        config.state.managed_identity_id = Some(identity.resource.id.clone());
        config.state.managed_identity_principal_id = Some(identity.resource.principal_id.clone());

        Ok(web_app.resource)
    }

    /// Apply the permission grants required by the tooling manifest.
    ///
    /// Runs as a separate phase from `deploy`. Consent records are saved
    /// after each resource completes, so a failure at resource N keeps
    /// resources 1..N-1 on disk.
    pub fn grant_permissions(
        &self,
        config: &mut AgentConfig,
        manifest: &ToolingManifest,
        identity: &dyn IdentityClient,
    ) -> HoistResult<GrantSummary> {
        ensure_valid(config)?;

        let sequencer = GrantSequencer::new(identity, self.policy.clone(), self.cancel.clone());
        let result = sequencer.run(manifest, config, |snapshot| self.store.save(snapshot));
        if result.is_err() {
            // A failed step may have recorded its error in a consent entry;
            // keep that visible for the next run.
            let _ = self.store.save(config);
        }
        let summary = result?;
        info!(resources = summary.resources.len(), "permission grants applied");
        Ok(summary)
    }

    fn plan_summary(
        &self,
        config: &AgentConfig,
        request: &BuildRequest,
        platform: Platform,
        artifact: &BuiltArtifact,
    ) -> DeploySummary {
        let settings = &config.settings;
        let mut planned = artifact.planned.clone();
        planned.push(format!(
            "write hosting manifest and create archive '{}'",
            request.archive_name
        ));
        if settings.hosting == HostingMode::ManagedWebApp {
            planned.push(format!(
                "ensure resource group '{}' in {}",
                settings.resource_group, settings.location
            ));
            planned.push(format!(
                "ensure app service plan '{}' ({})",
                settings.plan_name, settings.plan_sku
            ));
            planned.push(format!("ensure web app '{}'", settings.web_app_name));
            planned.push(format!(
                "ensure managed identity '{}'",
                settings.agent_identity_name
            ));
            planned.push(format!(
                "upload '{}' to web app '{}'",
                request.archive_name, settings.web_app_name
            ));
        }
        DeploySummary {
            platform,
            dry_run: true,
            planned,
            archive: None,
            web_app: None,
            uploaded: false,
        }
    }
}

/// The archive is written next to the publish directory.
pub fn archive_path(request: &BuildRequest) -> PathBuf {
    match request.publish_dir.parent() {
        Some(parent) => parent.join(&request.archive_name),
        None => PathBuf::from(&request.archive_name),
    }
}
