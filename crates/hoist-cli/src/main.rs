//! Hoist - Agent Deployment & Permission Provisioning
//!
//! Usage:
//!   hoist deploy app              # Build, package, provision, upload
//!   hoist deploy mcp              # Apply tooling permission grants
//!   hoist deploy app --dry-run    # Print the plan without executing
//!   hoist deploy app --restart    # Reuse the existing publish artifact
//!   hoist deploy app --inspect    # Pause after packaging, before upload

mod inspect;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hoist_core::prelude::*;

use crate::inspect::TerminalInspectGate;

#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "Agent deployment & permission provisioning", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the agent configuration file
    #[arg(long, global = true, default_value = "hoist.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the agent application or its MCP permission grants
    Deploy {
        /// What to deploy
        target: DeployTarget,

        /// Reuse the existing publish artifact; skip all build steps
        #[arg(long)]
        restart: bool,

        /// Pause after packaging to inspect the archive before upload
        #[arg(long)]
        inspect: bool,

        /// Print the planned steps without executing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DeployTarget {
    /// The agent application: build, package, provision, upload
    App,
    /// Permission grants for the MCP servers in the tooling manifest
    Mcp,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "hoist=debug,info"
    } else {
        "hoist=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            render_error(&err);
            ExitCode::from(err.kind.exit_code())
        }
    }
}

fn run(cli: &Cli) -> HoistResult<()> {
    let Commands::Deploy {
        target,
        restart,
        inspect,
        dry_run,
    } = &cli.command;

    let flags = DeployFlags {
        restart: *restart,
        inspect: *inspect,
        dry_run: *dry_run,
    };

    let store = StateStore::from_path(&cli.config);
    let mut config = store.load()?;

    let tokens = Arc::new(TokenCache::new());
    let provider: Arc<dyn TokenProvider> = Arc::new(AzCliTokenProvider);

    match target {
        DeployTarget::App => deploy_app(&store, &mut config, tokens, provider, &flags),
        DeployTarget::Mcp => deploy_mcp(&store, &mut config, tokens, provider, &flags),
    }
}

fn deploy_app(
    store: &StateStore,
    config: &mut AgentConfig,
    tokens: Arc<TokenCache>,
    provider: Arc<dyn TokenProvider>,
    flags: &DeployFlags,
) -> HoistResult<()> {
    let request = build_request(config);
    let cloud = ArmClient::new(
        &config.settings.tenant_id,
        &config.settings.subscription_id,
        tokens,
        provider,
    )?;
    let runner = SystemToolRunner;
    let gate = TerminalInspectGate;
    let pipeline = DeploymentPipeline::new(store, &cloud, &runner, &gate);

    let summary = pipeline.deploy(config, &request, flags)?;

    if summary.dry_run {
        println!("{}", style("Planned steps (dry run):").bold());
        for (index, step) in summary.planned.iter().enumerate() {
            println!("  {}. {}", index + 1, step);
        }
        return Ok(());
    }

    match (&summary.web_app, summary.uploaded) {
        (Some(web_app), true) => println!(
            "{} {} ({})",
            style("Deployed to").green().bold(),
            web_app.name,
            web_app.default_host_name
        ),
        _ => {
            if let Some(archive) = &summary.archive {
                println!(
                    "{} {}",
                    style("Archive ready for external hosting:").green().bold(),
                    archive.display()
                );
            }
        }
    }
    Ok(())
}

fn deploy_mcp(
    store: &StateStore,
    config: &mut AgentConfig,
    tokens: Arc<TokenCache>,
    provider: Arc<dyn TokenProvider>,
    flags: &DeployFlags,
) -> HoistResult<()> {
    let manifest_path = config.settings.project_path.join("tooling.json");
    let manifest = ToolingManifest::load(&manifest_path)?;

    if flags.dry_run {
        println!("{}", style("Planned grants (dry run):").bold());
        for server in &manifest.servers {
            println!("  {} -> scope '{}' on {}", server.name, server.scope, server.audience);
        }
        return Ok(());
    }

    let identity = GraphClient::new(&config.settings.tenant_id, tokens, provider)?;
    let cloud = NoCloud;
    let runner = SystemToolRunner;
    let gate = AutoApprove;
    let pipeline = DeploymentPipeline::new(store, &cloud, &runner, &gate);

    let summary = pipeline.grant_permissions(config, &manifest, &identity)?;

    for outcome in &summary.resources {
        let action = if outcome.oauth_grant_replaced {
            "updated"
        } else {
            "granted"
        };
        println!(
            "{} {} ({} scope(s))",
            style(action).green().bold(),
            outcome.resource_name,
            outcome.scopes.len()
        );
    }
    Ok(())
}

fn build_request(config: &AgentConfig) -> BuildRequest {
    let work_dir = config.settings.project_path.join(".hoist");
    BuildRequest {
        resource_group: config.settings.resource_group.clone(),
        app_name: config.settings.web_app_name.clone(),
        project_path: config.settings.project_path.clone(),
        archive_name: "deploy.zip".to_string(),
        publish_dir: work_dir.join("publish"),
        platform_override: None,
    }
}

/// Placeholder cloud for the grants path, which never touches resources.
struct NoCloud;

impl CloudClient for NoCloud {
    fn get_resource_group(
        &self,
        _name: &str,
    ) -> HoistResult<Option<hoist_core::provision::ResourceGroup>> {
        Err(unsupported())
    }
    fn create_resource_group(
        &self,
        _spec: &hoist_core::provision::ResourceGroupSpec,
    ) -> HoistResult<hoist_core::provision::ResourceGroup> {
        Err(unsupported())
    }
    fn get_plan(
        &self,
        _rg: &str,
        _name: &str,
    ) -> HoistResult<Option<hoist_core::provision::AppServicePlan>> {
        Err(unsupported())
    }
    fn create_plan(
        &self,
        _spec: &hoist_core::provision::PlanSpec,
    ) -> HoistResult<hoist_core::provision::AppServicePlan> {
        Err(unsupported())
    }
    fn get_web_app(
        &self,
        _rg: &str,
        _name: &str,
    ) -> HoistResult<Option<hoist_core::provision::WebApp>> {
        Err(unsupported())
    }
    fn create_web_app(
        &self,
        _spec: &hoist_core::provision::WebAppSpec,
    ) -> HoistResult<hoist_core::provision::WebApp> {
        Err(unsupported())
    }
    fn get_identity(
        &self,
        _rg: &str,
        _name: &str,
    ) -> HoistResult<Option<hoist_core::provision::ManagedIdentity>> {
        Err(unsupported())
    }
    fn create_identity(
        &self,
        _spec: &hoist_core::provision::IdentitySpec,
    ) -> HoistResult<hoist_core::provision::ManagedIdentity> {
        Err(unsupported())
    }
    fn upload_package(
        &self,
        _web_app: &hoist_core::provision::WebApp,
        _archive: &std::path::Path,
    ) -> HoistResult<()> {
        Err(unsupported())
    }
}

fn unsupported() -> HoistError {
    HoistError::internal("Resource operations are not available for `deploy mcp`")
}

fn render_error(err: &HoistError) {
    eprintln!(
        "{} {}",
        style(format!("error[{}]:", err.code())).red().bold(),
        err.summary
    );
    if let Some(reason) = &err.reason {
        eprintln!("  {} {}", style("reason:").dim(), reason);
    }
    if !err.remediation.is_empty() {
        eprintln!("{}", style("To fix:").bold());
        for (index, step) in err.remediation.iter().enumerate() {
            eprintln!("  {}. {}", index + 1, step);
        }
    }
    // Stack traces are for unexpected/system errors only.
    if !err.kind.is_user_error() {
        if let Some(source) = &err.source {
            eprintln!("{}", style("Caused by:").dim());
            for cause in source.chain() {
                eprintln!("  {cause}");
            }
        }
        if err.kind == ErrorKind::Internal {
            eprintln!(
                "{}",
                style("This looks like a bug in hoist; please file a report with the output above.")
                    .yellow()
            );
        }
    }
}
