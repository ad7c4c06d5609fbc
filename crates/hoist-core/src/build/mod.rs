//! Platform-specific build orchestration.
//!
//! Dispatches over the closed [`Platform`] enum; one strategy module per
//! platform. Build failures identify the step that failed and are never
//! retried.

mod dotnet;
mod node;
mod python;
pub mod runner;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{BuildFailure, HoistError, HoistResult};
use crate::platform::Platform;

pub use runner::{SystemToolRunner, ToolError, ToolOutput, ToolRunner};

/// Per-invocation deployment parameters. Created per run, never persisted.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub resource_group: String,
    pub app_name: String,
    pub project_path: PathBuf,
    pub archive_name: String,
    pub publish_dir: PathBuf,
    /// Skip detection and force this platform.
    pub platform_override: Option<Platform>,
}

/// Pipeline flags shared by build, packaging, and upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployFlags {
    /// Reuse the existing publish artifact; skip every build step.
    pub restart: bool,
    /// Pause after packaging for operator inspection.
    pub inspect: bool,
    /// Print planned steps without executing any subprocess.
    pub dry_run: bool,
}

/// Output of a build: the staged publish directory plus what the packager
/// needs to know about it.
#[derive(Debug, Clone)]
pub struct BuiltArtifact {
    pub publish_dir: PathBuf,
    /// True when `--restart` reused an existing artifact.
    pub reused: bool,
    /// Startup command chosen during the build, when the strategy knows
    /// better than the platform template.
    pub startup: Option<String>,
    /// Planned steps; populated for `--dry-run` only.
    pub planned: Vec<String>,
}

/// Runs the per-platform build strategy.
pub struct BuildOrchestrator<'a> {
    runner: &'a dyn ToolRunner,
    dotnet_self_contained: bool,
}

impl<'a> BuildOrchestrator<'a> {
    pub fn new(runner: &'a dyn ToolRunner, dotnet_self_contained: bool) -> Self {
        Self {
            runner,
            dotnet_self_contained,
        }
    }

    pub fn build(
        &self,
        request: &BuildRequest,
        platform: Platform,
        flags: &DeployFlags,
    ) -> HoistResult<BuiltArtifact> {
        if flags.restart {
            return self.reuse_existing(request, platform);
        }
        if flags.dry_run {
            return Ok(BuiltArtifact {
                publish_dir: request.publish_dir.clone(),
                reused: false,
                startup: None,
                planned: self.plan(request, platform),
            });
        }

        info!(%platform, project = %request.project_path.display(), "building project");
        let startup = match platform {
            Platform::DotNet => dotnet::build(
                self.runner,
                &request.project_path,
                &request.publish_dir,
                self.dotnet_self_contained,
            )?,
            Platform::NodeJs => {
                node::build(self.runner, &request.project_path, &request.publish_dir)?
            }
            Platform::Python => {
                python::build(self.runner, &request.project_path, &request.publish_dir)?
            }
            Platform::Unknown => {
                return Err(crate::platform::unknown_platform_error(&request.project_path));
            }
        };

        Ok(BuiltArtifact {
            publish_dir: request.publish_dir.clone(),
            reused: false,
            startup,
            planned: Vec::new(),
        })
    }

    /// `--restart`: the publish artifact must already exist; there is no
    /// silent fallback to a full build.
    fn reuse_existing(
        &self,
        request: &BuildRequest,
        platform: Platform,
    ) -> HoistResult<BuiltArtifact> {
        if !request.publish_dir.is_dir() {
            return Err(HoistError::build(
                BuildFailure::ArtifactMissing,
                "No publish artifact to restart from",
            )
            .with_reason(format!(
                "Expected publish output at {}",
                request.publish_dir.display()
            ))
            .with_remediation([
                "Run a full deploy without --restart first",
                "Then use --restart to skip rebuilding",
            ]));
        }

        info!(publish_dir = %request.publish_dir.display(), "reusing existing publish artifact");
        let startup = match platform {
            Platform::Python => python::detect_startup(&request.publish_dir),
            _ => None,
        };
        Ok(BuiltArtifact {
            publish_dir: request.publish_dir.clone(),
            reused: true,
            startup,
            planned: Vec::new(),
        })
    }

    fn plan(&self, request: &BuildRequest, platform: Platform) -> Vec<String> {
        match platform {
            Platform::DotNet => dotnet::plan(&request.publish_dir, self.dotnet_self_contained),
            Platform::NodeJs => node::plan(&request.project_path, &request.publish_dir),
            Platform::Python => python::plan(&request.project_path, &request.publish_dir),
            Platform::Unknown => Vec::new(),
        }
    }
}

/// Map a tool invocation failure to a typed build error for `step`.
fn map_tool_error(err: ToolError, failure: BuildFailure, step: &str) -> HoistError {
    match &err {
        ToolError::NotFound { program } => HoistError::build(
            BuildFailure::MissingTool,
            format!("'{program}' is required for this project but was not found"),
        )
        .with_remediation([
            format!("Install {program} and make sure it is on PATH"),
            "Re-run the deploy".to_string(),
        ]),
        ToolError::Failed { .. } => {
            let mut error =
                HoistError::build(failure, format!("Build step failed: {step}")).with_remediation([
                    "Fix the reported build error locally",
                    "Re-run the deploy once the project builds",
                ]);
            if let Some(detail) = err.detail() {
                error = error.with_reason(detail);
            }
            error
        }
        ToolError::Io { program, .. } => HoistError::build(
            failure,
            format!("Failed to run '{program}' during: {step}"),
        )
        .with_source(anyhow::Error::new(err)),
    }
}

/// Recursively copy `src` into `dst`, skipping `excluded` top-level names
/// at every depth and never descending into `dst` itself.
fn copy_tree(src: &Path, dst: &Path, excluded: &[&str]) -> HoistResult<()> {
    std::fs::create_dir_all(dst).map_err(|e| copy_error(dst, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| copy_error(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| copy_error(src, e))?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if excluded.contains(&name_str.as_ref()) {
            continue;
        }
        let src_path = entry.path();
        // Never descend into the destination when it lives inside the source.
        if dst.starts_with(&src_path) {
            continue;
        }
        let dst_path = dst.join(&name);
        let file_type = entry.file_type().map_err(|e| copy_error(&src_path, e))?;
        if file_type.is_dir() {
            copy_tree(&src_path, &dst_path, excluded)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path).map_err(|e| copy_error(&src_path, e))?;
        }
        // Symlinks are skipped; the publish tree must be self-contained.
    }
    Ok(())
}

fn copy_error(path: &Path, err: std::io::Error) -> HoistError {
    HoistError::build(
        BuildFailure::CopyFailed,
        format!("Failed to stage {}", path.display()),
    )
    .with_source(anyhow::Error::new(err))
}

/// Stem of the first project file with one of `extensions`, for deriving
/// the .NET startup assembly name.
fn project_file_stem(project_path: &Path, extensions: &[&str]) -> Option<String> {
    let entries = std::fs::read_dir(project_path).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if extensions.contains(&ext) {
                return path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned());
            }
        }
    }
    None
}
