//! Node.js build strategy: install dependencies, run the build script when
//! one is declared, then copy the project tree into the publish directory.

use std::path::Path;

use serde_json::Value;

use crate::error::{BuildFailure, HoistError, HoistResult};

use super::runner::ToolRunner;
use super::{copy_tree, map_tool_error};

struct NodeProject {
    has_lockfile: bool,
    has_build_script: bool,
    has_start_script: bool,
}

fn inspect(project_path: &Path) -> HoistResult<NodeProject> {
    let manifest_path = project_path.join("package.json");
    let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
        HoistError::build(
            BuildFailure::Install,
            format!("Failed to read {}", manifest_path.display()),
        )
        .with_source(anyhow::Error::new(e))
    })?;
    let manifest: Value = serde_json::from_str(&content).map_err(|e| {
        HoistError::build(BuildFailure::Install, "package.json is not valid JSON")
            .with_reason(e.to_string())
            .with_remediation(["Fix the reported JSON error in package.json"])
    })?;

    let scripts = manifest.get("scripts").and_then(Value::as_object);
    Ok(NodeProject {
        has_lockfile: project_path.join("package-lock.json").is_file(),
        has_build_script: scripts.is_some_and(|s| s.contains_key("build")),
        has_start_script: scripts.is_some_and(|s| s.contains_key("start")),
    })
}

/// Planned commands, for `--dry-run`.
pub fn plan(project_path: &Path, publish_dir: &Path) -> Vec<String> {
    let mut steps = Vec::new();
    match inspect(project_path) {
        Ok(project) => {
            steps.push(if project.has_lockfile {
                "npm ci".to_string()
            } else {
                "npm install".to_string()
            });
            if project.has_build_script {
                steps.push("npm run build".to_string());
            }
        }
        Err(_) => steps.push("npm install".to_string()),
    }
    steps.push(format!("copy project tree to {}", publish_dir.display()));
    steps
}

/// Install, optionally build, and stage the project. Returns the startup
/// command when the project declares a start script.
pub fn build(
    runner: &dyn ToolRunner,
    project_path: &Path,
    publish_dir: &Path,
) -> HoistResult<Option<String>> {
    let project = inspect(project_path)?;

    let install_args: &[&str] = if project.has_lockfile { &["ci"] } else { &["install"] };
    runner
        .run("npm", install_args, project_path)
        .map_err(|e| map_tool_error(e, BuildFailure::Install, "npm install"))?;

    // Absence of a build script is not an error.
    if project.has_build_script {
        runner
            .run("npm", &["run", "build"], project_path)
            .map_err(|e| map_tool_error(e, BuildFailure::Compile, "npm run build"))?;
    } else {
        tracing::debug!("package.json declares no build script, skipping build step");
    }

    // The publish tree includes node_modules so the host does not need a
    // second install.
    copy_tree(project_path, publish_dir, &[".git"])?;

    Ok(project.has_start_script.then(|| "npm start".to_string()))
}
