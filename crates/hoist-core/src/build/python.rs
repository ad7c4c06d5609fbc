//! Python build strategy: stage the project tree, resolve local wheels,
//! allow pre-release packages, and pick a startup command from the agent
//! entry script.

use std::path::Path;

use crate::error::{BuildFailure, HoistError, HoistResult};

use super::runner::ToolRunner;
use super::{copy_tree, map_tool_error};

/// Directories never copied into the publish tree.
const EXCLUDED: &[&str] = &[".git", ".venv", "venv", "__pycache__", ".pytest_cache"];

/// Known agent entry scripts, probed in order.
const ENTRY_SCRIPTS: &[&str] = &["app.py", "main.py", "agent.py"];

/// Site-packages target inside the publish tree, matching the layout the
/// hosting runtime expects.
const SITE_PACKAGES: &str = ".python_packages/lib/site-packages";

/// Planned commands, for `--dry-run`.
pub fn plan(project_path: &Path, publish_dir: &Path) -> Vec<String> {
    let mut steps = vec![format!("copy project tree to {}", publish_dir.display())];
    if project_path.join("requirements.txt").is_file() {
        steps.push("rewrite requirements.txt to allow pre-release versions".to_string());
        let mut install = format!("python -m pip install --pre -r requirements.txt --target {SITE_PACKAGES}");
        if has_wheels(project_path) {
            install.push_str(" --find-links dist");
        }
        steps.push(install);
    }
    steps
}

/// Stage and install. Returns the startup command for the hosting manifest.
pub fn build(
    runner: &dyn ToolRunner,
    project_path: &Path,
    publish_dir: &Path,
) -> HoistResult<Option<String>> {
    copy_tree(project_path, publish_dir, EXCLUDED)?;

    let requirements = publish_dir.join("requirements.txt");
    if requirements.is_file() {
        let local_wheels = has_wheels(publish_dir);
        rewrite_requirements(&requirements, local_wheels)?;

        let mut args = vec![
            "-m",
            "pip",
            "install",
            "--pre",
            "-r",
            "requirements.txt",
            "--target",
            SITE_PACKAGES,
        ];
        if local_wheels {
            args.extend(["--find-links", "dist"]);
        }
        runner
            .run("python", &args, publish_dir)
            .map_err(|e| map_tool_error(e, BuildFailure::Install, "pip install"))?;
    }

    Ok(detect_startup(publish_dir))
}

fn has_wheels(dir: &Path) -> bool {
    let dist = dir.join("dist");
    std::fs::read_dir(&dist)
        .map(|entries| {
            entries.flatten().any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".whl")
            })
        })
        .unwrap_or(false)
}

/// Prepend pip directives so pre-release versions (and local wheels, when
/// present) resolve at host-side install time too.
fn rewrite_requirements(path: &Path, local_wheels: bool) -> HoistResult<()> {
    let original = std::fs::read_to_string(path).map_err(|e| {
        HoistError::build(
            BuildFailure::CopyFailed,
            format!("Failed to read {}", path.display()),
        )
        .with_source(anyhow::Error::new(e))
    })?;

    let mut rewritten = String::from("--pre\n");
    if local_wheels {
        rewritten.push_str("--find-links dist\n");
    }
    // Re-running a build must not stack directive headers.
    for line in original.lines() {
        let trimmed = line.trim();
        if trimmed == "--pre" || trimmed.starts_with("--find-links") {
            continue;
        }
        rewritten.push_str(line);
        rewritten.push('\n');
    }

    std::fs::write(path, rewritten).map_err(|e| {
        HoistError::build(
            BuildFailure::CopyFailed,
            format!("Failed to rewrite {}", path.display()),
        )
        .with_source(anyhow::Error::new(e))
    })
}

/// Choose the startup command from the first known entry script found.
///
/// ASGI apps start under uvicorn, WSGI apps under gunicorn, anything else
/// under the raw interpreter.
pub fn detect_startup(dir: &Path) -> Option<String> {
    let entry = ENTRY_SCRIPTS
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())?;
    let module = entry.file_stem()?.to_string_lossy().into_owned();
    let source = std::fs::read_to_string(&entry).unwrap_or_default();

    if source.contains("FastAPI(") || source.contains("aiohttp") || source.contains("Starlette(") {
        Some(format!(
            "python -m uvicorn {module}:app --host 0.0.0.0 --port 8000"
        ))
    } else if source.contains("Flask(") || source.contains("Bottle(") {
        Some(format!("gunicorn --bind 0.0.0.0:8000 {module}:app"))
    } else {
        Some(format!("python {}", file_name(&entry)))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
