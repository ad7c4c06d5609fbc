//! Project platform detection.
//!
//! A pure filesystem scan with a fixed, total precedence; no side effects.

use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{HoistError, HoistResult};

/// Build platform of an agent project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// No recognized project markers.
    Unknown,
    /// .NET project (`*.csproj`, `*.fsproj`, `*.vbproj`).
    DotNet,
    /// Node.js project (`package.json`).
    NodeJs,
    /// Python project (`requirements.txt`, `pyproject.toml`, `setup.py`, `*.py`).
    Python,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Unknown => "unknown",
            Platform::DotNet => "dotnet",
            Platform::NodeJs => "nodejs",
            Platform::Python => "python",
        };
        write!(f, "{name}")
    }
}

/// Detect the platform of the project at `project_path`.
///
/// Precedence is fixed: any .NET project file wins over `package.json`,
/// which wins over Python markers. Only the top level of the directory is
/// scanned.
pub fn detect(project_path: &Path) -> HoistResult<Platform> {
    let entries = std::fs::read_dir(project_path)
        .with_context(|| format!("Failed to read project directory: {}", project_path.display()))
        .map_err(|e| {
            HoistError::validation(format!(
                "Project directory is not readable: {}",
                project_path.display()
            ))
            .with_remediation(["Check the project path in your configuration"])
            .with_source(e)
        })?;

    let mut has_dotnet = false;
    let mut has_package_json = false;
    let mut has_python = false;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.ends_with(".csproj") || name.ends_with(".fsproj") || name.ends_with(".vbproj") {
            has_dotnet = true;
        } else if name == "package.json" {
            has_package_json = true;
        } else if name == "requirements.txt"
            || name == "pyproject.toml"
            || name == "setup.py"
            || name.ends_with(".py")
        {
            has_python = true;
        }
    }

    let platform = if has_dotnet {
        Platform::DotNet
    } else if has_package_json {
        Platform::NodeJs
    } else if has_python {
        Platform::Python
    } else {
        Platform::Unknown
    };

    tracing::debug!(path = %project_path.display(), %platform, "detected project platform");
    Ok(platform)
}

/// Error for an [`Platform::Unknown`] detection result. Terminal; not retried.
pub fn unknown_platform_error(project_path: &Path) -> HoistError {
    HoistError::validation(format!(
        "Could not determine the project platform at {}",
        project_path.display()
    ))
    .with_reason("No .NET project file, package.json, or Python markers were found")
    .with_remediation([
        "Check that the configured project path points at your agent project",
        "Supported platforms: .NET, Node.js, Python",
    ])
}
