//! Hosting manifest generation and deployment archive packaging.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use zip::write::SimpleFileOptions;

use crate::build::BuiltArtifact;
use crate::error::{HoistError, HoistResult};
use crate::platform::Platform;

/// File name of the hosting manifest inside the publish tree.
pub const MANIFEST_FILE: &str = "hosting.json";

/// Declarative manifest telling the hosting runtime how to start (and
/// optionally build) the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingManifest {
    pub platform: Platform,
    pub runtime_version: String,
    pub run_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    pub build_required: bool,
}

fn runtime_version(platform: Platform) -> &'static str {
    match platform {
        Platform::DotNet => "8.0",
        Platform::NodeJs => "20",
        Platform::Python => "3.11",
        Platform::Unknown => "",
    }
}

fn default_run_command(platform: Platform, app_name: &str) -> String {
    match platform {
        Platform::DotNet => format!("dotnet {app_name}.dll"),
        Platform::NodeJs => "node index.js".to_string(),
        Platform::Python => "python app.py".to_string(),
        Platform::Unknown => String::new(),
    }
}

fn build_command(platform: Platform) -> Option<String> {
    match platform {
        Platform::DotNet => None,
        Platform::NodeJs => Some("npm install".to_string()),
        Platform::Python => Some("pip install --pre -r requirements.txt".to_string()),
        Platform::Unknown => None,
    }
}

/// Generate the hosting manifest and zip the publish directory into
/// `archive_path`, overwriting any prior archive.
pub fn package(
    artifact: &BuiltArtifact,
    platform: Platform,
    app_name: &str,
    archive_path: &Path,
) -> HoistResult<(HostingManifest, PathBuf)> {
    let manifest = HostingManifest {
        platform,
        runtime_version: runtime_version(platform).to_string(),
        run_command: artifact
            .startup
            .clone()
            .unwrap_or_else(|| default_run_command(platform, app_name)),
        build_command: build_command(platform),
        // Only a --restart reuse marks the artifact as prebuilt.
        build_required: !artifact.reused,
    };

    let manifest_path = artifact.publish_dir.join(MANIFEST_FILE);
    let content = serde_json::to_string_pretty(&manifest)
        .map_err(|e| HoistError::internal("Could not serialize hosting manifest").with_reason(e.to_string()))?;
    std::fs::write(&manifest_path, content).map_err(|e| {
        HoistError::internal(format!(
            "Could not write hosting manifest: {}",
            manifest_path.display()
        ))
        .with_source(anyhow::Error::new(e))
    })?;

    zip_directory(&artifact.publish_dir, archive_path)?;
    info!(
        archive = %archive_path.display(),
        run_command = %manifest.run_command,
        "packaged deployment archive"
    );
    Ok((manifest, archive_path.to_path_buf()))
}

/// Zip `dir` into `archive_path` with forward-slash entry names.
fn zip_directory(dir: &Path, archive_path: &Path) -> HoistResult<()> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HoistError::internal(format!("Could not create {}", parent.display()))
                .with_source(anyhow::Error::new(e))
        })?;
    }
    let file = std::fs::File::create(archive_path).map_err(|e| {
        HoistError::internal(format!("Could not create archive: {}", archive_path.display()))
            .with_source(anyhow::Error::new(e))
    })?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    add_dir_entries(&mut writer, dir, dir, archive_path, options)?;

    writer
        .finish()
        .map_err(|e| HoistError::internal("Could not finalize archive").with_reason(e.to_string()))?;
    Ok(())
}

fn add_dir_entries(
    writer: &mut zip::ZipWriter<std::fs::File>,
    root: &Path,
    dir: &Path,
    archive_path: &Path,
    options: SimpleFileOptions,
) -> HoistResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        HoistError::internal(format!("Could not read {}", dir.display()))
            .with_source(anyhow::Error::new(e))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            HoistError::internal("Could not enumerate publish directory")
                .with_source(anyhow::Error::new(e))
        })?;
        let path = entry.path();
        // The archive may be created inside the tree being zipped.
        if path == archive_path {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|e| HoistError::internal("Path outside publish root").with_reason(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if path.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|e| HoistError::internal("Could not add archive directory").with_reason(e.to_string()))?;
            add_dir_entries(writer, root, &path, archive_path, options)?;
        } else {
            writer
                .start_file(name, options)
                .map_err(|e| HoistError::internal("Could not start archive entry").with_reason(e.to_string()))?;
            let mut source = std::fs::File::open(&path).map_err(|e| {
                HoistError::internal(format!("Could not read {}", path.display()))
                    .with_source(anyhow::Error::new(e))
            })?;
            let mut buffer = Vec::new();
            source.read_to_end(&mut buffer).map_err(|e| {
                HoistError::internal(format!("Could not read {}", path.display()))
                    .with_source(anyhow::Error::new(e))
            })?;
            writer.write_all(&buffer).map_err(|e| {
                HoistError::internal("Could not write archive entry")
                    .with_source(anyhow::Error::new(e))
            })?;
        }
    }
    Ok(())
}
