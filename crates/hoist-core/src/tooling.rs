//! Tooling manifest: which MCP servers the deployed agent depends on.
//!
//! Read-only input; drives which scopes the grant sequencer requests.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HoistError, HoistResult};

/// One required tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServer {
    /// Server name, unique within the manifest.
    pub name: String,
    /// Server endpoint URL.
    pub url: String,
    /// Delegated scope the agent needs on this server.
    pub scope: String,
    /// Application id of the resource the scope belongs to.
    pub audience: String,
}

/// The parsed tooling manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolingManifest {
    #[serde(default)]
    pub servers: Vec<ToolServer>,
}

impl ToolingManifest {
    /// Load and validate a tooling manifest from disk.
    pub fn load(path: &Path) -> HoistResult<Self> {
        if !path.exists() {
            return Err(HoistError::validation(format!(
                "Tooling manifest not found: {}",
                path.display()
            ))
            .with_remediation([
                "Create a tooling manifest listing the MCP servers your agent uses",
                "Each entry needs a name, url, scope, and audience",
            ]));
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(|e| HoistError::validation("Tooling manifest is not readable").with_source(e))?;
        let manifest: ToolingManifest = serde_json::from_str(&content).map_err(|e| {
            HoistError::validation(format!("Tooling manifest is not valid JSON: {}", path.display()))
                .with_reason(e.to_string())
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> HoistResult<()> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(HoistError::validation(
                    "Tooling manifest has a server with an empty name",
                ));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(HoistError::validation(format!(
                    "Duplicate server name in tooling manifest: '{}'",
                    server.name
                )));
            }
            Url::parse(&server.url).map_err(|e| {
                HoistError::validation(format!(
                    "Server '{}' has an invalid URL: {}",
                    server.name, server.url
                ))
                .with_reason(e.to_string())
            })?;
            if server.scope.is_empty() {
                return Err(HoistError::validation(format!(
                    "Server '{}' declares no scope",
                    server.name
                )));
            }
            if server.audience.is_empty() {
                return Err(HoistError::validation(format!(
                    "Server '{}' declares no audience",
                    server.name
                )));
            }
        }
        Ok(())
    }
}
