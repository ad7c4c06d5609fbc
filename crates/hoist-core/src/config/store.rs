//! Persistence for the agent configuration file.
//!
//! The file is read at pipeline start and rewritten at the end of each
//! phase that mutates state. Last-writer-wins; there is no file locking,
//! so overlapping invocations against the same file are not supported.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{HoistError, HoistResult};

use super::schema::AgentConfig;

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration. A missing file is a validation error: the
    /// static settings come from the operator, not from defaults.
    pub fn load(&self) -> HoistResult<AgentConfig> {
        if !self.path.exists() {
            return Err(HoistError::validation(format!(
                "Configuration file not found: {}",
                self.path.display()
            ))
            .with_remediation([
                "Create the configuration file or pass its location with --config",
            ]));
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
            .map_err(|e| {
                HoistError::validation("Configuration file is not readable").with_source(e)
            })?;
        serde_json::from_str(&content).map_err(|e| {
            HoistError::validation(format!(
                "Configuration file is not valid JSON: {}",
                self.path.display()
            ))
            .with_reason(e.to_string())
            .with_remediation(["Fix the reported JSON error and re-run"])
        })
    }

    /// Persist the configuration, creating parent directories as needed.
    pub fn save(&self, config: &AgentConfig) -> HoistResult<()> {
        let content = serde_json::to_string_pretty(config)
            .context("Failed to serialize configuration")
            .map_err(|e| HoistError::internal("Could not serialize configuration").with_source(e))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))
                .map_err(|e| {
                    HoistError::internal("Could not create configuration directory").with_source(e)
                })?;
        }
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
            .map_err(|e| HoistError::internal("Could not write configuration file").with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AgentSettings, AgentState, HostingMode};
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn sample_config(project: PathBuf) -> AgentConfig {
        AgentConfig {
            settings: AgentSettings {
                tenant_id: "11111111-1111-1111-1111-111111111111".to_string(),
                subscription_id: String::new(),
                resource_group: String::new(),
                location: String::new(),
                plan_name: String::new(),
                plan_sku: "B1".to_string(),
                web_app_name: String::new(),
                agent_identity_name: "identity".to_string(),
                blueprint_name: "blueprint".to_string(),
                project_path: project,
                hosting: HostingMode::ExternalEndpoint,
                messaging_endpoint: Some("https://example.com/api".to_string()),
                self_contained: false,
            },
            state: AgentState::default(),
        }
    }

    #[test]
    fn missing_file_is_a_validation_error() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::from_path(temp.path().join("hoist.json"));
        let err = store.load().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn save_then_load_roundtrips_state() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::from_path(temp.path().join("nested").join("hoist.json"));
        let mut config = sample_config(temp.path().to_path_buf());
        config.state.bot_id = Some("bot-123".to_string());
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.state.bot_id.as_deref(), Some("bot-123"));
        assert_eq!(loaded.settings.blueprint_name, "blueprint");
    }

    #[test]
    fn invalid_json_reports_the_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hoist.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = StateStore::from_path(&path).load().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.reason.is_some());
    }
}
