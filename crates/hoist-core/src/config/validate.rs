//! Pre-flight validation of the agent configuration.
//!
//! Must report zero issues before any provisioning or deployment step runs.

use url::Url;

use crate::error::{HoistError, HoistResult};

use super::schema::{AgentConfig, HostingMode};

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Configuration field the issue refers to.
    pub field: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

fn is_guid(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() != 5 {
        return false;
    }
    let lens = [8, 4, 4, 4, 12];
    parts
        .iter()
        .zip(lens)
        .all(|(part, len)| part.len() == len && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Validate the configuration. Requirements differ between managed web-app
/// hosting and an externally hosted messaging endpoint.
pub fn validate(config: &AgentConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let settings = &config.settings;

    if settings.tenant_id.is_empty() {
        issues.push(ValidationIssue::new("tenant_id", "tenant id is required"));
    } else if !is_guid(&settings.tenant_id) {
        issues.push(ValidationIssue::new("tenant_id", "tenant id must be a GUID"));
    }

    if settings.agent_identity_name.is_empty() {
        issues.push(ValidationIssue::new(
            "agent_identity_name",
            "agent identity name is required",
        ));
    }
    if settings.blueprint_name.is_empty() {
        issues.push(ValidationIssue::new(
            "blueprint_name",
            "blueprint name is required",
        ));
    }

    if !settings.project_path.is_dir() {
        issues.push(ValidationIssue::new(
            "project_path",
            format!(
                "project path does not exist: {}",
                settings.project_path.display()
            ),
        ));
    }

    match settings.hosting {
        HostingMode::ManagedWebApp => {
            if settings.subscription_id.is_empty() {
                issues.push(ValidationIssue::new(
                    "subscription_id",
                    "subscription id is required for managed web-app hosting",
                ));
            } else if !is_guid(&settings.subscription_id) {
                issues.push(ValidationIssue::new(
                    "subscription_id",
                    "subscription id must be a GUID",
                ));
            }
            for (field, value) in [
                ("resource_group", &settings.resource_group),
                ("location", &settings.location),
                ("plan_name", &settings.plan_name),
                ("web_app_name", &settings.web_app_name),
            ] {
                if value.is_empty() {
                    issues.push(ValidationIssue::new(
                        field,
                        format!("{field} is required for managed web-app hosting"),
                    ));
                }
            }
        }
        HostingMode::ExternalEndpoint => match &settings.messaging_endpoint {
            None => issues.push(ValidationIssue::new(
                "messaging_endpoint",
                "messaging endpoint is required when hosting externally",
            )),
            Some(endpoint) => match Url::parse(endpoint) {
                Ok(url) if url.scheme() == "https" => {}
                Ok(_) => issues.push(ValidationIssue::new(
                    "messaging_endpoint",
                    "messaging endpoint must use https",
                )),
                Err(e) => issues.push(ValidationIssue::new(
                    "messaging_endpoint",
                    format!("messaging endpoint is not a valid URL: {e}"),
                )),
            },
        },
    }

    issues
}

/// Validate and convert findings into a single validation error.
pub fn ensure_valid(config: &AgentConfig) -> HoistResult<()> {
    let issues = validate(config);
    if issues.is_empty() {
        return Ok(());
    }
    let remediation: Vec<String> = issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect();
    Err(
        HoistError::validation(format!("Configuration has {} issue(s)", issues.len()))
            .with_reason("The configuration must validate cleanly before provisioning or deploying")
            .with_remediation(remediation),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AgentSettings, AgentState};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn valid_config(project: PathBuf) -> AgentConfig {
        AgentConfig {
            settings: AgentSettings {
                tenant_id: "11111111-1111-1111-1111-111111111111".to_string(),
                subscription_id: "22222222-2222-2222-2222-222222222222".to_string(),
                resource_group: "rg-agent".to_string(),
                location: "westeurope".to_string(),
                plan_name: "plan-agent".to_string(),
                plan_sku: "B1".to_string(),
                web_app_name: "agent-web".to_string(),
                agent_identity_name: "agent-identity".to_string(),
                blueprint_name: "agent-blueprint".to_string(),
                project_path: project,
                hosting: HostingMode::ManagedWebApp,
                messaging_endpoint: None,
                self_contained: false,
            },
            state: AgentState::default(),
        }
    }

    #[test]
    fn valid_managed_config_passes() {
        let temp = TempDir::new().unwrap();
        let config = valid_config(temp.path().to_path_buf());
        assert!(validate(&config).is_empty());
        assert!(ensure_valid(&config).is_ok());
    }

    #[test]
    fn managed_hosting_requires_web_app_fields() {
        let temp = TempDir::new().unwrap();
        let mut config = valid_config(temp.path().to_path_buf());
        config.settings.web_app_name.clear();
        config.settings.plan_name.clear();
        let issues = validate(&config);
        assert!(issues.iter().any(|i| i.field == "web_app_name"));
        assert!(issues.iter().any(|i| i.field == "plan_name"));
    }

    #[test]
    fn external_hosting_requires_https_endpoint_instead() {
        let temp = TempDir::new().unwrap();
        let mut config = valid_config(temp.path().to_path_buf());
        config.settings.hosting = HostingMode::ExternalEndpoint;
        config.settings.subscription_id.clear();
        config.settings.resource_group.clear();
        config.settings.plan_name.clear();
        config.settings.web_app_name.clear();
        config.settings.location.clear();

        let issues = validate(&config);
        assert!(issues.iter().any(|i| i.field == "messaging_endpoint"));
        assert!(!issues.iter().any(|i| i.field == "web_app_name"));

        config.settings.messaging_endpoint = Some("https://bot.example.com/api".to_string());
        assert!(validate(&config).is_empty());

        config.settings.messaging_endpoint = Some("http://bot.example.com/api".to_string());
        assert!(
            validate(&config)
                .iter()
                .any(|i| i.message.contains("https"))
        );
    }

    #[test]
    fn malformed_guids_are_rejected() {
        let temp = TempDir::new().unwrap();
        let mut config = valid_config(temp.path().to_path_buf());
        config.settings.tenant_id = "not-a-guid".to_string();
        assert!(validate(&config).iter().any(|i| i.field == "tenant_id"));
    }

    #[test]
    fn ensure_valid_lists_issues_in_remediation() {
        let temp = TempDir::new().unwrap();
        let mut config = valid_config(temp.path().to_path_buf());
        config.settings.web_app_name.clear();
        let err = ensure_valid(&config).unwrap_err();
        assert!(err.remediation.iter().any(|s| s.contains("web_app_name")));
    }
}
