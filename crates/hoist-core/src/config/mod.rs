//! Configuration loading, validation, and state persistence.

mod schema;
mod store;
mod validate;

pub use schema::{
    AgentConfig, AgentSettings, AgentState, DeploymentRecord, HostingMode, InheritableStatus,
    ResourceConsent,
};
pub use store::StateStore;
pub use validate::{ValidationIssue, ensure_valid, validate};
