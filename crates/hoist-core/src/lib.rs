//! Hoist Core Library
//!
//! Provides the deployment and permission-provisioning pipeline for agent
//! applications: platform detection, platform-specific builds, packaging,
//! idempotent cloud-resource provisioning, and the ordered permission-grant
//! sequence.

pub mod build;
pub mod config;
pub mod error;
pub mod grants;
pub mod identity;
pub mod package;
pub mod pipeline;
pub mod platform;
pub mod provision;
pub mod retry;
pub mod tooling;

/// Re-exports of commonly used types
pub mod prelude {
    // Errors
    pub use crate::error::{BuildFailure, ErrorKind, HoistError, HoistResult, ResourceFailure};

    // Configuration
    pub use crate::config::{
        AgentConfig, AgentSettings, AgentState, HostingMode, ResourceConsent, StateStore,
    };

    // Pipeline
    pub use crate::build::{BuildRequest, DeployFlags, SystemToolRunner};
    pub use crate::pipeline::{AutoApprove, DeploySummary, DeploymentPipeline, InspectGate};
    pub use crate::platform::Platform;

    // Clients
    pub use crate::grants::{GrantSequencer, IdentityClient, graph::GraphClient};
    pub use crate::identity::{AzCliTokenProvider, TokenCache, TokenProvider};
    pub use crate::provision::{CloudClient, Provisioner, arm::ArmClient};

    // Retry
    pub use crate::retry::{CancellationToken, RetryPolicy};

    // Tooling manifest
    pub use crate::tooling::ToolingManifest;
}
