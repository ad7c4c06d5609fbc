//! Typed errors surfaced to the operator.
//!
//! Every failure that escapes the core carries an error kind, a reason,
//! ordered remediation steps, and a stable code so the CLI can map it to
//! an exit code and targeted guidance.

use std::fmt;

/// Result type alias using [`HoistError`].
pub type HoistResult<T> = Result<T, HoistError>;

/// Classified resource-provisioning failures.
///
/// Each variant carries a disjoint mitigation path; see
/// [`ErrorKind::exit_code`] for how they surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFailure {
    /// Subscription-level limit reached for the requested SKU/region.
    QuotaExceeded,
    /// Requested SKU is not supported in the requested region.
    SkuNotAvailable,
    /// Caller lacks Contributor/Owner rights on the subscription.
    AuthorizationFailed,
    /// Creation likely succeeded but existence polling ran out of budget.
    VerificationTimeout,
    /// Web app name violates global uniqueness.
    NameTaken,
    /// Unclassified provider failure.
    Other,
}

/// Which build step failed, so the CLI can give targeted guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFailure {
    /// Build tool binary not found on PATH.
    MissingTool,
    /// Dependency restore failed.
    Restore,
    /// Compilation/publish failed.
    Compile,
    /// Package installation failed.
    Install,
    /// Copying project files into the publish directory failed.
    CopyFailed,
    /// `--restart` was requested but no publish artifact exists.
    ArtifactMissing,
}

/// Top-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration. Never retried.
    Validation,
    /// Missing or expired credentials.
    Authentication,
    /// Cloud resource provisioning failure.
    Resource(ResourceFailure),
    /// Platform build/restore/publish failure. Never retried.
    Build(BuildFailure),
    /// Identity-provider permission-grant step failure.
    PermissionGrant,
    /// A transient failure that survived every retry attempt.
    RetryExhausted,
    /// The operator cancelled the run.
    Cancelled,
    /// Unexpected failure; the operator is asked to file a report.
    Internal,
}

impl ErrorKind {
    /// Process exit code for this kind, per the CLI contract.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::Validation => 2,
            ErrorKind::Authentication => 3,
            ErrorKind::Resource(_) => 4,
            ErrorKind::Build(_) => 5,
            ErrorKind::PermissionGrant => 6,
            ErrorKind::RetryExhausted => 7,
            ErrorKind::Cancelled => 8,
        }
    }

    /// Stable error code shown to the operator.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "HOIST-CONFIG",
            ErrorKind::Authentication => "HOIST-AUTH",
            ErrorKind::Resource(ResourceFailure::QuotaExceeded) => "HOIST-RES-QUOTA",
            ErrorKind::Resource(ResourceFailure::SkuNotAvailable) => "HOIST-RES-SKU",
            ErrorKind::Resource(ResourceFailure::AuthorizationFailed) => "HOIST-RES-AUTHZ",
            ErrorKind::Resource(ResourceFailure::VerificationTimeout) => "HOIST-RES-TIMEOUT",
            ErrorKind::Resource(ResourceFailure::NameTaken) => "HOIST-RES-NAME",
            ErrorKind::Resource(ResourceFailure::Other) => "HOIST-RES",
            ErrorKind::Build(BuildFailure::MissingTool) => "HOIST-BUILD-TOOL",
            ErrorKind::Build(BuildFailure::Restore) => "HOIST-BUILD-RESTORE",
            ErrorKind::Build(BuildFailure::Compile) => "HOIST-BUILD-COMPILE",
            ErrorKind::Build(BuildFailure::Install) => "HOIST-BUILD-INSTALL",
            ErrorKind::Build(BuildFailure::CopyFailed) => "HOIST-BUILD-COPY",
            ErrorKind::Build(BuildFailure::ArtifactMissing) => "HOIST-BUILD-ARTIFACT",
            ErrorKind::PermissionGrant => "HOIST-GRANT",
            ErrorKind::RetryExhausted => "HOIST-RETRY",
            ErrorKind::Cancelled => "HOIST-CANCELLED",
            ErrorKind::Internal => "HOIST-INTERNAL",
        }
    }

    /// User errors print without a source chain; system errors print the
    /// chain and prompt for a report.
    pub fn is_user_error(self) -> bool {
        !matches!(
            self,
            ErrorKind::Internal
                | ErrorKind::RetryExhausted
                | ErrorKind::Resource(ResourceFailure::VerificationTimeout)
        )
    }
}

/// Error surfaced to the operator.
#[derive(Debug, thiserror::Error)]
#[error("{summary}")]
pub struct HoistError {
    /// Classified kind; drives exit code and rendering.
    pub kind: ErrorKind,
    /// Short description of what failed.
    pub summary: String,
    /// Underlying reason, when known.
    pub reason: Option<String>,
    /// Ordered, concrete remediation steps.
    pub remediation: Vec<String>,
    /// Whether the retry orchestrator may re-attempt the operation.
    pub transient: bool,
    /// Underlying cause, shown for system errors only.
    #[source]
    pub source: Option<anyhow::Error>,
}

impl HoistError {
    pub fn new(kind: ErrorKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            reason: None,
            remediation: Vec::new(),
            transient: false,
            source: None,
        }
    }

    pub fn validation(summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, summary)
    }

    pub fn authentication(summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, summary)
    }

    pub fn resource(failure: ResourceFailure, summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource(failure), summary)
    }

    pub fn build(failure: BuildFailure, summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::Build(failure), summary)
    }

    pub fn permission_grant(summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionGrant, summary)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Operation cancelled by the operator")
    }

    pub fn internal(summary: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, summary)
    }

    /// Wrap the last error after exhausting every retry attempt.
    pub fn retry_exhausted(attempts: u32, last: HoistError) -> Self {
        let mut err = Self::new(
            ErrorKind::RetryExhausted,
            format!("Operation failed after {attempts} attempts: {}", last.summary),
        );
        err.reason = last.reason.clone();
        err.remediation = vec![
            "Check your network connection and service health".to_string(),
            "Re-run the command; completed steps are skipped".to_string(),
        ];
        err.source = Some(anyhow::Error::new(last));
        err
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_remediation<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remediation = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Mark this error as retryable by the retry orchestrator.
    pub fn with_transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceFailure::QuotaExceeded => "quota exceeded",
            ResourceFailure::SkuNotAvailable => "SKU not available",
            ResourceFailure::AuthorizationFailed => "authorization failed",
            ResourceFailure::VerificationTimeout => "verification timeout",
            ResourceFailure::NameTaken => "name taken",
            ResourceFailure::Other => "provisioning failure",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let kinds = [
            ErrorKind::Internal,
            ErrorKind::Validation,
            ErrorKind::Authentication,
            ErrorKind::Resource(ResourceFailure::QuotaExceeded),
            ErrorKind::Build(BuildFailure::Compile),
            ErrorKind::PermissionGrant,
            ErrorKind::RetryExhausted,
            ErrorKind::Cancelled,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn resource_failures_share_exit_code_but_not_error_code() {
        let quota = ErrorKind::Resource(ResourceFailure::QuotaExceeded);
        let sku = ErrorKind::Resource(ResourceFailure::SkuNotAvailable);
        assert_eq!(quota.exit_code(), sku.exit_code());
        assert_ne!(quota.code(), sku.code());
    }

    #[test]
    fn retry_exhausted_preserves_last_error() {
        let last = HoistError::resource(ResourceFailure::Other, "create failed")
            .with_reason("connection reset")
            .with_transient();
        let wrapped = HoistError::retry_exhausted(3, last);
        assert_eq!(wrapped.kind, ErrorKind::RetryExhausted);
        assert!(wrapped.summary.contains("create failed"));
        assert_eq!(wrapped.reason.as_deref(), Some("connection reset"));
        assert!(wrapped.source.is_some());
    }

    #[test]
    fn verification_timeout_is_not_a_user_error() {
        assert!(!ErrorKind::Resource(ResourceFailure::VerificationTimeout).is_user_error());
        assert!(ErrorKind::Resource(ResourceFailure::QuotaExceeded).is_user_error());
        assert!(ErrorKind::Validation.is_user_error());
        assert!(!ErrorKind::Internal.is_user_error());
    }
}
