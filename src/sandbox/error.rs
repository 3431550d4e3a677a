use thiserror::Error;

use crate::documents::RepositoryError;

/// Errors raised by the harness and its mediators.
///
/// Every variant except `InvalidContext` is produced by a mediated
/// operation, and that operation has already been written to the audit
/// log by the time the error reaches the caller.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Malformed construction input. Fatal to harness construction.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Tenant or project boundary violation.
    #[error("scope error: {0}")]
    Scope(String),

    /// Disallowed document type, disallowed domain, or deletion.
    #[error("policy error: {0}")]
    Policy(String),

    /// Document creation or per-domain rate limit exceeded.
    #[error("quota error: {0}")]
    Quota(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A permitted outbound call failed at the transport level.
    #[error("network error: {0}")]
    Network(String),
}

impl HarnessError {
    /// Stable snake_case label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::InvalidContext(_) => "invalid_context",
            HarnessError::Scope(_) => "scope",
            HarnessError::Policy(_) => "policy",
            HarnessError::Quota(_) => "quota",
            HarnessError::NotFound(_) => "not_found",
            HarnessError::Repository(_) => "repository",
            HarnessError::Network(_) => "network",
        }
    }

    /// True for the errors that mean "the sandbox said no", as opposed to
    /// lookups or backends failing.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            HarnessError::Scope(_) | HarnessError::Policy(_) | HarnessError::Quota(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
