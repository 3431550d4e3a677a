//! Skill execution harness.
//!
//! Skill code is model-generated, so every side effect it attempts goes
//! through a mediator that decides whether it is permitted and records
//! that it was attempted:
//!
//! 1. [`ExecutionContext`] — immutable scope and quotas, built once per run
//! 2. [`ScopedDocumentApi`] — tenant/project boundary, type allowlist, creation quota
//! 3. [`ExternalCallMediator`] — domain allowlist, per-domain rate limit
//! 4. [`OperationAuditLog`] — append-only trail of allowed and blocked attempts
//!
//! [`ExecutionHarness`] wires these together for one run and exports the
//! audit trail as an [`AuditSummary`] when the run ends.
pub mod audit;
pub mod context;
pub mod error;
pub mod external;
pub mod fetch;
pub mod harness;
pub mod scoped_api;

pub use audit::{AuditEntry, AuditSummary, Operation, OperationAuditLog};
pub use context::{ContextOverrides, ExecutionContext, TriggerRun};
pub use error::{HarnessError, Result};
pub use external::{ExternalCallMediator, UrlCheck};
pub use fetch::{FetchSettings, FetchedPage};
pub use harness::ExecutionHarness;
pub use scoped_api::ScopedDocumentApi;
