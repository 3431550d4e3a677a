pub mod config;
pub mod documents;
pub mod plan;
pub mod sandbox;

pub use sandbox::{
    AuditSummary, ContextOverrides, ExecutionHarness, HarnessError, TriggerRun,
};
