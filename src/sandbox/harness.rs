use std::sync::Arc;

use tracing::info;

use super::audit::{AuditRecorder, AuditSummary};
use super::context::{ContextOverrides, ExecutionContext, TriggerRun};
use super::error::Result;
use super::external::ExternalCallMediator;
use super::fetch::FetchSettings;
use super::scoped_api::ScopedDocumentApi;
use crate::documents::{DocumentRepository, Organization, Project};

/// Sandbox facade for one skill run.
///
/// Owns the context, the audit log, and the two mediators built against
/// them. The mediators returned by [`api`](Self::api) and
/// [`external`](Self::external) are the only document and network
/// handles a skill ever receives.
///
/// One harness serves one run. Concurrent workers each build their own.
pub struct ExecutionHarness {
    context: Arc<ExecutionContext>,
    audit: AuditRecorder,
    api: ScopedDocumentApi,
    external: ExternalCallMediator,
}

impl ExecutionHarness {
    /// Builds a harness with default transport settings.
    pub fn from_trigger_run(
        run: &TriggerRun,
        repository: Arc<dyn DocumentRepository>,
        overrides: &ContextOverrides,
    ) -> Result<Self> {
        Self::with_fetch_settings(run, repository, overrides, FetchSettings::default())
    }

    /// Same as [`from_trigger_run`](Self::from_trigger_run) with
    /// configured transport limits, for the plan replay.
    pub(crate) fn with_fetch_settings(
        run: &TriggerRun,
        repository: Arc<dyn DocumentRepository>,
        overrides: &ContextOverrides,
        fetch: FetchSettings,
    ) -> Result<Self> {
        let context = Arc::new(ExecutionContext::from_trigger_run(run, overrides)?);
        let audit = AuditRecorder::new(context.trigger_run_id());

        info!(
            trigger_run_id = context.trigger_run_id(),
            organization_id = context.organization_id(),
            project_id = ?context.project_id(),
            source = %format!("{}:{}", context.source_type(), context.source_id()),
            max_documents = context.max_documents_per_run(),
            rate_limit = context.rate_limit_per_domain(),
            "Execution harness ready"
        );

        Ok(Self {
            api: ScopedDocumentApi::new(context.clone(), repository, audit.clone()),
            external: ExternalCallMediator::new(context.clone(), audit.clone(), fetch),
            context,
            audit,
        })
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn organization(&self) -> Result<Organization> {
        self.api.organization()
    }

    pub fn project(&self) -> Result<Option<Project>> {
        self.api.project()
    }

    pub fn api(&self) -> &ScopedDocumentApi {
        &self.api
    }

    pub fn external(&self) -> &ExternalCallMediator {
        &self.external
    }

    /// Snapshot of everything attempted so far, for the caller to persist.
    pub fn get_audit_log(&self) -> AuditSummary {
        let summary = self.audit.summary();
        info!(
            trigger_run_id = summary.trigger_run_id,
            entries = summary.entry_count,
            blocked = summary.blocked_operations,
            documents_created = summary.documents_created,
            "Audit log exported"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{DocumentKind, InMemoryRepository};
    use crate::sandbox::audit::Operation;
    use crate::sandbox::error::HarnessError;

    fn trigger_run(org: i64, project: Option<i64>) -> TriggerRun {
        TriggerRun {
            id: 501,
            organization_id: org,
            project_id: project,
            source_type: "email_message".to_string(),
            source_id: 42,
        }
    }

    fn repo() -> Arc<InMemoryRepository> {
        Arc::new(
            InMemoryRepository::new()
                .with_organization(1, "Acme")
                .with_organization(2, "Globex")
                .with_project(10, 1, "Website"),
        )
    }

    #[test]
    fn test_invalid_trigger_run_fails_construction() {
        let err = ExecutionHarness::from_trigger_run(&trigger_run(0, None), repo(), &ContextOverrides::default())
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::InvalidContext(_)));
    }

    #[test]
    fn test_organization_and_project_delegate() {
        let harness =
            ExecutionHarness::from_trigger_run(&trigger_run(1, Some(10)), repo(), &ContextOverrides::default())
                .unwrap();
        assert_eq!(harness.organization().unwrap().name, "Acme");
        assert_eq!(harness.project().unwrap().unwrap().id, 10);
        assert_eq!(harness.context().trigger_run_id(), 501);
    }

    #[test]
    fn test_end_to_end_document_quota() {
        let overrides = ContextOverrides {
            max_documents_per_run: Some(2),
            ..Default::default()
        };
        let harness = ExecutionHarness::from_trigger_run(&trigger_run(1, None), repo(), &overrides).unwrap();

        harness.api().create_document(DocumentKind::Markdown, "First", "# 1").unwrap();
        harness.api().create_document(DocumentKind::Markdown, "Second", "# 2").unwrap();
        let err = harness
            .api()
            .create_document(DocumentKind::Markdown, "Third", "# 3")
            .unwrap_err();
        assert!(matches!(err, HarnessError::Quota(_)));

        let summary = harness.get_audit_log();
        assert_eq!(summary.trigger_run_id, 501);
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.blocked_operations, 1);
        assert_eq!(summary.documents_created, 2);
    }

    #[test]
    fn test_both_mediators_write_one_ordered_log() {
        let harness =
            ExecutionHarness::from_trigger_run(&trigger_run(1, None), repo(), &ContextOverrides::default()).unwrap();

        let doc = harness.api().create_document(DocumentKind::Text, "notes", "hello").unwrap();
        harness.external().check_and_record("https://en.wikipedia.org/wiki/Rust").unwrap();
        let _ = harness.api().delete_document(doc.id);
        let _ = harness.external().check_and_record("https://pastebin.com/raw/abc");
        harness.api().get_document(doc.id).unwrap();

        let summary = harness.get_audit_log();
        let ops: Vec<Operation> = summary.entries.iter().map(|e| e.operation).collect();
        assert_eq!(
            ops,
            vec![
                Operation::Create,
                Operation::ExternalCall,
                Operation::Delete,
                Operation::ExternalCall,
                Operation::Read,
            ]
        );
        assert_eq!(summary.blocked_operations, 2);
        assert_eq!(
            summary.blocked_operations,
            summary.entries.iter().filter(|e| !e.allowed).count()
        );
        assert_eq!(summary.documents_created, 1);
    }

    #[test]
    fn test_fresh_harness_has_fresh_counters() {
        let overrides = ContextOverrides {
            max_documents_per_run: Some(1),
            rate_limit_per_domain: Some(1),
            ..Default::default()
        };
        let repository = repo();
        for _ in 0..2 {
            let harness =
                ExecutionHarness::from_trigger_run(&trigger_run(1, None), repository.clone(), &overrides).unwrap();
            harness.api().create_document(DocumentKind::Markdown, "n", "x").unwrap();
            harness.external().check_and_record("https://duckduckgo.com/").unwrap();
            assert_eq!(harness.get_audit_log().entry_count, 2);
        }
        assert_eq!(repository.document_count(), 2);
    }

    #[test]
    fn test_partial_audit_after_blocked_operation() {
        let harness =
            ExecutionHarness::from_trigger_run(&trigger_run(2, None), repo(), &ContextOverrides::default()).unwrap();
        harness.api().create_document(DocumentKind::Markdown, "ok", "x").unwrap();
        // A run aborting here still has everything attempted so far
        assert!(harness.external().check_and_record("https://example.invalid/").is_err());
        let summary = harness.get_audit_log();
        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.blocked_operations, 1);
    }

    #[test]
    fn test_summary_serializes_for_persistence() {
        let harness =
            ExecutionHarness::from_trigger_run(&trigger_run(1, None), repo(), &ContextOverrides::default()).unwrap();
        let _ = harness.api().delete_document(1);
        let json = serde_json::to_value(harness.get_audit_log()).unwrap();
        assert_eq!(json["entry_count"], 1);
        assert_eq!(json["blocked_operations"], 1);
        assert_eq!(json["entries"][0]["operation"], "DELETE");
        assert_eq!(json["entries"][0]["reason"], "deletion not allowed");
    }
}
