//! Document access confined to one execution context.
//!
//! Every call goes through the same checks: tenant boundary, project
//! boundary, document-type allowlist, and the per-run creation quota.
//! Each attempt is recorded before the result (or error) is returned.

use std::sync::{Arc, Mutex};

use serde_json::json;

use super::audit::{AuditEntry, AuditRecorder, Operation};
use super::context::ExecutionContext;
use super::error::{HarnessError, Result};
use crate::documents::{
    Document, DocumentFilter, DocumentKind, DocumentRepository, DocumentUpdate, NewDocument,
    Organization, Project,
};

/// Model name used when the concrete document kind is unknown.
const GENERIC_DOCUMENT_MODEL: &str = "Document";

pub struct ScopedDocumentApi {
    context: Arc<ExecutionContext>,
    repository: Arc<dyn DocumentRepository>,
    audit: AuditRecorder,
    created: Mutex<usize>,
}

impl ScopedDocumentApi {
    pub(crate) fn new(
        context: Arc<ExecutionContext>,
        repository: Arc<dyn DocumentRepository>,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            context,
            repository,
            audit,
            created: Mutex::new(0),
        }
    }

    /// The context's organization.
    pub fn organization(&self) -> Result<Organization> {
        let id = self.context.organization_id();
        self.repository
            .organization(id)?
            .ok_or_else(|| HarnessError::NotFound(format!("organization {id}")))
    }

    /// The context's project, or `None` for an organization-wide run.
    pub fn project(&self) -> Result<Option<Project>> {
        let Some(id) = self.context.project_id() else {
            return Ok(None);
        };
        let project = self
            .repository
            .project(id)?
            .ok_or_else(|| HarnessError::NotFound(format!("project {id}")))?;
        if project.organization_id != self.context.organization_id() {
            return Err(self.deny(
                AuditEntry::blocked(Operation::Read, "Project", "project not in scope").with_object(id),
                HarnessError::Scope("project not in scope".to_string()),
            ));
        }
        Ok(Some(project))
    }

    pub fn get_document(&self, id: i64) -> Result<Document> {
        let doc = self.fetch_in_scope(Operation::Read, id)?;
        self.audit
            .record(AuditEntry::allowed(Operation::Read, doc.kind.as_model()).with_object(id));
        Ok(doc)
    }

    /// Lists the documents visible to this context, optionally narrowed
    /// to one kind. Kinds outside the allowlist are never returned.
    pub fn list_documents(&self, kind: Option<DocumentKind>) -> Result<Vec<Document>> {
        let model = kind.map_or(GENERIC_DOCUMENT_MODEL, |k| k.as_model());
        let filter = DocumentFilter {
            organization_id: self.context.organization_id(),
            project_id: self.context.project_id(),
            kind,
        };
        let docs: Vec<Document> = match self.repository.list(&filter) {
            Ok(docs) => docs
                .into_iter()
                .filter(|d| self.in_scope(d).is_none())
                .filter(|d| self.context.allows_document_type(d.kind))
                .collect(),
            Err(e) => {
                self.audit
                    .record(AuditEntry::blocked(Operation::Read, model, format!("repository error: {e}")));
                return Err(e.into());
            }
        };
        self.audit.record(
            AuditEntry::allowed(Operation::Read, model).with_detail("count", docs.len()),
        );
        Ok(docs)
    }

    pub fn create_document(&self, kind: DocumentKind, name: &str, content: &str) -> Result<Document> {
        let model = kind.as_model();

        if !self.context.allows_document_type(kind) {
            return Err(self.deny(
                AuditEntry::blocked(Operation::Create, model, "document type not allowed")
                    .with_detail("name", name),
                HarnessError::Policy("document type not allowed".to_string()),
            ));
        }

        // Held across the insert so the quota check and the increment agree
        let mut created = self.created.lock().unwrap_or_else(|e| e.into_inner());
        if *created >= self.context.max_documents_per_run() {
            return Err(self.deny(
                AuditEntry::blocked(Operation::Create, model, "document creation limit exceeded")
                    .with_detail("name", name)
                    .with_detail("limit", self.context.max_documents_per_run()),
                HarnessError::Quota("document creation limit exceeded".to_string()),
            ));
        }

        let new_doc = NewDocument {
            kind,
            name: name.to_string(),
            content: content.to_string(),
            organization_id: self.context.organization_id(),
            project_id: self.context.project_id(),
        };
        let doc = match self.repository.create(new_doc) {
            Ok(doc) => doc,
            Err(e) => {
                self.audit.record(
                    AuditEntry::blocked(Operation::Create, model, format!("repository error: {e}"))
                        .with_detail("name", name),
                );
                return Err(e.into());
            }
        };
        *created += 1;

        self.audit.record(
            AuditEntry::allowed(Operation::Create, model)
                .with_object(doc.id)
                .with_detail("name", name),
        );
        Ok(doc)
    }

    pub fn update_document(&self, id: i64, update: &DocumentUpdate) -> Result<Document> {
        let current = self.fetch_in_scope(Operation::Update, id)?;
        let model = current.kind.as_model();

        let doc = match self.repository.update(id, update) {
            Ok(doc) => doc,
            Err(e) => {
                self.audit.record(
                    AuditEntry::blocked(Operation::Update, model, format!("repository error: {e}"))
                        .with_object(id),
                );
                return Err(e.into());
            }
        };

        self.audit.record(
            AuditEntry::allowed(Operation::Update, model)
                .with_object(id)
                .with_detail("fields", json!(update.changed_fields())),
        );
        Ok(doc)
    }

    /// Deletion is never permitted. The repository is not consulted.
    pub fn delete_document(&self, id: i64) -> Result<()> {
        Err(self.deny(
            AuditEntry::blocked(Operation::Delete, GENERIC_DOCUMENT_MODEL, "deletion not allowed")
                .with_object(id),
            HarnessError::Policy("deletion not allowed".to_string()),
        ))
    }

    /// Number of documents this instance has created so far.
    pub fn documents_created(&self) -> usize {
        *self.created.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads a document and applies the tenant, project and type checks,
    /// recording a blocked `operation` on any failure. Reads, updates and
    /// listings all hide kinds outside the allowlist.
    fn fetch_in_scope(&self, operation: Operation, id: i64) -> Result<Document> {
        let doc = match self.repository.get(id) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                return Err(self.deny(
                    AuditEntry::blocked(operation, GENERIC_DOCUMENT_MODEL, "document not found").with_object(id),
                    HarnessError::NotFound(format!("document {id}")),
                ));
            }
            Err(e) => {
                self.audit.record(
                    AuditEntry::blocked(operation, GENERIC_DOCUMENT_MODEL, format!("repository error: {e}"))
                        .with_object(id),
                );
                return Err(e.into());
            }
        };

        if let Some(reason) = self.in_scope(&doc) {
            return Err(self.deny(
                AuditEntry::blocked(operation, doc.kind.as_model(), reason).with_object(id),
                HarnessError::Scope(reason.to_string()),
            ));
        }
        if !self.context.allows_document_type(doc.kind) {
            return Err(self.deny(
                AuditEntry::blocked(operation, doc.kind.as_model(), "document type not allowed").with_object(id),
                HarnessError::Policy("document type not allowed".to_string()),
            ));
        }
        Ok(doc)
    }

    /// `None` if the document is inside this context's scope, otherwise
    /// the reason it is not.
    fn in_scope(&self, doc: &Document) -> Option<&'static str> {
        if doc.organization_id != self.context.organization_id() {
            return Some("document not in scope");
        }
        match self.context.project_id() {
            Some(project_id) if doc.project_id != Some(project_id) => Some("document not in project"),
            _ => None,
        }
    }

    /// Records the blocked entry, then hands back the error to raise.
    fn deny(&self, entry: AuditEntry, err: HarnessError) -> HarnessError {
        self.audit.record(entry);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::InMemoryRepository;
    use crate::sandbox::context::{ContextOverrides, TriggerRun};
    use chrono::Utc;

    fn context(project_id: Option<i64>, overrides: ContextOverrides) -> Arc<ExecutionContext> {
        let run = TriggerRun {
            id: 100,
            organization_id: 1,
            project_id,
            source_type: "email_message".to_string(),
            source_id: 42,
        };
        Arc::new(ExecutionContext::from_trigger_run(&run, &overrides).unwrap())
    }

    fn seeded_repo() -> Arc<InMemoryRepository> {
        let repo = InMemoryRepository::new()
            .with_organization(1, "Acme")
            .with_organization(2, "Globex")
            .with_project(10, 1, "Website")
            .with_project(11, 1, "Mobile")
            .with_project(20, 2, "Globex internal");
        for (id, org, project, kind) in [
            (1, 1, None, DocumentKind::Markdown),
            (2, 1, Some(10), DocumentKind::Markdown),
            (3, 1, Some(11), DocumentKind::Text),
            (4, 2, None, DocumentKind::Markdown),
            (5, 1, Some(10), DocumentKind::Yoopta),
        ] {
            let now = Utc::now();
            repo.insert_document(Document {
                id,
                kind,
                name: format!("doc-{id}"),
                content: String::new(),
                organization_id: org,
                project_id: project,
                created_at: now,
                updated_at: now,
            });
        }
        Arc::new(repo)
    }

    fn api(project_id: Option<i64>, overrides: ContextOverrides) -> (ScopedDocumentApi, AuditRecorder) {
        let audit = AuditRecorder::new(100);
        let api = ScopedDocumentApi::new(context(project_id, overrides), seeded_repo(), audit.clone());
        (api, audit)
    }

    // ── organization / project ──────────────────────────

    #[test]
    fn test_organization_resolves() {
        let (api, _) = api(None, ContextOverrides::default());
        assert_eq!(api.organization().unwrap().name, "Acme");
    }

    #[test]
    fn test_project_none_for_org_wide_run() {
        let (api, _) = api(None, ContextOverrides::default());
        assert!(api.project().unwrap().is_none());
    }

    #[test]
    fn test_project_resolves() {
        let (api, _) = api(Some(10), ContextOverrides::default());
        assert_eq!(api.project().unwrap().unwrap().name, "Website");
    }

    #[test]
    fn test_project_of_other_organization_is_out_of_scope() {
        let (api, audit) = api(Some(20), ContextOverrides::default());
        let err = api.project().unwrap_err();
        assert!(matches!(err, HarnessError::Scope(ref m) if m == "project not in scope"));
        assert_eq!(audit.summary().blocked_operations, 1);
    }

    #[test]
    fn test_missing_project_is_not_found() {
        let (api, _) = api(Some(99), ContextOverrides::default());
        assert_eq!(api.project().unwrap_err().kind(), "not_found");
    }

    // ── get_document ────────────────────────────────────

    #[test]
    fn test_get_document_in_scope() {
        let (api, audit) = api(None, ContextOverrides::default());
        let doc = api.get_document(2).unwrap();
        assert_eq!(doc.name, "doc-2");

        let summary = audit.summary();
        assert_eq!(summary.entry_count, 1);
        assert_eq!(summary.entries[0].operation, Operation::Read);
        assert!(summary.entries[0].allowed);
    }

    #[test]
    fn test_get_document_other_organization_blocked() {
        let (api, audit) = api(None, ContextOverrides::default());
        let err = api.get_document(4).unwrap_err();
        assert!(matches!(err, HarnessError::Scope(ref m) if m == "document not in scope"));

        let summary = audit.summary();
        assert_eq!(summary.entry_count, 1);
        assert_eq!(summary.blocked_operations, 1);
        assert_eq!(summary.entries[0].operation, Operation::Read);
        assert_eq!(summary.entries[0].object_id.as_deref(), Some("4"));
    }

    #[test]
    fn test_get_document_other_project_blocked() {
        let (api, _) = api(Some(10), ContextOverrides::default());
        let err = api.get_document(3).unwrap_err();
        assert!(matches!(err, HarnessError::Scope(ref m) if m == "document not in project"));
    }

    #[test]
    fn test_get_document_without_project_blocked_for_project_run() {
        let (api, _) = api(Some(10), ContextOverrides::default());
        let err = api.get_document(1).unwrap_err();
        assert!(matches!(err, HarnessError::Scope(ref m) if m == "document not in project"));
    }

    #[test]
    fn test_get_document_missing_is_logged() {
        let (api, audit) = api(None, ContextOverrides::default());
        let err = api.get_document(404).unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let summary = audit.summary();
        assert_eq!(summary.blocked_operations, 1);
        assert_eq!(summary.entries[0].reason.as_deref(), Some("document not found"));
    }

    #[test]
    fn test_get_document_disallowed_kind_blocked() {
        let overrides = ContextOverrides {
            allowed_document_types: Some([DocumentKind::Markdown].into_iter().collect()),
            ..Default::default()
        };
        let (api, audit) = api(None, overrides);
        let err = api.get_document(3).unwrap_err();
        assert!(matches!(err, HarnessError::Policy(ref m) if m == "document type not allowed"));
        assert!(api.get_document(1).is_ok());

        let summary = audit.summary();
        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.blocked_operations, 1);
        assert_eq!(summary.entries[0].model, "TextDocument");
        assert_eq!(summary.entries[0].operation, Operation::Read);
    }

    #[test]
    fn test_out_of_scope_reported_before_disallowed_kind() {
        let overrides = ContextOverrides {
            allowed_document_types: Some([DocumentKind::Text].into_iter().collect()),
            ..Default::default()
        };
        let (api, _) = api(None, overrides);
        assert_eq!(api.get_document(4).unwrap_err().kind(), "scope");
    }

    // ── list_documents ──────────────────────────────────

    #[test]
    fn test_list_documents_org_wide() {
        let (api, audit) = api(None, ContextOverrides::default());
        let docs = api.list_documents(None).unwrap();
        let ids: Vec<i64> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 5]);
        assert_eq!(audit.summary().entries[0].detail["count"], 4);
    }

    #[test]
    fn test_list_documents_project_scoped() {
        let (api, _) = api(Some(10), ContextOverrides::default());
        let ids: Vec<i64> = api.list_documents(None).unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 5]);
    }

    #[test]
    fn test_list_documents_hides_disallowed_kinds() {
        let overrides = ContextOverrides {
            allowed_document_types: Some([DocumentKind::Markdown].into_iter().collect()),
            ..Default::default()
        };
        let (api, _) = api(None, overrides);
        let ids: Vec<i64> = api.list_documents(None).unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    // ── create_document ─────────────────────────────────

    #[test]
    fn test_create_document_lands_in_context_scope() {
        let (api, audit) = api(Some(10), ContextOverrides::default());
        let doc = api.create_document(DocumentKind::Markdown, "Summary", "# Hi").unwrap();
        assert_eq!(doc.organization_id, 1);
        assert_eq!(doc.project_id, Some(10));
        assert_eq!(api.documents_created(), 1);
        assert_eq!(audit.summary().documents_created, 1);
    }

    #[test]
    fn test_create_document_quota() {
        let overrides = ContextOverrides {
            max_documents_per_run: Some(3),
            ..Default::default()
        };
        let (api, audit) = api(None, overrides);
        for i in 0..3 {
            api.create_document(DocumentKind::Text, &format!("n{i}"), "x").unwrap();
        }
        let err = api.create_document(DocumentKind::Text, "n3", "x").unwrap_err();
        assert!(matches!(err, HarnessError::Quota(ref m) if m == "document creation limit exceeded"));
        assert_eq!(api.documents_created(), 3);

        let summary = audit.summary();
        assert_eq!(summary.entry_count, 4);
        assert_eq!(summary.blocked_operations, 1);
        assert_eq!(summary.documents_created, 3);
    }

    #[test]
    fn test_create_document_zero_quota() {
        let overrides = ContextOverrides {
            max_documents_per_run: Some(0),
            ..Default::default()
        };
        let (api, _) = api(None, overrides);
        let err = api.create_document(DocumentKind::Markdown, "n", "x").unwrap_err();
        assert_eq!(err.kind(), "quota");
    }

    #[test]
    fn test_create_document_type_not_allowed_regardless_of_quota() {
        let overrides = ContextOverrides {
            allowed_document_types: Some([DocumentKind::Markdown].into_iter().collect()),
            max_documents_per_run: Some(100),
            ..Default::default()
        };
        let (api, audit) = api(None, overrides);
        let err = api.create_document(DocumentKind::Yoopta, "board", "{}").unwrap_err();
        assert!(matches!(err, HarnessError::Policy(ref m) if m == "document type not allowed"));
        assert_eq!(api.documents_created(), 0);

        let summary = audit.summary();
        assert_eq!(summary.blocked_operations, 1);
        assert_eq!(summary.entries[0].model, "YooptaDocument");
    }

    #[test]
    fn test_policy_check_runs_before_quota_check() {
        let overrides = ContextOverrides {
            allowed_document_types: Some([DocumentKind::Markdown].into_iter().collect()),
            max_documents_per_run: Some(0),
            ..Default::default()
        };
        let (api, _) = api(None, overrides);
        let err = api.create_document(DocumentKind::Text, "n", "x").unwrap_err();
        assert_eq!(err.kind(), "policy");
    }

    // ── update_document ─────────────────────────────────

    #[test]
    fn test_update_document_in_scope() {
        let (api, audit) = api(None, ContextOverrides::default());
        let update = DocumentUpdate {
            name: Some("renamed".into()),
            content: None,
        };
        let doc = api.update_document(1, &update).unwrap();
        assert_eq!(doc.name, "renamed");

        let entry = &audit.summary().entries[0];
        assert_eq!(entry.operation, Operation::Update);
        assert!(entry.allowed);
        assert_eq!(entry.detail["fields"], json!(["name"]));
    }

    #[test]
    fn test_update_document_other_organization_blocked() {
        let (api, audit) = api(None, ContextOverrides::default());
        let err = api.update_document(4, &DocumentUpdate::default()).unwrap_err();
        assert_eq!(err.kind(), "scope");
        let entry = &audit.summary().entries[0];
        assert_eq!(entry.operation, Operation::Update);
        assert!(!entry.allowed);
    }

    #[test]
    fn test_update_document_disallowed_kind_blocked() {
        let overrides = ContextOverrides {
            allowed_document_types: Some([DocumentKind::Markdown].into_iter().collect()),
            ..Default::default()
        };
        let (api, _) = api(None, overrides);
        let err = api.update_document(3, &DocumentUpdate::default()).unwrap_err();
        assert!(matches!(err, HarnessError::Policy(ref m) if m == "document type not allowed"));
    }

    // ── delete_document ─────────────────────────────────

    #[test]
    fn test_delete_document_always_fails() {
        let (api, audit) = api(None, ContextOverrides::default());
        // In scope, out of scope, and nonexistent
        for id in [1, 4, 404] {
            let err = api.delete_document(id).unwrap_err();
            assert!(matches!(err, HarnessError::Policy(ref m) if m == "deletion not allowed"));
        }
        let summary = audit.summary();
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.blocked_operations, 3);
        assert!(summary.entries.iter().all(|e| e.operation == Operation::Delete));
    }
}
