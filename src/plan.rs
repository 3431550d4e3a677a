//! Recorded action plans and their replay through a harness.
//!
//! A plan is a JSON file holding a trigger run, the repository state to
//! seed, and the ordered actions a skill attempted. Replaying it shows
//! exactly which actions the sandbox would permit and what the audit
//! trail would contain.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::documents::{Document, DocumentKind, DocumentUpdate, InMemoryRepository, Organization, Project};
use crate::sandbox::{AuditSummary, ExecutionHarness, FetchedPage, HarnessError, TriggerRun, UrlCheck};

#[derive(Debug, Clone, Deserialize)]
pub struct ActionPlan {
    pub trigger_run: TriggerRun,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub documents: Vec<SeedDocument>,
    pub actions: Vec<Action>,
}

/// A document present in the repository before the run starts.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedDocument {
    pub id: i64,
    #[serde(rename = "document_type")]
    pub kind: DocumentKind,
    pub name: String,
    #[serde(default)]
    pub content: String,
    pub organization_id: i64,
    #[serde(default)]
    pub project_id: Option<i64>,
}

/// One attempted skill action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    GetDocument {
        id: i64,
    },
    ListDocuments {
        #[serde(default)]
        document_type: Option<DocumentKind>,
    },
    CreateDocument {
        document_type: DocumentKind,
        name: String,
        #[serde(default)]
        content: String,
    },
    UpdateDocument {
        id: i64,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    DeleteDocument {
        id: i64,
    },
    CheckUrl {
        url: String,
    },
    ExternalCall {
        url: String,
    },
    Fetch {
        url: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::GetDocument { .. } => "get_document",
            Action::ListDocuments { .. } => "list_documents",
            Action::CreateDocument { .. } => "create_document",
            Action::UpdateDocument { .. } => "update_document",
            Action::DeleteDocument { .. } => "delete_document",
            Action::CheckUrl { .. } => "check_url",
            Action::ExternalCall { .. } => "external_call",
            Action::Fetch { .. } => "fetch",
        }
    }
}

/// What a permitted action handed back to the skill.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Document(Document),
    Documents(Vec<Document>),
    Page(FetchedPage),
    Json(Value),
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub index: usize,
    pub action: &'static str,
    pub ok: bool,
    /// True when the sandbox refused the action, as opposed to it failing.
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ActionOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub results: Vec<ActionResult>,
    pub audit: AuditSummary,
}

impl ActionPlan {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading plan {path}"))?;
        serde_json::from_str(&content).with_context(|| format!("parsing plan {path}"))
    }

    /// Builds the repository state the plan expects.
    pub fn seed_repository(&self) -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        for org in &self.organizations {
            repo = repo.with_organization(org.id, &org.name);
        }
        for project in &self.projects {
            repo = repo.with_project(project.id, project.organization_id, &project.name);
        }
        let now = Utc::now();
        for seed in &self.documents {
            repo.insert_document(Document {
                id: seed.id,
                kind: seed.kind,
                name: seed.name.clone(),
                content: seed.content.clone(),
                organization_id: seed.organization_id,
                project_id: seed.project_id,
                created_at: now,
                updated_at: now,
            });
        }
        repo
    }

    /// Replays every action, continuing past blocked ones.
    ///
    /// Blocking: fetch actions perform real HTTP requests. Async callers
    /// should run this on a blocking worker.
    pub fn replay(&self, config: &HarnessConfig) -> Result<PlanReport> {
        let repository = Arc::new(self.seed_repository());
        let harness = ExecutionHarness::with_fetch_settings(
            &self.trigger_run,
            repository,
            &config.overrides(),
            config.fetch_settings(),
        )
        .context("building execution harness")?;

        let results = self
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                let outcome = run_action(&harness, action);
                match outcome {
                    Ok(output) => ActionResult {
                        index,
                        action: action.name(),
                        ok: true,
                        blocked: false,
                        error_kind: None,
                        error: None,
                        output,
                    },
                    Err(e) => {
                        if e.is_blocked() {
                            info!("Action #{index} ({}) blocked: {e}", action.name());
                        } else {
                            warn!("Action #{index} ({}) failed: {e}", action.name());
                        }
                        ActionResult {
                            index,
                            action: action.name(),
                            ok: false,
                            blocked: e.is_blocked(),
                            error_kind: Some(e.kind()),
                            error: Some(e.to_string()),
                            output: None,
                        }
                    }
                }
            })
            .collect::<Vec<_>>();

        let audit = harness.get_audit_log();
        info!(
            "Replayed {} actions: {} succeeded, {} blocked operations",
            results.len(),
            results.iter().filter(|r| r.ok).count(),
            audit.blocked_operations
        );

        Ok(PlanReport { results, audit })
    }
}

fn run_action(harness: &ExecutionHarness, action: &Action) -> Result<Option<ActionOutput>, HarnessError> {
    let api = harness.api();
    let external = harness.external();
    let output = match action {
        Action::GetDocument { id } => ActionOutput::Document(api.get_document(*id)?),
        Action::ListDocuments { document_type } => ActionOutput::Documents(api.list_documents(*document_type)?),
        Action::CreateDocument {
            document_type,
            name,
            content,
        } => ActionOutput::Document(api.create_document(*document_type, name, content)?),
        Action::UpdateDocument { id, name, content } => {
            let update = DocumentUpdate {
                name: name.clone(),
                content: content.clone(),
            };
            ActionOutput::Document(api.update_document(*id, &update)?)
        }
        Action::DeleteDocument { id } => {
            api.delete_document(*id)?;
            return Ok(None);
        }
        Action::CheckUrl { url } => ActionOutput::Json(match external.is_allowed(url) {
            UrlCheck::Allowed { domain } => json!({ "allowed": true, "domain": domain }),
            UrlCheck::Denied { reason } => json!({ "allowed": false, "reason": reason }),
        }),
        Action::ExternalCall { url } => {
            let domain = external.check_and_record(url)?;
            ActionOutput::Json(json!({ "domain": domain, "calls": external.calls_to(&domain) }))
        }
        Action::Fetch { url } => ActionOutput::Page(external.fetch(url)?),
    };
    Ok(Some(output))
}
