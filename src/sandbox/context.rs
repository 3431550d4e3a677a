//! Immutable scope and quota configuration for one skill run.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{HarnessError, Result};
use super::external::normalize_domain;
use crate::documents::DocumentKind;

/// Default cap on documents created per run.
pub const DEFAULT_MAX_DOCUMENTS_PER_RUN: usize = 10;

/// Default cap on external calls per allowlisted domain per run.
pub const DEFAULT_RATE_LIMIT_PER_DOMAIN: u32 = 20;

/// Domains every context may reach. Subdomains are included.
pub const DEFAULT_ALLOWED_DOMAINS: [&str; 3] = ["wikipedia.org", "api.github.com", "duckduckgo.com"];

/// The upstream event-trigger-run record a harness is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRun {
    pub id: i64,
    pub organization_id: i64,
    #[serde(default)]
    pub project_id: Option<i64>,
    /// What triggered the run, e.g. `"email_message"`.
    pub source_type: String,
    pub source_id: i64,
}

/// Per-construction adjustments supplied by trigger configuration.
///
/// Domains are added to the built-in set, never replace it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContextOverrides {
    #[serde(default)]
    pub max_documents_per_run: Option<usize>,
    #[serde(default)]
    pub rate_limit_per_domain: Option<u32>,
    #[serde(default)]
    pub allowed_external_domains: Vec<String>,
    #[serde(default)]
    pub allowed_document_types: Option<BTreeSet<DocumentKind>>,
}

/// Scope and quotas for a single skill run.
///
/// Fields are private and there are no setters; the only way to obtain a
/// context is [`ExecutionContext::from_trigger_run`].
///
/// ```compile_fail
/// use skill_harness::sandbox::{ContextOverrides, ExecutionContext, TriggerRun};
///
/// let run = TriggerRun {
///     id: 1,
///     organization_id: 1,
///     project_id: None,
///     source_type: "email_message".into(),
///     source_id: 42,
/// };
/// let mut ctx = ExecutionContext::from_trigger_run(&run, &ContextOverrides::default()).unwrap();
/// ctx.organization_id = 2;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionContext {
    organization_id: i64,
    project_id: Option<i64>,
    trigger_run_id: i64,
    source_type: String,
    source_id: i64,
    started_at: DateTime<Utc>,
    allowed_document_types: BTreeSet<DocumentKind>,
    max_documents_per_run: usize,
    rate_limit_per_domain: u32,
    allowed_external_domains: BTreeSet<String>,
}

impl ExecutionContext {
    /// Builds a context from a trigger run, validating ids and merging the
    /// domain overrides into the built-in allowlist.
    pub fn from_trigger_run(run: &TriggerRun, overrides: &ContextOverrides) -> Result<Self> {
        if run.organization_id <= 0 {
            return Err(HarnessError::InvalidContext(
                "organization_id must be positive".to_string(),
            ));
        }
        if run.id <= 0 {
            return Err(HarnessError::InvalidContext(
                "trigger_run_id must be positive".to_string(),
            ));
        }
        if matches!(run.project_id, Some(id) if id <= 0) {
            return Err(HarnessError::InvalidContext(
                "project_id must be positive".to_string(),
            ));
        }

        let mut allowed_external_domains: BTreeSet<String> =
            DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect();
        for raw in &overrides.allowed_external_domains {
            let domain = normalize_domain(raw).ok_or_else(|| {
                HarnessError::InvalidContext(format!("invalid allowed domain: '{raw}'"))
            })?;
            allowed_external_domains.insert(domain);
        }

        Ok(Self {
            organization_id: run.organization_id,
            project_id: run.project_id,
            trigger_run_id: run.id,
            source_type: run.source_type.clone(),
            source_id: run.source_id,
            started_at: Utc::now(),
            allowed_document_types: overrides
                .allowed_document_types
                .clone()
                .unwrap_or_else(|| DocumentKind::ALL.into_iter().collect()),
            max_documents_per_run: overrides
                .max_documents_per_run
                .unwrap_or(DEFAULT_MAX_DOCUMENTS_PER_RUN),
            rate_limit_per_domain: overrides
                .rate_limit_per_domain
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_DOMAIN),
            allowed_external_domains,
        })
    }

    pub fn organization_id(&self) -> i64 {
        self.organization_id
    }

    /// `None` means the run is organization-wide.
    pub fn project_id(&self) -> Option<i64> {
        self.project_id
    }

    pub fn trigger_run_id(&self) -> i64 {
        self.trigger_run_id
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn allowed_document_types(&self) -> &BTreeSet<DocumentKind> {
        &self.allowed_document_types
    }

    pub fn allows_document_type(&self, kind: DocumentKind) -> bool {
        self.allowed_document_types.contains(&kind)
    }

    pub fn max_documents_per_run(&self) -> usize {
        self.max_documents_per_run
    }

    pub fn rate_limit_per_domain(&self) -> u32 {
        self.rate_limit_per_domain
    }

    /// Built-in domains plus overrides, normalized.
    pub fn allowed_external_domains(&self) -> &BTreeSet<String> {
        &self.allowed_external_domains
    }
}
