//! Append-only record of every mediated operation.
//!
//! Both mediators write into the same log through an [`AuditRecorder`].
//! Entries are only ever appended; history leaves the harness as an
//! [`AuditSummary`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::documents::DocumentKind;

/// Kind of operation a skill attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    ExternalCall,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "READ"),
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::ExternalCall => write!(f, "EXTERNAL_CALL"),
        }
    }
}

/// One attempted operation, permitted or blocked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
    pub allowed: bool,
    /// Always present when `allowed` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEntry {
    fn new(operation: Operation, model: impl Into<String>, allowed: bool, reason: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            model: model.into(),
            object_id: None,
            detail: Map::new(),
            allowed,
            reason,
        }
    }

    pub fn allowed(operation: Operation, model: impl Into<String>) -> Self {
        Self::new(operation, model, true, None)
    }

    pub fn blocked(operation: Operation, model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(operation, model, false, Some(reason.into()))
    }

    pub fn with_object(mut self, object_id: impl ToString) -> Self {
        self.object_id = Some(object_id.to_string());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }

    /// True for an allowed CREATE on one of the document models.
    pub fn is_document_creation(&self) -> bool {
        self.allowed
            && self.operation == Operation::Create
            && DocumentKind::is_document_model(&self.model)
    }
}

/// Read-only export of a run's audit history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditSummary {
    pub trigger_run_id: i64,
    pub entry_count: usize,
    pub blocked_operations: usize,
    pub documents_created: usize,
    pub entries: Vec<AuditEntry>,
}

/// Ordered, append-only audit log for one harness instance.
#[derive(Debug)]
pub struct OperationAuditLog {
    trigger_run_id: i64,
    entries: Vec<AuditEntry>,
}

impl OperationAuditLog {
    pub fn new(trigger_run_id: i64) -> Self {
        Self {
            trigger_run_id,
            entries: Vec::new(),
        }
    }

    /// Appends one entry. Prior entries are never touched.
    pub fn log(&mut self, entry: AuditEntry) {
        if entry.allowed {
            debug!(
                trigger_run_id = self.trigger_run_id,
                operation = %entry.operation,
                model = %entry.model,
                object_id = entry.object_id.as_deref().unwrap_or("-"),
                "operation allowed"
            );
        } else {
            warn!(
                trigger_run_id = self.trigger_run_id,
                operation = %entry.operation,
                model = %entry.model,
                object_id = entry.object_id.as_deref().unwrap_or("-"),
                reason = entry.reason.as_deref().unwrap_or(""),
                "operation blocked"
            );
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn to_summary(&self) -> AuditSummary {
        AuditSummary {
            trigger_run_id: self.trigger_run_id,
            entry_count: self.entries.len(),
            blocked_operations: self.entries.iter().filter(|e| !e.allowed).count(),
            documents_created: self.entries.iter().filter(|e| e.is_document_creation()).count(),
            entries: self.entries.clone(),
        }
    }
}

/// Shared write handle onto one [`OperationAuditLog`].
///
/// Cloned into each mediator of a harness; never handed to skill code.
#[derive(Debug, Clone)]
pub(crate) struct AuditRecorder {
    log: Arc<Mutex<OperationAuditLog>>,
}

impl AuditRecorder {
    pub(crate) fn new(trigger_run_id: i64) -> Self {
        Self {
            log: Arc::new(Mutex::new(OperationAuditLog::new(trigger_run_id))),
        }
    }

    pub(crate) fn record(&self, entry: AuditEntry) {
        self.lock().log(entry);
    }

    pub(crate) fn summary(&self) -> AuditSummary {
        self.lock().to_summary()
    }

    fn lock(&self) -> MutexGuard<'_, OperationAuditLog> {
        // Append-only: a panic mid-push cannot leave a partial entry
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}
