//! Document domain types and the repository capability the harness
//! mediates.
//!
//! The harness never talks to a database directly. It is handed a
//! [`DocumentRepository`] and only ever calls it with ids and scopes it
//! has already checked.

pub mod memory;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryRepository;

/// The closed set of document kinds a skill may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentKind {
    #[serde(rename = "MarkdownDocument")]
    Markdown,
    #[serde(rename = "YooptaDocument")]
    Yoopta,
    #[serde(rename = "TextDocument")]
    Text,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [DocumentKind::Markdown, DocumentKind::Yoopta, DocumentKind::Text];

    /// Model name recorded in audit entries.
    pub fn as_model(&self) -> &'static str {
        match self {
            DocumentKind::Markdown => "MarkdownDocument",
            DocumentKind::Yoopta => "YooptaDocument",
            DocumentKind::Text => "TextDocument",
        }
    }

    /// Returns true if `model` names one of the document kinds.
    pub fn is_document_model(model: &str) -> bool {
        Self::ALL.iter().any(|k| k.as_model() == model)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_model())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub kind: DocumentKind,
    pub name: String,
    pub content: String,
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert request. Scope fields are filled in by the harness, never by
/// skill code.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub kind: DocumentKind,
    pub name: String,
    pub content: String,
    pub organization_id: i64,
    pub project_id: Option<i64>,
}

/// Partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DocumentUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl DocumentUpdate {
    /// Names of the fields this update touches, for audit detail.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.content.is_some() {
            fields.push("content");
        }
        fields
    }
}

/// Filter for [`DocumentRepository::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFilter {
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub kind: Option<DocumentKind>,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document not found: {0}")]
    DocumentNotFound(i64),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Storage backend for documents.
///
/// There is no delete method.
pub trait DocumentRepository: Send + Sync {
    fn organization(&self, id: i64) -> Result<Option<Organization>, RepositoryError>;

    fn project(&self, id: i64) -> Result<Option<Project>, RepositoryError>;

    fn get(&self, id: i64) -> Result<Option<Document>, RepositoryError>;

    /// Lists documents matching the filter, ordered by id.
    fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>, RepositoryError>;

    fn create(&self, doc: NewDocument) -> Result<Document, RepositoryError>;

    fn update(&self, id: i64, update: &DocumentUpdate) -> Result<Document, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_names() {
        assert_eq!(DocumentKind::Markdown.as_model(), "MarkdownDocument");
        assert_eq!(DocumentKind::Yoopta.as_model(), "YooptaDocument");
        assert_eq!(DocumentKind::Text.as_model(), "TextDocument");
    }

    #[test]
    fn test_serde_matches_model_names_exactly() {
        assert!(serde_json::from_str::<DocumentKind>("\"textdocument\"").is_err());
        assert!(serde_json::from_str::<DocumentKind>("\"Document\"").is_err());
    }

    #[test]
    fn test_is_document_model() {
        assert!(DocumentKind::is_document_model("MarkdownDocument"));
        assert!(!DocumentKind::is_document_model("url"));
    }

    #[test]
    fn test_serde_uses_model_names() {
        let json = serde_json::to_string(&DocumentKind::Yoopta).unwrap();
        assert_eq!(json, "\"YooptaDocument\"");
        let kind: DocumentKind = serde_json::from_str("\"MarkdownDocument\"").unwrap();
        assert_eq!(kind, DocumentKind::Markdown);
    }

    #[test]
    fn test_changed_fields() {
        let update = DocumentUpdate {
            name: None,
            content: Some("new body".into()),
        };
        assert_eq!(update.changed_fields(), vec!["content"]);
        assert!(DocumentUpdate::default().changed_fields().is_empty());
    }
}
