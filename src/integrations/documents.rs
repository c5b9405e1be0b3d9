//! Deliverable rendering and storage.
//!
//! The submission step turns the accumulated deliverable into a document
//! through a [`DocumentRenderer`] and hands the bytes to a [`BlobStore`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for document operations.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Deliverable has a shape the renderer cannot handle
    #[error("Render error: {0}")]
    Render(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blob backend refused the write or read
    #[error("Blob store error: {0}")]
    Blob(String),
}

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Output of a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    /// MIME type of `bytes`
    pub content_type: String,
    /// Rendered content
    pub bytes: Vec<u8>,
}

/// Turns a deliverable value into a document.
pub trait DocumentRenderer: Send + Sync {
    /// MIME type this renderer produces.
    fn content_type(&self) -> &'static str;

    /// Render a deliverable.
    fn render(&self, deliverable: &Value) -> DocumentResult<RenderedDocument>;
}

/// Pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl DocumentRenderer for JsonRenderer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, deliverable: &Value) -> DocumentResult<RenderedDocument> {
        Ok(RenderedDocument {
            content_type: self.content_type().to_string(),
            bytes: serde_json::to_vec_pretty(deliverable)?,
        })
    }
}

/// Markdown with a title and one section per heading.
///
/// Understands `{title, summary, sections: [{heading, body}]}`; any other
/// object renders one section per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn text(value: &Value) -> DocumentResult<String> {
        Ok(match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            Value::Array(items) => items
                .iter()
                .map(|item| Self::text(item).map(|t| format!("- {t}")))
                .collect::<DocumentResult<Vec<_>>>()?
                .join("\n"),
            other => serde_json::to_string_pretty(other)?,
        })
    }
}

impl DocumentRenderer for MarkdownRenderer {
    fn content_type(&self) -> &'static str {
        "text/markdown"
    }

    fn render(&self, deliverable: &Value) -> DocumentResult<RenderedDocument> {
        let Value::Object(map) = deliverable else {
            return Err(DocumentError::Render("deliverable must be a JSON object".to_string()));
        };

        let mut out = String::new();
        let title = map.get("title").and_then(Value::as_str).unwrap_or("Untitled");
        out.push_str(&format!("# {title}\n"));

        if let Some(summary) = map.get("summary") {
            out.push_str(&format!("\n{}\n", Self::text(summary)?));
        }

        if let Some(Value::Array(sections)) = map.get("sections") {
            for section in sections {
                let heading = section.get("heading").and_then(Value::as_str).unwrap_or("Section");
                let body = section.get("body").map(Self::text).transpose()?.unwrap_or_default();
                out.push_str(&format!("\n## {heading}\n\n{body}\n"));
            }
        } else {
            for (key, value) in map {
                if key == "title" || key == "summary" {
                    continue;
                }
                out.push_str(&format!("\n## {key}\n\n{}\n", Self::text(value)?));
            }
        }

        Ok(RenderedDocument { content_type: self.content_type().to_string(), bytes: out.into_bytes() })
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub id: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Storage for rendered documents.
pub trait BlobStore: Send + Sync {
    /// Store a document and return its id.
    fn put(&self, document: RenderedDocument) -> DocumentResult<String>;

    /// Fetch a stored document.
    fn get(&self, blob_id: &str) -> DocumentResult<Option<Blob>>;
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Blob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, document: RenderedDocument) -> DocumentResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let blob = Blob {
            id: id.clone(),
            content_type: document.content_type,
            bytes: document.bytes,
            created_at: Utc::now(),
        };
        self.blobs.write().insert(id.clone(), blob);
        Ok(id)
    }

    fn get(&self, blob_id: &str) -> DocumentResult<Option<Blob>> {
        Ok(self.blobs.read().get(blob_id).cloned())
    }
}
