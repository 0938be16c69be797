//! Common types and errors for Folio
//!
//! This crate provides the shared data structures used across the Folio
//! synchronization components: document identity, wire-level metadata and
//! document payloads, and the locally cached paper entry.

pub mod telemetry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Core error types for Folio operations
#[derive(Error, Debug)]
pub enum FolioError {
    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FolioError>;

/// Composite identity for one document revision.
///
/// Both halves are opaque, server-assigned identifiers. Structural equality
/// on the pair is the only key identity used by the registry and the import
/// tracker, so two keys collide only when both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub paper_id: String,
    pub version: String,
}

impl DocumentKey {
    pub fn new(paper_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            version: version.into(),
        }
    }

    /// Render the server's composite key format, e.g. `2301.07041_v1`.
    pub fn channel_key(&self) -> String {
        format!("{}_v{}", self.paper_id, self.version)
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.paper_id, self.version)
    }
}

/// Wire-level processing status reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Waiting,
    Processing,
    Summarizing,
    Ready,
    Failed,
    Timeout,
}

/// Lightweight paper metadata for gallery display
///
/// Stored in the local store and carried in status envelopes while an import
/// is in flight. Unknown fields from newer backends are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub paper_id: String,

    pub version: String,

    pub title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    /// Abstract text as supplied by the source archive
    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub published_timestamp: Option<String>,

    #[serde(default)]
    pub updated_timestamp: Option<String>,

    /// Optional featured image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_image: Option<Value>,
}

/// Canonical document payload carried by a `data` envelope or returned by the
/// full-document endpoint.
///
/// Section/reference bodies are schema-opaque: the sync layer never inspects
/// them, it only moves them between the wire, the cache, and the consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PaperMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_status: Option<RemoteStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,

    #[serde(default)]
    pub sections: Vec<Value>,

    #[serde(default)]
    pub concepts: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#abstract: Option<Value>,

    #[serde(default)]
    pub references: Vec<Value>,

    #[serde(default)]
    pub footnotes: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summaries: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_timestamp: Option<String>,
}

/// Locally persisted paper entry.
///
/// `metadata` is a cached copy of the canonical metadata; `reading_history`
/// and `annotations` are user-local augmentation the backend never sees and
/// a remote refresh must never overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPaper {
    pub metadata: PaperMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_history: Option<Value>,

    #[serde(default)]
    pub annotations: Vec<Value>,
}

impl CachedPaper {
    pub fn from_metadata(metadata: PaperMetadata) -> Self {
        Self {
            metadata,
            reading_history: None,
            annotations: Vec::new(),
        }
    }
}

/// Merged snapshot delivered to `on_update` consumers: canonical content from
/// the most recent remote payload layered with cache-owned augmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperDocument {
    pub key: DocumentKey,

    #[serde(flatten)]
    pub remote: RemoteDocument,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_history: Option<Value>,

    #[serde(default)]
    pub annotations: Vec<Value>,
}
