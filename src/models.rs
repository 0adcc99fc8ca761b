//! Core data types flowing through the ingestion and QA pipelines.
//!
//! ```text
//! file bytes → extract() → pages → chunk() → Chunk
//!                                      ↓
//!                                 embed() → unit-norm vector
//!                                      ↓
//!                              top_k() → Retrieved → prompt → answer
//! ```
//!
//! Documents and chunks are owned by the persistent store; the in-memory
//! vector index holds a synchronized copy of the chunks for retrieval.

use serde::{Deserialize, Serialize};

/// A source document added by the user.
///
/// Created on successful ingestion and removed only by a full clear. The
/// `id` is a collision-resistant UUID; re-adding the same file produces a
/// new document with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// UUID v4 primary key.
    pub id: String,
    /// Display name (typically the filename).
    pub name: String,
    /// MIME type, `"application/pdf"` or `"text/plain"`.
    pub mime_type: String,
    /// Original file size in bytes.
    pub size_bytes: u64,
    /// ISO-8601 UTC timestamp of ingestion.
    pub added_at: String,
    /// Fields from an imported payload that this engine does not recognize.
    /// Kept so they reappear verbatim on re-export.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A bounded, normalized slice of a document's text, the unit of retrieval.
///
/// The id is deterministic: `"{doc_id}|p{page}|c{ordinal}"`. `page` is
/// 1-based (always 1 for plain text); `ordinal` counts chunks within a page.
/// `embedding` is absent for chunks that have not been indexed yet (freshly
/// imported corpora before a re-index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    /// Denormalized document name for display and citations.
    pub doc_name: String,
    /// 1-based page number.
    pub page: u32,
    /// 0-based position within the page.
    pub ordinal: u32,
    pub text: String,
    /// Unit-norm embedding vector, or `None` while unindexed.
    pub embedding: Option<Vec<f32>>,
    /// Unrecognized fields carried through import/export round-trips.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Chunk {
    /// Deterministic chunk id from its position.
    pub fn make_id(doc_id: &str, page: u32, ordinal: u32) -> String {
        format!("{}|p{}|c{}", doc_id, page, ordinal)
    }
}

/// Role of a chat message sent to the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in a generator conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A retrieval hit: a chunk together with its cosine score against the query.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub chunk: Chunk,
    pub score: f32,
}

/// A transcript message held by the engine for the view shell.
#[derive(Debug, Clone)]
pub struct TranscriptMessage {
    pub role: ChatRole,
    pub content: String,
    /// Auxiliary line shown under the message (warnings, error notes).
    pub meta: Option<String>,
}
