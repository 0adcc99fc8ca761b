//! Corpus export and import.
//!
//! The export file is a version-gated JSON snapshot of documents and chunks
//! with embeddings stripped: vectors bloat the payload and are reproducible
//! from text by re-indexing. Import validates the payload shape before
//! touching any stored state, so a malformed file can never leave the store
//! half-cleared.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::{Chunk, Document};

pub const EXPORT_VERSION: u32 = 1;

/// On-disk export payload.
///
/// Field names are part of the round-trip contract:
/// `{version, exportedAt, docs: [{id,name,type,size,addedAt}],
/// chunks: [{id,docId,docName,page,text}]}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportFile {
    pub version: u32,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub docs: Vec<ExportDoc>,
    pub chunks: Vec<ExportChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportDoc {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "addedAt")]
    pub added_at: String,
    /// Unknown fields from a foreign payload, re-emitted verbatim on export.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportChunk {
    pub id: String,
    #[serde(rename = "docId")]
    pub doc_id: String,
    #[serde(rename = "docName")]
    pub doc_name: String,
    pub page: u32,
    pub text: String,
    /// Unknown fields from a foreign payload, re-emitted verbatim on export.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExportFile {
    /// Snapshot the current corpus, stripping embeddings.
    pub fn from_state(docs: &[Document], chunks: &[Chunk]) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            docs: docs
                .iter()
                .map(|d| ExportDoc {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    mime_type: d.mime_type.clone(),
                    size_bytes: d.size_bytes,
                    added_at: d.added_at.clone(),
                    extra: d.extra.clone(),
                })
                .collect(),
            chunks: chunks
                .iter()
                .map(|c| ExportChunk {
                    id: c.id.clone(),
                    doc_id: c.doc_id.clone(),
                    doc_name: c.doc_name.clone(),
                    page: c.page,
                    text: c.text.clone(),
                    extra: c.extra.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild engine state from the payload. Every chunk comes back without
    /// an embedding; ordinals are recovered from per-(doc, page) positions.
    pub fn into_state(self) -> (Vec<Document>, Vec<Chunk>) {
        let docs: Vec<Document> = self
            .docs
            .into_iter()
            .map(|d| Document {
                id: d.id,
                name: d.name,
                mime_type: d.mime_type,
                size_bytes: d.size_bytes,
                added_at: d.added_at,
                extra: d.extra,
            })
            .collect();

        let mut ordinals: std::collections::HashMap<(String, u32), u32> =
            std::collections::HashMap::new();
        let chunks: Vec<Chunk> = self
            .chunks
            .into_iter()
            .map(|c| {
                let key = (c.doc_id.clone(), c.page);
                let ordinal = ordinals.entry(key).or_insert(0);
                let chunk = Chunk {
                    id: c.id,
                    doc_id: c.doc_id,
                    doc_name: c.doc_name,
                    page: c.page,
                    ordinal: *ordinal,
                    text: c.text,
                    embedding: None,
                    extra: c.extra,
                };
                *ordinal += 1;
                chunk
            })
            .collect();

        (docs, chunks)
    }
}

/// Parse and validate an import payload.
///
/// The payload must declare `version: 1` and carry both the `docs` and
/// `chunks` arrays; anything else is an import-format error, raised before
/// the caller clears any state. Unknown fields on doc and chunk records are
/// captured and reappear verbatim when the same data is exported again.
pub fn parse_import(json: &str) -> Result<ExportFile> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| EngineError::ImportFormat(format!("not valid JSON: {}", e)))?;

    match value.get("version").and_then(|v| v.as_u64()) {
        Some(v) if v == EXPORT_VERSION as u64 => {}
        Some(v) => {
            return Err(EngineError::ImportFormat(format!(
                "unsupported version {} (expected {})",
                v, EXPORT_VERSION
            )))
        }
        None => return Err(EngineError::ImportFormat("missing version field".to_string())),
    }

    if !value.get("docs").map(|d| d.is_array()).unwrap_or(false)
        || !value.get("chunks").map(|c| c.is_array()).unwrap_or(false)
    {
        return Err(EngineError::ImportFormat(
            "docs and chunks arrays are required".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| EngineError::ImportFormat(e.to_string()))
}
