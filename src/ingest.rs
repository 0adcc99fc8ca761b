//! Ingestion pipeline: file bytes → pages → tagged chunks → embeddings.
//!
//! The engine drives one file at a time: [`prepare_document`] extracts and
//! chunks, [`embed_chunks`] fills in vectors in fixed-size batches while
//! reporting progress, and the engine commits the result to the store. Files
//! in a batch are isolated from each other; one malformed PDF never stops
//! the rest.

use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::chunk::build_chunks;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::events::{EngineEvent, EventSink};
use crate::extract::extract;
use crate::models::{Chunk, Document};

/// Progress window for the embedding phase of one ingestion.
const PROGRESS_BASE: f32 = 0.1;
const PROGRESS_SPAN: f32 = 0.9;

/// Result of adding a batch of files: which landed and which failed.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestedFile>,
    pub failed: Vec<FailedFile>,
}

#[derive(Debug)]
pub struct IngestedFile {
    pub name: String,
    pub chunks: usize,
}

#[derive(Debug)]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

/// Extract and chunk one file into a fresh document.
///
/// Allocates a new document id (re-adding identical content deliberately
/// creates a new document), extracts pages, and tags each page's windows
/// with `(page, ordinal)`. Chunks come back without embeddings. A file whose
/// text chunks to nothing still yields the document record.
pub fn prepare_document(
    name: &str,
    content_type: &str,
    bytes: &[u8],
    chunking: &ChunkingConfig,
) -> Result<(Document, Vec<Chunk>)> {
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        mime_type: content_type.to_string(),
        size_bytes: bytes.len() as u64,
        added_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        extra: Default::default(),
    };

    let extracted = extract(bytes, content_type)?;

    let mut chunks = Vec::new();
    for (page_idx, page_text) in extracted.pages.iter().enumerate() {
        chunks.extend(build_chunks(
            &doc.id,
            &doc.name,
            page_idx as u32 + 1,
            page_text,
            chunking.size,
            chunking.overlap,
            chunking.min_chars,
        ));
    }

    tracing::debug!(
        doc = %doc.name,
        pages = extracted.num_pages,
        chunks = chunks.len(),
        "document prepared"
    );

    Ok((doc, chunks))
}

/// Embed every chunk in place, in batches, reporting progress after each
/// batch as `base + span · processed/total`.
pub async fn embed_chunks(
    embedder: &Embedder,
    embedding: &EmbeddingConfig,
    chunks: &mut [Chunk],
    sink: &dyn EventSink,
) -> Result<()> {
    let total = chunks.len();
    if total == 0 {
        return Ok(());
    }

    let mut processed = 0usize;
    for batch in chunks.chunks_mut(embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        for (chunk, vector) in batch.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }
        processed += batch.len();
        sink.emit(&EngineEvent::Progress(
            PROGRESS_BASE + PROGRESS_SPAN * processed as f32 / total as f32,
        ));
    }

    Ok(())
}
