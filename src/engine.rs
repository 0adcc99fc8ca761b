//! The engine facade: one task actor owning all mutable state.
//!
//! Every user-initiated operation (ingest, ask, re-index, import, clear) is
//! a `&mut self` method, so reentry is ruled out by ownership: the
//! cooperative single-actor model the pipelines assume. Long operations
//! report through the event sink; the view shell observes state exclusively
//! through events and the read-only projections.
//!
//! State layout:
//! - `docs` and the vector index mirror the persistent store; they are
//!   refreshed from it on open and kept in sync by each command.
//! - The embedder and generator are lazy holders; only this actor touches
//!   them.
//! - The transcript belongs to the QA surface and is never persisted.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{Embedder, EmbeddingBackend};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::extract::content_type_for;
use crate::generator::{Generator, GeneratorBackend};
use crate::index::VectorIndex;
use crate::ingest::{self, FailedFile, IngestedFile, IngestionReport};
use crate::models::{ChatMessage, ChatRole, Document, TranscriptMessage};
use crate::qa::{
    self, build_context_block, context_panel, parse_citations, ContextEntry, NO_CITATION_WARNING,
};
use crate::store::Store;
use crate::transfer::{parse_import, ExportFile};

/// Result of one question: the full answer, its parsed citations, an
/// optional strict-mode warning, and the context panel when requested.
#[derive(Debug)]
pub struct AskOutcome {
    pub answer: String,
    pub citations: BTreeSet<u32>,
    pub warning: Option<String>,
    pub context: Option<Vec<ContextEntry>>,
}

pub struct Engine {
    config: Config,
    store: Store,
    docs: Vec<Document>,
    index: VectorIndex,
    embedder: Embedder,
    generator: Generator,
    transcript: Vec<TranscriptMessage>,
    sink: Box<dyn EventSink>,
}

impl Engine {
    /// Open the engine against the configured database with the real model
    /// backends.
    pub async fn open(config: Config, sink: Box<dyn EventSink>) -> Result<Self> {
        let embedder = Embedder::new(config.embedding.clone());
        let generator = Generator::new(config.generator.clone())?;
        Self::assemble(config, sink, embedder, generator).await
    }

    /// Open with injected model backends (tests, alternative runtimes).
    pub async fn with_backends(
        config: Config,
        sink: Box<dyn EventSink>,
        embedding: Arc<dyn EmbeddingBackend>,
        generation: Arc<dyn GeneratorBackend>,
    ) -> Result<Self> {
        let embedder = Embedder::with_backend(config.embedding.clone(), embedding);
        let generator = Generator::with_backend(config.generator.clone(), generation);
        Self::assemble(config, sink, embedder, generator).await
    }

    async fn assemble(
        config: Config,
        sink: Box<dyn EventSink>,
        embedder: Embedder,
        generator: Generator,
    ) -> Result<Self> {
        let store = Store::connect(&config.db.path).await?;
        store.migrate().await?;
        let (docs, chunks) = store.load_all().await?;

        let mut index = VectorIndex::new();
        index.replace(chunks);

        Ok(Self {
            config,
            store,
            docs,
            index,
            embedder,
            generator,
            transcript: Vec::new(),
            sink,
        })
    }

    // ---- projections ----

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    /// Read-only view of the indexed chunks, in insertion order.
    pub fn chunks(&self) -> &[crate::models::Chunk] {
        self.index.chunks()
    }

    pub fn embedded_chunk_count(&self) -> usize {
        self.index.embedded_count()
    }

    pub fn embedder_ready(&self) -> bool {
        self.embedder.ready()
    }

    pub fn generator_ready(&self) -> bool {
        self.generator.ready()
    }

    pub fn transcript(&self) -> &[TranscriptMessage] {
        &self.transcript
    }

    // ---- commands ----

    /// Load the embedding model now instead of on first use.
    pub async fn load_embedder(&mut self) -> Result<()> {
        self.sink
            .emit(&EngineEvent::Status("임베딩 모델 로딩 중…".to_string()));
        self.embedder.ensure().await?;
        self.sink
            .emit(&EngineEvent::Status("임베딩 모델 준비 완료".to_string()));
        Ok(())
    }

    /// Load the generative model, forwarding download progress.
    pub async fn load_generator(&mut self, model: Option<&str>) -> Result<()> {
        self.sink
            .emit(&EngineEvent::Status("생성 모델 로딩 중…".to_string()));
        let sink = self.sink.as_ref();
        self.generator
            .load(model, &|p| {
                sink.emit(&EngineEvent::Progress(p.fraction));
            })
            .await?;
        self.sink
            .emit(&EngineEvent::Status("생성 모델 준비 완료".to_string()));
        Ok(())
    }

    /// Ingest a list of files sequentially with per-file failure isolation.
    pub async fn add_files(&mut self, files: &[PathBuf]) -> IngestionReport {
        let mut report = IngestionReport::default();

        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            let outcome = match tokio::fs::read(path).await {
                Ok(bytes) => {
                    self.ingest_file(&name, content_type_for(path), &bytes)
                        .await
                }
                Err(e) => Err(EngineError::Io(e)),
            };

            match outcome {
                Ok(chunks) => report.ingested.push(IngestedFile { name, chunks }),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "ingestion failed");
                    self.sink.emit(&EngineEvent::Status(format!(
                        "{} 처리 실패: {}",
                        name, e
                    )));
                    report.failed.push(FailedFile {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Ingest one in-memory file. Returns the number of chunks committed.
    pub async fn ingest_file(
        &mut self,
        name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<usize> {
        self.embedder.ensure().await?;
        self.sink
            .emit(&EngineEvent::Status(format!("{} 처리 중…", name)));

        let (doc, mut chunks) =
            ingest::prepare_document(name, content_type, bytes, &self.config.chunking)?;
        ingest::embed_chunks(
            &self.embedder,
            &self.config.embedding,
            &mut chunks,
            self.sink.as_ref(),
        )
        .await?;

        // Append to memory first, then commit; roll the append back if the
        // commit fails so memory and store cannot diverge.
        let docs_before = self.docs.len();
        let chunks_before = self.index.len();
        self.docs.push(doc.clone());
        self.index.extend(chunks.iter().cloned());

        if let Err(e) = self.store.commit_ingest(&doc, &chunks).await {
            self.docs.truncate(docs_before);
            self.index.truncate(chunks_before);
            return Err(e);
        }

        self.sink.emit(&EngineEvent::Progress(1.0));
        self.sink.emit(&EngineEvent::Status(format!(
            "{}: {}개 청크 색인 완료",
            name,
            chunks.len()
        )));
        self.emit_corpus_changed();
        Ok(chunks.len())
    }

    /// Answer a question grounded in the indexed corpus, streaming the
    /// answer into the transcript.
    pub async fn ask(
        &mut self,
        question: &str,
        strict: bool,
        show_context: bool,
    ) -> Result<AskOutcome> {
        // Preconditions come before any transcript mutation.
        if self.index.embedded_count() == 0 {
            return Err(EngineError::NoCorpus);
        }
        if !self.generator.ready() {
            return Err(EngineError::GeneratorNotReady);
        }

        self.embedder.ensure().await?;

        self.push_message(ChatRole::User, question.to_string());
        let assistant = self.push_message(ChatRole::Assistant, String::new());

        let query = self.embedder.embed_query(question).await?;
        let hits = self.index.top_k(&query, self.config.retrieval.top_k);

        let messages = vec![
            ChatMessage::system(qa::system_prompt(strict)),
            ChatMessage::user(qa::user_prompt(&build_context_block(&hits), question)),
        ];

        self.sink
            .emit(&EngineEvent::Status("답변 생성 중…".to_string()));
        let temperature = self.generator.temperature(strict);
        let mut rx = self.generator.stream(&messages, temperature).await?;

        let mut answer = String::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(delta) => {
                    answer.push_str(&delta);
                    self.transcript[assistant].content.push_str(&delta);
                    self.sink.emit(&EngineEvent::MessageDelta {
                        index: assistant,
                        delta,
                    });
                }
                Err(e) => {
                    // The partial answer stays in the transcript; no retry.
                    self.sink
                        .emit(&EngineEvent::Status(format!("생성 오류: {}", e)));
                    return Err(e);
                }
            }
        }

        let citations = parse_citations(&answer);
        let mut warning = None;
        if strict && citations.is_empty() {
            warning = Some(NO_CITATION_WARNING.to_string());
            self.transcript[assistant].meta = Some(NO_CITATION_WARNING.to_string());
            self.sink.emit(&EngineEvent::MessageMeta {
                index: assistant,
                meta: NO_CITATION_WARNING.to_string(),
            });
        }

        let context = show_context.then(|| context_panel(&hits, &citations));

        Ok(AskOutcome {
            answer,
            citations,
            warning,
            context,
        })
    }

    /// Remove every document and chunk, durably and in memory.
    pub async fn clear_all(&mut self) -> Result<()> {
        self.store.clear_all().await?;
        self.docs.clear();
        self.index.clear();
        self.sink
            .emit(&EngineEvent::Status("모든 문서를 삭제했습니다".to_string()));
        self.emit_corpus_changed();
        Ok(())
    }

    /// Snapshot the corpus for export (embeddings stripped).
    pub fn export(&self) -> ExportFile {
        ExportFile::from_state(&self.docs, self.index.chunks())
    }

    /// Replace the corpus from an export payload. Chunks come back without
    /// embeddings; the caller is expected to re-index next.
    pub async fn import_json(&mut self, json: &str) -> Result<(usize, usize)> {
        // Validate before clearing anything.
        let payload = parse_import(json)?;
        let (docs, chunks) = payload.into_state();

        // One transaction: the old corpus either survives intact or is fully
        // replaced. Memory is only touched after the commit.
        self.store.replace_all(&docs, &chunks).await?;

        let counts = (docs.len(), chunks.len());
        self.docs = docs;
        self.index.replace(chunks);

        self.sink.emit(&EngineEvent::Status(
            "가져오기 완료 — 재색인이 필요합니다".to_string(),
        ));
        self.emit_corpus_changed();
        Ok(counts)
    }

    /// Rebuild every chunk's embedding from its stored text. No-op on an
    /// empty corpus.
    pub async fn reindex_all(&mut self) -> Result<usize> {
        let total = self.index.len();
        if total == 0 {
            return Ok(0);
        }

        self.embedder.ensure().await?;
        self.sink
            .emit(&EngineEvent::Status("재색인 중…".to_string()));

        let batch_size = self.config.embedding.batch_size;
        let mut position = 0usize;

        while position < total {
            let end = (position + batch_size).min(total);
            let texts: Vec<String> = self.index.chunks()[position..end]
                .iter()
                .map(|c| c.text.clone())
                .collect();
            let vectors = self.embedder.embed(&texts).await?;

            let updates: Vec<(String, Vec<f32>)> = self.index.chunks()[position..end]
                .iter()
                .zip(vectors.iter())
                .map(|(chunk, vector)| (chunk.id.clone(), vector.clone()))
                .collect();
            self.store.update_embeddings(&updates).await?;

            for (offset, vector) in vectors.into_iter().enumerate() {
                self.index.set_embedding(position + offset, vector);
            }

            position = end;
            self.sink.emit(&EngineEvent::Progress(
                0.05 + 0.95 * position as f32 / total as f32,
            ));
        }

        self.sink.emit(&EngineEvent::Status(format!(
            "재색인 완료 ({}개 청크)",
            total
        )));
        Ok(total)
    }

    // ---- internals ----

    fn push_message(&mut self, role: ChatRole, content: String) -> usize {
        let index = self.transcript.len();
        self.sink.emit(&EngineEvent::MessageAppended {
            index,
            role,
            content: content.clone(),
        });
        self.transcript.push(TranscriptMessage {
            role,
            content,
            meta: None,
        });
        index
    }

    fn emit_corpus_changed(&self) {
        self.sink.emit(&EngineEvent::CorpusChanged {
            docs: self.docs.len(),
            chunks: self.index.len(),
        });
    }
}
