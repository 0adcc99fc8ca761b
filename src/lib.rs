//! # grounded
//!
//! **A local grounded question-answering engine over your own documents.**
//!
//! Documents (PDF and plain text) are chunked, embedded with a multilingual
//! encoder, and indexed locally; questions retrieve the closest chunks by
//! cosine similarity and hand them as evidence to a locally-hosted
//! generative model that streams an answer with `[C#]` citations. Nothing
//! leaves the machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────┐
//! │  Files    │──▶│  Pipeline    │──▶│  SQLite  │
//! │ PDF / TXT │   │ Chunk+Embed  │   │ + BLOBs  │
//! └───────────┘   └──────────────┘   └────┬─────┘
//!                                         │ mirrors
//!                                         ▼
//!                  question ──▶ ┌───────────────┐
//!                               │  VectorIndex  │──▶ top-K chunks
//!                               └───────────────┘        │
//!                                                        ▼
//!                               ┌───────────────┐   grounded prompt
//!                               │   Generator   │◀───────┘
//!                               │  (streaming)  │──▶ answer + [출처]
//!                               └───────────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. **Ingestion** ([`ingest`]): extract pages ([`extract`]), normalize and
//!    window the text ([`chunk`]), embed in batches ([`embedding`]), commit
//!    document + chunks transactionally ([`store`]), mirror into the
//!    in-memory [`index`].
//! 2. **QA** ([`engine`] + [`qa`]): embed the question, retrieve top-K by
//!    cosine, assemble the grounding prompt, stream the answer
//!    ([`generator`]), parse citations back out.
//! 3. **Transfer** ([`transfer`]): export the corpus as JSON without
//!    embeddings; import clears and replaces state, then a re-index rebuilds
//!    every vector from text.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Document`, `Chunk`, chat messages |
//! | [`chunk`] | Normalization and fixed-window chunking with overlap |
//! | [`extract`] | Per-page PDF and plain-text extraction |
//! | [`embedding`] | Embedding backends (Ollama, fastembed), lazy holder, vector utils |
//! | [`generator`] | Generative model holder with pull progress and streamed deltas |
//! | [`store`] | SQLite persistence with transactional bulk writes |
//! | [`index`] | In-memory brute-force top-K cosine retrieval |
//! | [`ingest`] | Per-file ingestion pipeline with progress and isolation |
//! | [`qa`] | Grounding prompts, context block, citation parsing |
//! | [`transfer`] | Versioned corpus export/import |
//! | [`engine`] | Facade: command surface, projections, transcript, events |
//! | [`events`] | Event sink trait and stderr/JSON sinks for the view shell |
//! | [`error`] | Error kinds and propagation policy |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod events;
pub mod extract;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod models;
pub mod qa;
pub mod store;
pub mod transfer;

pub use engine::{AskOutcome, Engine};
pub use error::{EngineError, Result};
