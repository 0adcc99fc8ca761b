use thiserror::Error;

/// Errors produced by the engine and its subsystems.
///
/// Each variant corresponds to one failure class with a distinct propagation
/// policy: per-file ingestion errors are reported and skipped, QA precondition
/// failures surface before the transcript is touched, and storage failures are
/// fatal for an ingestion commit but non-fatal for retrieval.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("embedding failed: {0}")]
    Embed(String),

    #[error("generator unavailable: {0}")]
    GeneratorUnavailable(String),

    #[error("generator is not loaded")]
    GeneratorNotReady,

    #[error("generation failed: {0}")]
    Generate(String),

    #[error("no indexed chunks — add documents first")]
    NoCorpus,

    #[error("invalid import file: {0}")]
    ImportFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
