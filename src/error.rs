//! Error types for the document embedding pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to embedding generation.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding transport error: {0}")]
    Transport(String),

    #[error("embedding service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    /// True for the timeout variant, false for every API-level failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EmbeddingError::Timeout(_))
    }
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Timeout(_) | EmbeddingError::Transport(_) => true,
            EmbeddingError::Status { .. } => true,
            // A 2xx with the wrong shape will not fix itself
            EmbeddingError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to vector index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("duplicate document id: {0}")]
    DuplicateId(String),

    #[error("missing embedding for text of document {0}")]
    MissingEmbedding(String),

    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Retryable for IndexError {
    fn is_retryable(&self) -> bool {
        match self {
            IndexError::Embedding(e) => e.is_retryable(),
            IndexError::Io(_) | IndexError::MissingEmbedding(_) => true,
            IndexError::Validation(_)
            | IndexError::DimensionMismatch { .. }
            | IndexError::DuplicateId(_)
            | IndexError::Serialization(_) => false,
        }
    }
}

/// Errors related to operation state tracking.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("operation not found: {0}")]
    NotFound(String),
}

/// Errors raised by chunking collaborators.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("file read error: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("unsupported file: {0}")]
    Unsupported(String),

    #[error("extraction error: {0}")]
    ExtractionError(String),
}

/// Errors that fail a single file inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no chunks extracted")]
    NoChunks,

    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("directory walk error: {0}")]
    WalkError(String),

    #[error("ledger error: {0}")]
    LedgerError(#[from] std::io::Error),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Other(String),
}
