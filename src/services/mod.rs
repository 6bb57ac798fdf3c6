mod cache;
mod chunker;
mod embedding;
mod pipeline;
mod recovery;
mod vector_store;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::EmbeddingCache;
pub use chunker::{Chunker, ParagraphChunker};
pub use embedding::{
    EmbeddingFailure, EmbeddingGenerator, EmbeddingService, OllamaClient, ProgressFn,
};
pub use pipeline::{FileProgressFn, PROCESS_FILE_OPERATION, PipelineOrchestrator};
pub use recovery::RecoveryManager;
pub use vector_store::VectorIndex;
