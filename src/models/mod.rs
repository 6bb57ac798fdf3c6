mod config;
mod document;
mod operation;
mod search;
mod stats;

pub use config::{
    CacheConfig, Config, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL,
    DuplicatePolicy, EmbeddingConfig, PipelineConfig, RecoveryConfig, VectorStoreConfig,
    default_data_dir,
};
pub use document::{Chunk, Embedding, IndexedDocument, Metadata};
pub use operation::{OperationRecord, OperationStatus};
pub use search::{CollectionStats, OutputFormat, SearchResult, SearchResults};
pub use stats::ProcessingStats;
