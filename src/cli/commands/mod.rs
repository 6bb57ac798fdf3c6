mod clear;
mod config;
mod ingest;
mod operations;
mod search;
mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::models::Config;
use crate::services::{EmbeddingCache, EmbeddingGenerator, OllamaClient, VectorIndex};

pub use clear::ClearArgs;
pub use config::ConfigCommand;
pub use ingest::IngestArgs;
pub use operations::OperationsArgs;
pub use search::SearchArgs;

pub use clear::handle_clear;
pub use config::handle_config;
pub use ingest::handle_ingest;
pub use operations::handle_operations;
pub use search::handle_search;
pub use stats::handle_stats;

/// Embedding cache for `config`, or None when caching is disabled.
fn open_cache(config: &Config) -> Option<Arc<EmbeddingCache>> {
    config.cache.enabled.then(|| {
        Arc::new(EmbeddingCache::new(
            config.cache.resolved_dir(&config.embedding.model),
        ))
    })
}

/// Open the configured collection backed by the configured embedding service.
async fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let client = OllamaClient::new(&config.embedding).context("failed to create embedding client")?;
    let generator = Arc::new(EmbeddingGenerator::from_config(
        &config.embedding,
        Arc::new(client),
        open_cache(config),
    ));

    let index = VectorIndex::from_config(&config.vector_store, generator)
        .await
        .with_context(|| format!("failed to open collection '{}'", config.vector_store.collection))?
        .with_retry_policy(config.pipeline.retry_policy());
    Ok(Arc::new(index))
}
