use anyhow::{Context, Result};

use super::{open_cache, open_index};
use crate::cli::output::{StatsReport, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::OllamaClient;

pub async fn handle_stats(config: &Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let index = open_index(config).await?;

    let cache_entries = match open_cache(config) {
        Some(cache) => cache.len().await,
        None => 0,
    };

    let client = OllamaClient::new(&config.embedding).context("failed to create embedding client")?;
    let embedding_reachable = match client.health_check().await {
        Ok(()) => true,
        Err(e) => {
            if verbose {
                eprintln!("Embedding service check failed: {e}");
            }
            false
        }
    };

    let report = StatsReport {
        collection: index.get_collection_stats().await,
        cache_enabled: config.cache.enabled,
        cache_entries,
        embedding_url: client.base_url().to_string(),
        embedding_model: config.embedding.model.clone(),
        embedding_reachable,
    };

    print!("{}", formatter.format_stats(&report));
    Ok(())
}
