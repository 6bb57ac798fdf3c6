use anyhow::{Context, Result};
use clap::Args;

use super::{open_cache, open_index};
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub force: bool,

    /// Also delete cached embeddings
    #[arg(long)]
    pub cache: bool,
}

pub async fn handle_clear(
    args: ClearArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let index = open_index(config).await?;

    if !args.force {
        println!(
            "This will delete ALL documents in collection '{}'. Continue? [y/N]",
            index.name()
        );
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", formatter.format_message("Cancelled."));
            return Ok(());
        }
    }

    let removed = index.len().await;
    index
        .delete_collection()
        .await
        .context("failed to delete collection")?;
    if verbose {
        eprintln!("Removed snapshot: {}", index.snapshot_path().display());
    }

    let mut message = format!("Deleted {removed} documents from '{}'.", index.name());
    if args.cache
        && let Some(cache) = open_cache(config)
    {
        let entries = cache
            .clear()
            .await
            .context("failed to clear embedding cache")?;
        message.push_str(&format!(" Removed {entries} cached embeddings."));
    }

    println!("{}", formatter.format_message(&message));
    Ok(())
}
