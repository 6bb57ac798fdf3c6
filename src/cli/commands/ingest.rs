//! Ingest command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use super::open_index;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{FileProgressFn, ParagraphChunker, PipelineOrchestrator, RecoveryManager};

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// File or directory to ingest
    #[arg(required = true)]
    pub path: PathBuf,

    /// Only ingest files directly inside the directory
    #[arg(long)]
    pub no_recursive: bool,

    /// Additional glob patterns to exclude (can be specified multiple times)
    #[arg(long, short = 'e')]
    pub exclude: Vec<String>,

    /// Ingest files again even when unchanged since the last run
    #[arg(long)]
    pub force: bool,
}

pub async fn handle_ingest(
    args: IngestArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let path = args
        .path
        .canonicalize()
        .with_context(|| format!("invalid path: {}", args.path.display()))?;

    let index = open_index(config).await?;
    let recovery = Arc::new(RecoveryManager::new(config.recovery.resolved_dir()));

    if verbose {
        eprintln!("Ingesting: {}", path.display());
        eprintln!("  Collection: {}", index.name());
        eprintln!("  Model: {}", index.generator().model());
        eprintln!("  State: {}", recovery.state_dir().display());
    }

    let pb = if format == OutputFormat::Json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let bar = pb.clone();
    let progress: Arc<FileProgressFn> = Arc::new(move |done: usize, total: usize, file: &Path| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
        if let Some(name) = file.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
    });

    let mut exclude_patterns = config.pipeline.exclude_patterns.clone();
    exclude_patterns.extend(args.exclude);

    let mut orchestrator = PipelineOrchestrator::from_config(
        &config.pipeline,
        Arc::new(ParagraphChunker::default()),
        index,
        recovery,
    )
    .with_exclude_patterns(&exclude_patterns)
    .with_progress(progress);

    if args.force {
        orchestrator
            .reset_ledger()
            .await
            .context("failed to reset ingestion ledger")?;
    }

    let stats = if path.is_dir() {
        let recursive = config.pipeline.recursive && !args.no_recursive;
        orchestrator.process_directory(&path, recursive).await
    } else {
        orchestrator.process_files(&[path]).await
    };
    pb.finish_and_clear();

    print!("{}", formatter.format_processing_stats(&stats));

    if stats.failed_files > 0 && format == OutputFormat::Text {
        eprintln!();
        eprintln!("Hint: failed files are listed by: docvec operations");
    }

    Ok(())
}
