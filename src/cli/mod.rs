//! Command-line interface for the docvec binary.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Chunk, embed and search local documents.
#[derive(Debug, Parser)]
#[command(name = "docvec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(long, short = 'f', global = true, help = "Output format: text or json")]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long,
        short = 'c',
        global = true,
        env = "DOCVEC_CONFIG",
        help = "Path to config file"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Chunk, embed and index a file or directory
    Ingest(commands::IngestArgs),

    /// Search indexed documents
    Search(commands::SearchArgs),

    /// Show collection statistics
    Stats,

    /// Delete every document in the collection
    Clear(commands::ClearArgs),

    /// List interrupted and failed ingestion operations
    Operations(commands::OperationsArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
