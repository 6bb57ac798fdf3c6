use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt};

use docvec::cli::commands::{
    ConfigCommand, handle_clear, handle_config, handle_ingest, handle_operations, handle_search,
    handle_stats,
};
use docvec::cli::{Cli, Commands};
use docvec::models::{Config, OutputFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.command {
        // Must work even when the existing file is broken
        Commands::Config(ConfigCommand::Init { .. }) => Config::default(),
        _ => load_config(cli.config.as_deref())?,
    };
    let format = cli.format.unwrap_or_default();

    tokio::select! {
        result = run_command(cli, &config, format) => {
            result?;
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, interrupted operations resume on the next ingest.");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "docvec=debug" } else { "docvec=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) if path.exists() => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        Some(_) => Config::default(),
        None => Config::load().context("failed to load config")?,
    };

    config.apply_env();
    config.validate().context("invalid configuration")?;
    tracing::debug!(
        url = %config.embedding.url,
        model = %config.embedding.model,
        collection = %config.vector_store.collection,
        "configuration loaded"
    );
    Ok(config)
}

async fn run_command(cli: Cli, config: &Config, format: OutputFormat) -> Result<()> {
    let verbose = cli.verbose;

    match cli.command {
        Commands::Ingest(args) => {
            handle_ingest(args, config, format, verbose).await?;
        }
        Commands::Search(args) => {
            handle_search(args, config, format, verbose).await?;
        }
        Commands::Stats => {
            handle_stats(config, format, verbose).await?;
        }
        Commands::Clear(args) => {
            handle_clear(args, config, format, verbose).await?;
        }
        Commands::Operations(args) => {
            handle_operations(args, config, format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, config, cli.config.as_deref(), format).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
