use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Initialize configuration file")]
    Init {
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration")]
    Show,
    #[command(about = "Show configuration and data paths")]
    Path,
}

pub async fn handle_config(
    cmd: ConfigCommand,
    config: &Config,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommand::Init { force } => handle_init(config_path, force, format),
        ConfigCommand::Show => handle_show(config, format),
        ConfigCommand::Path => handle_path(config, config_path, format),
    }
}

fn resolve_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path
        .map(Path::to_path_buf)
        .or_else(Config::config_path)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))
}

fn handle_init(config_path: Option<&Path>, force: bool, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let path = resolve_path(config_path)?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    Config::default()
        .save_to(&path)
        .context("failed to create config")?;
    println!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

fn handle_show(config: &Config, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

fn handle_path(config: &Config, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let path = resolve_path(config_path)?;
    let cache = config.cache.resolved_dir(&config.embedding.model);
    let collections = config.vector_store.resolved_dir();
    let operations = config.recovery.resolved_dir();

    if format == OutputFormat::Json {
        let output = serde_json::json!({
            "config": path,
            "config_exists": path.exists(),
            "cache": cache,
            "collections": collections,
            "operations": operations,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let state = if path.exists() { "active" } else { "would be" };
    println!("Config ({state}): {}", path.display());
    println!("Embedding cache:  {}", cache.display());
    println!("Collections:      {}", collections.display());
    println!("Operations:       {}", operations.display());
    Ok(())
}
