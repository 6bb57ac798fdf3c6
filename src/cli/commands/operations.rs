use anyhow::{Context, Result};
use clap::Args;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::RecoveryManager;

#[derive(Debug, Args)]
pub struct OperationsArgs {
    /// Delete records of failed operations
    #[arg(long)]
    pub purge_failed: bool,
}

pub async fn handle_operations(
    args: OperationsArgs,
    config: &Config,
    format: OutputFormat,
    _verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let recovery = RecoveryManager::new(config.recovery.resolved_dir());

    if args.purge_failed {
        let purged = recovery
            .purge_failed()
            .await
            .context("failed to purge operations")?;
        println!(
            "{}",
            formatter.format_message(&format!("Purged {purged} failed operations."))
        );
        return Ok(());
    }

    let incomplete: Vec<_> = recovery
        .list_incomplete_operations()
        .await
        .context("failed to read operation state")?
        .into_values()
        .collect();
    let failed: Vec<_> = recovery
        .list_failed_operations()
        .await
        .context("failed to read operation state")?
        .into_values()
        .collect();

    print!("{}", formatter.format_operations(&incomplete, &failed));
    Ok(())
}
