use std::time::Instant;

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use super::open_index;
use crate::cli::output::get_formatter;
use crate::models::{Config, Metadata, OutputFormat, SearchResults};

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, num_args = 1.., help = "Search query text")]
    pub query: Vec<String>,

    #[arg(
        long,
        short = 'n',
        default_value_t = 5,
        help = "Maximum number of results to return"
    )]
    pub limit: usize,

    #[arg(
        long = "where",
        short = 'w',
        value_name = "KEY=VALUE",
        help = "Only match documents whose metadata has this exact value (repeatable)"
    )]
    pub filters: Vec<String>,
}

pub async fn handle_search(
    args: SearchArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let query = args.query.join(" ");
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }
    if args.limit == 0 {
        anyhow::bail!("limit must be at least 1");
    }

    let filter = parse_filters(&args.filters)?;
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  Limit: {}", args.limit);
        for (key, value) in &filter {
            eprintln!("  Where: {key} = {value}");
        }
    }

    let index = open_index(config).await?;
    let results = index
        .query(query, args.limit, (!filter.is_empty()).then_some(&filter))
        .await?;

    let duration_ms = start_time.elapsed().as_millis() as u64;
    let search_results = SearchResults::new(query.to_string(), results, duration_ms);

    print!("{}", formatter.format_search_results(&search_results));

    Ok(())
}

/// Parse `key=value` pairs into an exact-match metadata filter.
///
/// Values that parse as JSON scalars (numbers, booleans) are compared as such;
/// anything else is a string.
fn parse_filters(filters: &[String]) -> Result<Metadata> {
    let mut parsed = Metadata::new();
    for filter in filters {
        let Some((key, value)) = filter.split_once('=') else {
            anyhow::bail!("invalid filter '{filter}', expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid filter '{filter}', key is empty");
        }

        let value = match serde_json::from_str::<Value>(value) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(value.to_string()),
        };
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}
