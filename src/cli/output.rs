use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{CollectionStats, OperationRecord, OutputFormat, ProcessingStats, SearchResults};

pub trait Formatter {
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_processing_stats(&self, stats: &ProcessingStats) -> String;
    fn format_stats(&self, report: &StatsReport) -> String;
    fn format_operations(&self, incomplete: &[OperationRecord], failed: &[OperationRecord])
    -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub collection: CollectionStats,
    pub cache_enabled: bool,
    pub cache_entries: usize,
    pub embedding_url: String,
    pub embedding_model: String,
    pub embedding_reachable: bool,
}

pub struct TextFormatter;

impl TextFormatter {
    fn write_operation(output: &mut String, record: &OperationRecord) {
        let started = chrono::DateTime::from_timestamp(record.start_time as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.start_time.to_string());
        writeln!(
            output,
            "  {} [{}] started {} retries {}",
            record.operation_id, record.status, started, record.retry_count
        )
        .unwrap();
        if let Some(path) = record.input_str("file_path") {
            writeln!(output, "    file: {}", path).unwrap();
        }
        if let Some(ref error) = record.error {
            writeln!(output, "    error: {}", error).unwrap();
        }
    }
}

impl Formatter for TextFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("No results found for: {}\n", results.query);
        }

        let mut output = String::new();
        writeln!(output, "Search results for: \"{}\"", results.query).unwrap();
        writeln!(
            output,
            "Found {} results in {}ms\n",
            results.len(),
            results.duration_ms
        )
        .unwrap();

        for (i, result) in results.results.iter().enumerate() {
            writeln!(
                output,
                "{}. [Score: {:.3}] {}",
                i + 1,
                result.score,
                result.id
            )
            .unwrap();
            if let Some(source) = result.metadata.get("source").and_then(|v| v.as_str()) {
                writeln!(output, "   Source: {}", source).unwrap();
            }
            writeln!(output, "   ---").unwrap();

            let preview: String = result.text.chars().take(200).collect();
            let preview = if result.text.chars().count() > 200 {
                format!("{}...", preview)
            } else {
                preview
            };
            for line in preview.lines() {
                writeln!(output, "   {}", line).unwrap();
            }
            writeln!(output).unwrap();
        }

        output
    }

    fn format_processing_stats(&self, stats: &ProcessingStats) -> String {
        let mut output = String::new();
        writeln!(output, "Ingestion Complete").unwrap();
        writeln!(output, "------------------").unwrap();
        writeln!(output, "Files found:      {}", stats.total_files).unwrap();
        writeln!(output, "Files ingested:   {}", stats.successful_files).unwrap();
        writeln!(output, "Files unchanged:  {}", stats.skipped_files).unwrap();
        writeln!(output, "Files failed:     {}", stats.failed_files).unwrap();
        writeln!(output, "Resumed:          {}", stats.retry_successes).unwrap();
        writeln!(output, "Chunks:           {}", stats.total_chunks).unwrap();
        writeln!(output, "Tokens (approx):  {}", stats.total_tokens).unwrap();
        writeln!(output, "Duration:         {:.2}s", stats.processing_time).unwrap();

        if stats.has_errors() {
            writeln!(output, "\nErrors:").unwrap();
            for (file, error) in &stats.errors {
                writeln!(output, "  {}: {}", file, error).unwrap();
            }
        }
        output
    }

    fn format_stats(&self, report: &StatsReport) -> String {
        let stats = &report.collection;
        let mut output = String::new();
        writeln!(output, "Collection: {}", stats.name).unwrap();
        writeln!(output, "  Documents:     {}", stats.total_documents).unwrap();
        match stats.embedding_dim {
            Some(dim) => writeln!(output, "  Dimension:     {}", dim).unwrap(),
            None => writeln!(output, "  Dimension:     -").unwrap(),
        }
        if !stats.metadata_keys.is_empty() {
            writeln!(output, "  Metadata keys: {}", stats.metadata_keys.join(", ")).unwrap();
        }
        writeln!(output, "  Snapshot:      {}", stats.snapshot_path.display()).unwrap();
        writeln!(output).unwrap();

        if report.cache_enabled {
            writeln!(output, "Embedding cache: {} entries", report.cache_entries).unwrap();
        } else {
            writeln!(output, "Embedding cache: disabled").unwrap();
        }

        let service = if report.embedding_reachable {
            "[REACHABLE]"
        } else {
            "[UNREACHABLE]"
        };
        writeln!(
            output,
            "Embedding service: {} ({}) {}",
            report.embedding_url, report.embedding_model, service
        )
        .unwrap();
        output
    }

    fn format_operations(
        &self,
        incomplete: &[OperationRecord],
        failed: &[OperationRecord],
    ) -> String {
        if incomplete.is_empty() && failed.is_empty() {
            return "No pending or failed operations.\n".to_string();
        }

        let mut output = String::new();
        if !incomplete.is_empty() {
            writeln!(output, "Incomplete ({}):", incomplete.len()).unwrap();
            for record in incomplete {
                Self::write_operation(&mut output, record);
            }
        }
        if !failed.is_empty() {
            writeln!(output, "Failed ({}):", failed.len()).unwrap();
            for record in failed {
                Self::write_operation(&mut output, record);
            }
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        self.render(results)
    }

    fn format_processing_stats(&self, stats: &ProcessingStats) -> String {
        self.render(stats)
    }

    fn format_stats(&self, report: &StatsReport) -> String {
        self.render(report)
    }

    fn format_operations(
        &self,
        incomplete: &[OperationRecord],
        failed: &[OperationRecord],
    ) -> String {
        self.render(&serde_json::json!({
            "incomplete": incomplete,
            "failed": failed,
        }))
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}
