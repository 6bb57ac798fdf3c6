use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Aggregate counters for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_files: u64,
    pub successful_files: u64,
    pub failed_files: u64,
    /// Files left alone because an identical copy was already ingested
    pub skipped_files: u64,
    pub total_chunks: u64,
    pub total_tokens: u64,
    /// Wall-clock seconds
    pub processing_time: f64,
    pub retry_successes: u64,
    /// File path to error message
    pub errors: BTreeMap<String, String>,
}

impl ProcessingStats {
    pub fn record_success(&mut self, chunks: usize, tokens: u64) {
        self.successful_files += 1;
        self.total_chunks += chunks as u64;
        self.total_tokens += tokens;
    }

    pub fn record_failure(&mut self, file: impl Into<String>, message: impl Into<String>) {
        self.failed_files += 1;
        self.errors.insert(file.into(), message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
