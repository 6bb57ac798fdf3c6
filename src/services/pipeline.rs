//! Ingestion pipeline: discover files, chunk, embed and index them.
//!
//! Each file is tracked as an operation so a crashed run can be resumed, and
//! a ledger of file checksums lets later runs skip unchanged files. When a
//! changed file is ingested again, chunks from its previous version are
//! dropped from the index.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::models::{Metadata, OperationRecord, OperationStatus, PipelineConfig, ProcessingStats};
use crate::services::{Chunker, RecoveryManager, VectorIndex};
use crate::utils::file::{calculate_file_checksum, remove_if_exists, write_atomic};
use crate::utils::estimate_tokens;

/// Operation type recorded for every ingested file.
pub const PROCESS_FILE_OPERATION: &str = "process_pdf";

const LEDGER_DIR: &str = "ledger";
const LEDGER_FILE: &str = "processed.json";

/// Called after each file with `(completed, total, path)`.
pub type FileProgressFn = dyn Fn(usize, usize, &Path) + Send + Sync;

/// Interrupted operations left behind for one file.
struct RecoveredFile {
    path: PathBuf,
    record: OperationRecord,
    /// Further incomplete records for the same file, settled with the outcome of `record`
    duplicates: Vec<OperationRecord>,
}

pub struct PipelineOrchestrator {
    chunker: Arc<dyn Chunker>,
    index: Arc<VectorIndex>,
    recovery: Arc<RecoveryManager>,
    batch_size: usize,
    exclude_patterns: Vec<glob::Pattern>,
    ledger_path: PathBuf,
    ledger: Option<BTreeMap<String, String>>,
    processed: HashSet<PathBuf>,
    stats: ProcessingStats,
    progress: Option<Arc<FileProgressFn>>,
}

impl PipelineOrchestrator {
    pub fn new(
        chunker: Arc<dyn Chunker>,
        index: Arc<VectorIndex>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        let ledger_path = recovery.state_dir().join(LEDGER_DIR).join(LEDGER_FILE);
        Self {
            chunker,
            index,
            recovery,
            batch_size: 32,
            exclude_patterns: Vec::new(),
            ledger_path,
            ledger: None,
            processed: HashSet::new(),
            stats: ProcessingStats::default(),
            progress: None,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        chunker: Arc<dyn Chunker>,
        index: Arc<VectorIndex>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        Self::new(chunker, index, recovery)
            .with_batch_size(config.batch_size)
            .with_exclude_patterns(&config.exclude_patterns)
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Glob patterns matched against full paths; invalid patterns are ignored.
    #[must_use]
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Self {
        self.exclude_patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, "ignoring invalid exclude pattern: {}", e);
                    None
                }
            })
            .collect();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<FileProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Ingest every accepted file under `dir`.
    ///
    /// Interrupted operations for files in scope are resumed first. Per-file
    /// failures are recorded in the returned stats rather than aborting.
    pub async fn process_directory(&mut self, dir: &Path, recursive: bool) -> ProcessingStats {
        let started = Instant::now();
        self.stats = ProcessingStats::default();
        self.processed.clear();

        match self.discover(dir, recursive).await {
            Ok(files) => self.run(files).await,
            Err(e) => {
                warn!(dir = %dir.display(), "cannot scan directory: {}", e);
                self.stats
                    .errors
                    .insert(dir.display().to_string(), e.to_string());
            }
        }

        self.stats.processing_time = started.elapsed().as_secs_f64();
        info!(
            total = self.stats.total_files,
            succeeded = self.stats.successful_files,
            failed = self.stats.failed_files,
            skipped = self.stats.skipped_files,
            retried = self.stats.retry_successes,
            "directory processed"
        );
        self.stats.clone()
    }

    /// Ingest an explicit list of files with the same recovery behaviour as
    /// [`process_directory`](Self::process_directory).
    pub async fn process_files(&mut self, paths: &[PathBuf]) -> ProcessingStats {
        let started = Instant::now();
        self.stats = ProcessingStats::default();
        self.processed.clear();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(normalize(path).await);
        }
        self.run(files).await;

        self.stats.processing_time = started.elapsed().as_secs_f64();
        self.stats.clone()
    }

    /// Ingest one file. Returns whether the file is now in the index.
    ///
    /// A file already handled by this orchestrator run is not touched again.
    pub async fn process_pdf(&mut self, path: &Path) -> bool {
        let path = normalize(path).await;
        self.load_ledger().await;
        self.process_file(&path, None).await
    }

    /// Forget which files were ingested by previous runs.
    pub async fn reset_ledger(&mut self) -> Result<(), PipelineError> {
        remove_if_exists(&self.ledger_path).await?;
        self.ledger = Some(BTreeMap::new());
        Ok(())
    }

    async fn run(&mut self, files: Vec<PathBuf>) {
        self.load_ledger().await;
        let total = files.len();
        let in_scope: HashSet<&PathBuf> = files.iter().collect();
        let mut handled: HashSet<PathBuf> = HashSet::new();
        let mut completed = 0;

        for recovered in self.recoverable(&in_scope).await {
            let RecoveredFile {
                path,
                record,
                duplicates,
            } = recovered;
            let resumed = match self.recovery.resume_operation(&record).await {
                Ok(resumed) => resumed,
                Err(e) => {
                    warn!(operation_id = %record.operation_id, "cannot resume operation: {}", e);
                    continue;
                }
            };
            let succeeded = self.process_file(&path, Some(resumed)).await;
            if succeeded {
                self.stats.retry_successes += 1;
            }
            self.settle_duplicates(&path, &duplicates, succeeded).await;
            completed += 1;
            self.report(completed, total, &path);
            handled.insert(path);
        }

        for path in &files {
            if handled.contains(path) {
                continue;
            }
            self.process_file(path, None).await;
            completed += 1;
            self.report(completed, total, path);
        }
    }

    /// Incomplete file operations from earlier runs whose file is among `in_scope`,
    /// grouped by file in operation id order.
    async fn recoverable(&self, in_scope: &HashSet<&PathBuf>) -> Vec<RecoveredFile> {
        let incomplete = match self.recovery.list_incomplete_operations().await {
            Ok(incomplete) => incomplete,
            Err(e) => {
                warn!("cannot list incomplete operations: {}", e);
                return Vec::new();
            }
        };

        let mut groups: HashMap<PathBuf, usize> = HashMap::new();
        let mut recoverable: Vec<RecoveredFile> = Vec::new();
        for record in incomplete.into_values() {
            if record.operation_type != PROCESS_FILE_OPERATION {
                continue;
            }
            let Some(file_path) = record.input_str("file_path") else {
                continue;
            };
            let path = normalize(Path::new(file_path)).await;
            if !in_scope.contains(&path) {
                continue;
            }
            match groups.get(&path) {
                Some(&group) => recoverable[group].duplicates.push(record),
                None => {
                    groups.insert(path.clone(), recoverable.len());
                    recoverable.push(RecoveredFile {
                        path,
                        record,
                        duplicates: Vec::new(),
                    });
                }
            }
        }
        recoverable
    }

    /// Close the extra records of a resumed file so later runs do not pick them up.
    async fn settle_duplicates(
        &self,
        path: &Path,
        duplicates: &[OperationRecord],
        succeeded: bool,
    ) {
        let (status, error) = if succeeded {
            (OperationStatus::Completed, None)
        } else {
            let message = self
                .stats
                .errors
                .get(&path.display().to_string())
                .cloned()
                .unwrap_or_else(|| "resumed operation failed".to_string());
            (OperationStatus::Failed, Some(message))
        };

        for record in duplicates {
            debug!(operation_id = %record.operation_id, %status, "settling duplicate operation");
            if let Err(e) = self
                .recovery
                .update_operation(&record.operation_id, status, error.clone())
                .await
            {
                warn!(
                    operation_id = %record.operation_id,
                    "cannot settle duplicate operation: {}", e
                );
            }
        }
    }

    fn report(&self, completed: usize, total: usize, path: &Path) {
        if let Some(progress) = &self.progress {
            progress(completed, total, path);
        }
    }

    async fn process_file(&mut self, path: &Path, resumed: Option<OperationRecord>) -> bool {
        if self.processed.contains(path) {
            debug!(path = %path.display(), "already processed in this run");
            return true;
        }

        self.stats.total_files += 1;
        let key = path.display().to_string();
        let checksum = calculate_file_checksum(path).await.ok();

        if resumed.is_none()
            && let (Some(sum), Some(ledger)) = (&checksum, &self.ledger)
            && ledger.get(&key) == Some(sum)
        {
            debug!(path = %key, "unchanged since last run, skipping");
            self.stats.skipped_files += 1;
            self.processed.insert(path.to_path_buf());
            return true;
        }

        let record = match resumed {
            Some(record) => record,
            None => match self.begin(&key).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %key, "cannot record operation: {}", e);
                    self.stats.record_failure(key, e.to_string());
                    return false;
                }
            },
        };

        match self.ingest(path).await {
            Ok((chunks, tokens)) => {
                if let Err(e) = self
                    .recovery
                    .update_operation(&record.operation_id, OperationStatus::Completed, None)
                    .await
                {
                    warn!(operation_id = %record.operation_id, "cannot complete operation: {}", e);
                }
                self.stats.record_success(chunks, tokens);
                self.processed.insert(path.to_path_buf());
                if let Some(sum) = checksum {
                    self.remember(key.clone(), sum).await;
                }
                info!(path = %key, chunks, "file ingested");
                true
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(e) = self
                    .recovery
                    .update_operation(
                        &record.operation_id,
                        OperationStatus::Failed,
                        Some(message.clone()),
                    )
                    .await
                {
                    warn!(operation_id = %record.operation_id, "cannot mark operation failed: {}", e);
                }
                warn!(path = %key, "file failed: {}", message);
                self.stats.record_failure(key, message);
                false
            }
        }
    }

    async fn begin(&self, key: &str) -> Result<OperationRecord, PipelineError> {
        let mut input = Metadata::new();
        input.insert("file_path".into(), Value::String(key.to_string()));

        let record = self
            .recovery
            .start_operation(PROCESS_FILE_OPERATION, input)
            .await?;
        self.recovery
            .update_operation(&record.operation_id, OperationStatus::InProgress, None)
            .await?;
        Ok(record)
    }

    async fn ingest(&self, path: &Path) -> Result<(usize, u64), PipelineError> {
        let chunks = self.chunker.chunk(path).await?;
        if chunks.is_empty() {
            return Err(PipelineError::NoChunks);
        }

        let (texts, metadata): (Vec<String>, Vec<Metadata>) =
            chunks.into_iter().map(|c| (c.text, c.metadata)).unzip();
        let tokens = estimate_tokens(&texts.join("\n"));

        let ids = self
            .index
            .add_documents_with_retry(&texts, &metadata, None, self.batch_size)
            .await?;

        // Chunks from an earlier version of this file
        let mut source = Metadata::new();
        source.insert("source".into(), Value::String(path.display().to_string()));
        let stale = self.index.delete_where(&source, &ids).await?;
        if stale > 0 {
            debug!(path = %path.display(), stale, "removed outdated chunks");
        }
        Ok((texts.len(), tokens))
    }

    async fn discover(&self, dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, PipelineError> {
        let root = tokio::fs::canonicalize(dir)
            .await
            .map_err(|e| PipelineError::WalkError(format!("{}: {}", dir.display(), e)))?;

        let mut walker = WalkDir::new(&root).follow_links(false).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }

            let path_str = path.to_string_lossy();
            if self.exclude_patterns.iter().any(|p| p.matches(&path_str)) {
                continue;
            }
            if self.chunker.accepts(path) {
                files.push(path.to_path_buf());
            }
        }

        debug!(root = %root.display(), files = files.len(), "discovered files");
        Ok(files)
    }

    async fn load_ledger(&mut self) {
        if self.ledger.is_some() {
            return;
        }
        let ledger = match tokio::fs::read(&self.ledger_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.ledger_path.display(), "ignoring unreadable ledger: {}", e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.ledger_path.display(), "cannot read ledger: {}", e);
                BTreeMap::new()
            }
        };
        self.ledger = Some(ledger);
    }

    async fn remember(&mut self, key: String, checksum: String) {
        let ledger = self.ledger.get_or_insert_with(BTreeMap::new);
        ledger.insert(key, checksum);

        let written = match serde_json::to_vec_pretty(ledger) {
            Ok(bytes) => write_atomic(&self.ledger_path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            warn!(path = %self.ledger_path.display(), "cannot write ledger: {}", e);
        }
    }
}

/// Canonical form of `path` when it exists, otherwise the path as given.
async fn normalize(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}
