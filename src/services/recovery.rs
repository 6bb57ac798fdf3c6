//! Durable operation records for resuming interrupted work.
//!
//! Every unit of work gets a JSON file in the state directory while it runs.
//! Completed operations are removed; anything else left behind after a crash
//! shows up in [`RecoveryManager::list_incomplete_operations`].

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::error::RecoveryError;
use crate::models::{Metadata, OperationRecord, OperationStatus};
use crate::utils::file::{remove_if_exists, write_atomic};
use crate::utils::sanitize_filename;

pub struct RecoveryManager {
    state_dir: PathBuf,
    operations: Mutex<HashMap<String, OperationRecord>>,
    sequence: AtomicU64,
}

impl RecoveryManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            operations: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn record_path(&self, operation_id: &str) -> PathBuf {
        self.state_dir.join(format!("{operation_id}.json"))
    }

    fn track(&self, record: &OperationRecord) {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.operation_id.clone(), record.clone());
    }

    fn tracked(&self, operation_id: &str) -> Option<OperationRecord> {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(operation_id)
            .cloned()
    }

    fn untrack(&self, operation_id: &str) {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(operation_id);
    }

    async fn persist(&self, record: &OperationRecord) -> Result<(), RecoveryError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.operation_id), &bytes).await?;
        Ok(())
    }

    async fn load(&self, operation_id: &str) -> Result<OperationRecord, RecoveryError> {
        match tokio::fs::read(self.record_path(operation_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RecoveryError::NotFound(operation_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record the start of a new operation and persist it.
    pub async fn start_operation(
        &self,
        operation_type: &str,
        input_data: Metadata,
    ) -> Result<OperationRecord, RecoveryError> {
        let now = chrono::Utc::now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let operation_id = format!(
            "{}_{}_{}",
            sanitize_filename(operation_type),
            now.timestamp_millis(),
            sequence
        );

        let record = OperationRecord {
            operation_id,
            start_time: now.timestamp_micros() as f64 / 1_000_000.0,
            operation_type: operation_type.to_string(),
            input_data,
            status: OperationStatus::Started,
            error: None,
            retry_count: 0,
        };

        self.persist(&record).await?;
        self.track(&record);
        debug!(operation_id = %record.operation_id, "operation started");
        Ok(record)
    }

    /// Move an operation to `status`.
    ///
    /// Completed operations are forgotten entirely; other statuses rewrite
    /// the record on disk.
    pub async fn update_operation(
        &self,
        operation_id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<(), RecoveryError> {
        if status == OperationStatus::Completed {
            let existed = self.tracked(operation_id).is_some()
                || tokio::fs::try_exists(self.record_path(operation_id)).await?;
            if !existed {
                return Err(RecoveryError::NotFound(operation_id.to_string()));
            }
            remove_if_exists(&self.record_path(operation_id)).await?;
            self.untrack(operation_id);
            debug!(operation_id, "operation completed");
            return Ok(());
        }

        let mut record = match self.tracked(operation_id) {
            Some(record) => record,
            None => self.load(operation_id).await?,
        };
        record.status = status;
        if error.is_some() {
            record.error = error;
        }

        self.persist(&record).await?;
        if status == OperationStatus::Failed {
            warn!(
                operation_id,
                error = record.error.as_deref().unwrap_or(""),
                "operation failed"
            );
        }
        self.track(&record);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<OperationRecord>, RecoveryError> {
        let mut entries = match tokio::fs::read_dir(&self.state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_record_file(&path) {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<OperationRecord>(&bytes)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), "skipping unreadable operation record: {}", e),
            }
        }
        Ok(records)
    }

    /// Operations left neither completed nor failed, keyed by id.
    pub async fn list_incomplete_operations(
        &self,
    ) -> Result<BTreeMap<String, OperationRecord>, RecoveryError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| (r.operation_id.clone(), r))
            .collect())
    }

    pub async fn list_failed_operations(
        &self,
    ) -> Result<BTreeMap<String, OperationRecord>, RecoveryError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|r| r.status == OperationStatus::Failed)
            .map(|r| (r.operation_id.clone(), r))
            .collect())
    }

    /// Take over an operation left behind by an earlier run.
    pub async fn resume_operation(
        &self,
        record: &OperationRecord,
    ) -> Result<OperationRecord, RecoveryError> {
        let mut resumed = record.clone();
        resumed.retry_count += 1;
        resumed.status = OperationStatus::InProgress;
        resumed.error = None;

        self.persist(&resumed).await?;
        self.track(&resumed);
        info!(
            operation_id = %resumed.operation_id,
            retry_count = resumed.retry_count,
            "resuming interrupted operation"
        );
        Ok(resumed)
    }

    /// Delete every failed record, returning how many were removed.
    pub async fn purge_failed(&self) -> Result<usize, RecoveryError> {
        let failed = self.list_failed_operations().await?;
        for id in failed.keys() {
            remove_if_exists(&self.record_path(id)).await?;
            self.untrack(id);
        }
        Ok(failed.len())
    }
}

fn is_record_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
        && !path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn input(path: &str) -> Metadata {
        json!({ "file_path": path }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_start_operation_persists_record() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());

        let record = manager
            .start_operation("process_pdf", input("/tmp/a.txt"))
            .await
            .unwrap();

        assert!(record.operation_id.starts_with("process_pdf_"));
        assert_eq!(record.status, OperationStatus::Started);
        assert_eq!(record.retry_count, 0);
        assert!(dir.path().join(format!("{}.json", record.operation_id)).exists());
    }

    #[tokio::test]
    async fn test_operation_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());

        let a = manager.start_operation("op", Metadata::new()).await.unwrap();
        let b = manager.start_operation("op", Metadata::new()).await.unwrap();
        assert_ne!(a.operation_id, b.operation_id);
    }

    #[tokio::test]
    async fn test_completed_operation_is_removed() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());
        let record = manager.start_operation("op", Metadata::new()).await.unwrap();

        manager
            .update_operation(&record.operation_id, OperationStatus::Completed, None)
            .await
            .unwrap();

        assert!(manager.list_incomplete_operations().await.unwrap().is_empty());
        assert!(!dir.path().join(format!("{}.json", record.operation_id)).exists());
    }

    #[tokio::test]
    async fn test_incomplete_operations_survive_restart() {
        let dir = TempDir::new().unwrap();
        let id = {
            let manager = RecoveryManager::new(dir.path());
            let record = manager
                .start_operation("process_pdf", input("/docs/a.txt"))
                .await
                .unwrap();
            manager
                .update_operation(&record.operation_id, OperationStatus::InProgress, None)
                .await
                .unwrap();
            record.operation_id
        };

        let manager = RecoveryManager::new(dir.path());
        let incomplete = manager.list_incomplete_operations().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[&id].status, OperationStatus::InProgress);
        assert_eq!(incomplete[&id].input_str("file_path"), Some("/docs/a.txt"));

        // A fresh manager can still complete it
        manager
            .update_operation(&id, OperationStatus::Completed, None)
            .await
            .unwrap();
        assert!(manager.list_incomplete_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_operations_are_not_incomplete() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());
        let record = manager.start_operation("op", Metadata::new()).await.unwrap();

        manager
            .update_operation(
                &record.operation_id,
                OperationStatus::Failed,
                Some("boom".to_string()),
            )
            .await
            .unwrap();

        assert!(manager.list_incomplete_operations().await.unwrap().is_empty());
        let failed = manager.list_failed_operations().await.unwrap();
        assert_eq!(failed[&record.operation_id].error.as_deref(), Some("boom"));

        assert_eq!(manager.purge_failed().await.unwrap(), 1);
        assert!(manager.list_failed_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_operation() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());

        let err = manager
            .update_operation("missing", OperationStatus::InProgress, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NotFound(_)));

        let err = manager
            .update_operation("missing", OperationStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resume_operation_bumps_retry_count() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());
        let record = manager.start_operation("op", Metadata::new()).await.unwrap();

        let resumed = manager.resume_operation(&record).await.unwrap();
        assert_eq!(resumed.retry_count, 1);
        assert_eq!(resumed.status, OperationStatus::InProgress);

        let incomplete = manager.list_incomplete_operations().await.unwrap();
        assert_eq!(incomplete[&record.operation_id].retry_count, 1);
    }

    #[tokio::test]
    async fn test_unreadable_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path());
        manager.start_operation("op", Metadata::new()).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();

        let incomplete = manager.list_incomplete_operations().await.unwrap();
        assert_eq!(incomplete.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_state_dir_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = RecoveryManager::new(dir.path().join("never-created"));
        assert!(manager.list_incomplete_operations().await.unwrap().is_empty());
    }
}
