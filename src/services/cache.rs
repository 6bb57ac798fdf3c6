//! Content-addressable on-disk cache for embedding vectors.
//!
//! Each entry lives in its own JSON file named by the hex SHA-256 of the exact
//! text. Writes to one key are serialized through a per-key lock and land via
//! rename, so readers only ever see complete entries.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::Embedding;
use crate::utils::file::{remove_if_exists, write_atomic};
use crate::utils::calculate_checksum;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    text: String,
    embedding: Embedding,
    timestamp: f64,
}

enum Lookup {
    Hit(Embedding),
    Miss,
    Corrupted(String),
}

pub struct EmbeddingCache {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for a text.
    pub fn key(text: &str) -> String {
        calculate_checksum(text)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_key_lock(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Table plus our handle: nobody else is waiting on this key
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    async fn lookup(&self, text: &str, path: &Path) -> Lookup {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Lookup::Miss,
            Err(e) => {
                debug!(path = %path.display(), "cache read failed: {}", e);
                return Lookup::Miss;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.text != text => {
                Lookup::Corrupted("stored text does not match key".to_string())
            }
            Ok(entry) if entry.embedding.is_empty() => {
                Lookup::Corrupted("empty embedding".to_string())
            }
            Ok(entry) => Lookup::Hit(entry.embedding),
            Err(e) => Lookup::Corrupted(e.to_string()),
        }
    }

    /// Look up the embedding cached for `text`.
    ///
    /// Misses and unreadable entries both return `None`; a corrupted entry is
    /// deleted so the next `put` starts clean.
    pub async fn get(&self, text: &str) -> Option<Embedding> {
        let key = Self::key(text);
        let path = self.entry_path(&key);

        match self.lookup(text, &path).await {
            Lookup::Hit(embedding) => Some(embedding),
            Lookup::Miss => None,
            Lookup::Corrupted(reason) => {
                let lock = self.key_lock(&key);
                let guard = lock.lock().await;
                // A writer may have replaced the entry since the first read
                let result = match self.lookup(text, &path).await {
                    Lookup::Hit(embedding) => Some(embedding),
                    Lookup::Miss => None,
                    Lookup::Corrupted(_) => {
                        warn!(key = %key, "removing corrupted cache entry: {}", reason);
                        if let Err(e) = remove_if_exists(&path).await {
                            warn!(key = %key, "failed to remove corrupted cache entry: {}", e);
                        }
                        None
                    }
                };
                drop(guard);
                self.release_key_lock(&key, lock);
                result
            }
        }
    }

    /// Store an embedding. Failures are logged and swallowed.
    pub async fn put(&self, text: &str, embedding: &[f32]) {
        let key = Self::key(text);
        let entry = CacheEntry {
            text: text.to_string(),
            embedding: embedding.to_vec(),
            timestamp: now_secs(),
        };

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, "failed to serialize cache entry: {}", e);
                return;
            }
        };

        let lock = self.key_lock(&key);
        let guard = lock.lock().await;
        if let Err(e) = write_atomic(&self.entry_path(&key), &bytes).await {
            warn!(key = %key, "failed to write cache entry: {}", e);
        }
        drop(guard);
        self.release_key_lock(&key, lock);
    }

    /// Look up many texts concurrently; only hits are returned.
    pub async fn get_batch(&self, texts: &[String]) -> HashMap<String, Embedding> {
        let unique: HashSet<&str> = texts.iter().map(String::as_str).collect();
        let lookups = unique.into_iter().map(|text| async move {
            self.get(text)
                .await
                .map(|embedding| (text.to_string(), embedding))
        });

        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// Store many entries concurrently.
    pub async fn put_batch(&self, entries: &HashMap<String, Embedding>) {
        let writes = entries
            .iter()
            .map(|(text, embedding)| self.put(text, embedding));
        join_all(writes).await;
    }

    /// Number of entries currently on disk.
    pub async fn len(&self) -> usize {
        let mut count = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if is_entry_file(&entry.path()) {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Delete every cache entry, returning how many were removed.
    pub async fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_entry_file(&path) {
                remove_if_exists(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "json")
        && !path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (EmbeddingCache, TempDir) {
        let dir = TempDir::new().unwrap();
        (EmbeddingCache::new(dir.path().join("cache")), dir)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _dir) = cache();
        assert_eq!(cache.get("hello").await, None);

        cache.put("hello", &[0.1, 0.2, 0.3]).await;
        assert_eq!(cache.get("hello").await, Some(vec![0.1, 0.2, 0.3]));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_case_and_whitespace_sensitive() {
        let (cache, _dir) = cache();
        cache.put("Hello", &[1.0]).await;

        assert_eq!(cache.get("Hello").await, Some(vec![1.0]));
        assert_eq!(cache.get("hello").await, None);
        assert_eq!(cache.get("Hello ").await, None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let (cache, _dir) = cache();
        cache.put("t", &[1.0]).await;
        cache.put("t", &[2.0]).await;
        assert_eq!(cache.get("t").await, Some(vec![2.0]));
    }

    #[tokio::test]
    async fn test_corrupted_entry_self_heals() {
        let (cache, _dir) = cache();
        let path = cache.entry_path(&EmbeddingCache::key("doc"));
        tokio::fs::create_dir_all(cache.dir()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert_eq!(cache.get("doc").await, None);
        assert!(!path.exists());

        cache.put("doc", &[0.5, 0.5]).await;
        assert_eq!(cache.get("doc").await, Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn test_mismatched_text_treated_as_corrupted() {
        let (cache, _dir) = cache();
        cache.put("other", &[1.0]).await;
        let src = cache.entry_path(&EmbeddingCache::key("other"));
        let dst = cache.entry_path(&EmbeddingCache::key("doc"));
        tokio::fs::copy(&src, &dst).await.unwrap();

        assert_eq!(cache.get("doc").await, None);
        assert!(!dst.exists());
        assert_eq!(cache.get("other").await, Some(vec![1.0]));
    }

    #[tokio::test]
    async fn test_put_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // The cache directory path is a regular file, so every write fails
        let cache = EmbeddingCache::new(&blocker);

        cache.put("text", &[1.0]).await;
        assert_eq!(cache.get("text").await, None);
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let (cache, _dir) = cache();
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), vec![1.0, 0.0]);
        entries.insert("b".to_string(), vec![0.0, 1.0]);
        cache.put_batch(&entries).await;

        let texts = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ];
        let hits = cache.get_batch(&texts).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits["a"], vec![1.0, 0.0]);
        assert_eq!(hits["b"], vec![0.0, 1.0]);
        assert!(!hits.contains_key("c"));
    }

    #[tokio::test]
    async fn test_concurrent_writes_same_key() {
        let (cache, _dir) = cache();
        let cache = Arc::new(cache);

        let writes = (0..16).map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.put("shared", &[i as f32; 4]).await })
        });
        for handle in join_all(writes).await {
            handle.unwrap();
        }

        let stored = cache.get("shared").await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|v| *v == stored[0]));
        assert_eq!(cache.len().await, 1);
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _dir) = cache();
        cache.put("a", &[1.0]).await;
        cache.put("b", &[2.0]).await;

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.is_empty().await);
        assert_eq!(cache.get("a").await, None);
    }
}
