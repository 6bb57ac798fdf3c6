use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use docvec::error::{EmbeddingError, IndexError};
use docvec::models::{Embedding, Metadata, OperationStatus};
use docvec::services::{
    EmbeddingCache, EmbeddingGenerator, EmbeddingService, PROCESS_FILE_OPERATION,
    ParagraphChunker, PipelineOrchestrator, RecoveryManager, VectorIndex,
};
use docvec::utils::RetryPolicy;

const VOCABULARY: [&str; 4] = ["rust", "python", "cooking", "garden"];

/// Embeds text as keyword counts over a tiny vocabulary, with per-text overrides.
#[derive(Default)]
struct KeywordEmbedder {
    fixed: HashMap<String, Embedding>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    fn with_fixed(pairs: &[(&str, [f32; 2])]) -> Self {
        Self {
            fixed: pairs
                .iter()
                .map(|(text, v)| (text.to_string(), v.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(v) = self.fixed.get(text) {
            return Ok(v.clone());
        }
        let lower = text.to_lowercase();
        Ok(VOCABULARY
            .iter()
            .map(|word| lower.matches(word).count() as f32)
            .collect())
    }

    fn model(&self) -> &str {
        "keyword-test"
    }
}

struct Workspace {
    root: TempDir,
    embedder: Arc<KeywordEmbedder>,
}

impl Workspace {
    fn new(embedder: KeywordEmbedder) -> Self {
        Self {
            root: TempDir::new().unwrap(),
            embedder: Arc::new(embedder),
        }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.root.path().join(name)
    }

    fn cache(&self) -> Arc<EmbeddingCache> {
        Arc::new(EmbeddingCache::new(self.path("cache")))
    }

    fn generator(&self) -> Arc<EmbeddingGenerator> {
        Arc::new(
            EmbeddingGenerator::new(self.embedder.clone(), Some(self.cache()))
                .with_batch_size(3)
                .with_retry_policy(RetryPolicy::new(1)),
        )
    }

    async fn index(&self) -> Arc<VectorIndex> {
        let index = VectorIndex::open(self.path("collections"), "docs", self.generator())
            .await
            .unwrap()
            .with_retry_policy(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1)));
        Arc::new(index)
    }

    async fn orchestrator(&self) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            Arc::new(ParagraphChunker::new(200, 1)),
            self.index().await,
            Arc::new(RecoveryManager::new(self.path("operations"))),
        )
    }

    fn write_doc(&self, name: &str, content: &str) -> std::path::PathBuf {
        let path = self.path("docs").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn meta(value: Value) -> Metadata {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_embedding_is_cached_across_generators() {
    let ws = Workspace::new(KeywordEmbedder::default());

    let first = ws.generator().generate_embedding("rust and python").await.unwrap();
    let second = ws.generator().generate_embedding("rust and python").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(ws.embedder.calls(), 1);
    assert_eq!(ws.cache().len().await, 1);
}

#[tokio::test]
async fn test_corrupted_cache_entry_is_recomputed() {
    let ws = Workspace::new(KeywordEmbedder::default());
    let generator = ws.generator();
    generator.generate_embedding("garden").await.unwrap();

    let entry = ws
        .path("cache")
        .join(format!("{}.json", EmbeddingCache::key("garden")));
    std::fs::write(&entry, b"\x00\x01 truncated").unwrap();

    let embedding = generator.generate_embedding("garden").await.unwrap();
    assert_eq!(embedding, vec![0.0, 0.0, 0.0, 1.0]);
    assert_eq!(ws.embedder.calls(), 2);
    assert_eq!(ws.cache().get("garden").await, Some(embedding));
}

#[tokio::test]
async fn test_batch_generation_is_complete() {
    let ws = Workspace::new(KeywordEmbedder::default());
    let texts: Vec<String> = (0..10).map(|i| format!("text number {i}")).collect();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress = move |done: usize, total: usize| sink.lock().unwrap().push((done, total));

    let embeddings = ws
        .generator()
        .batch_generate_with_progress(&texts, false, Some(&progress))
        .await
        .unwrap();

    assert_eq!(embeddings.len(), 10);
    assert!(texts.iter().all(|t| embeddings.contains_key(t)));
    assert_eq!(seen.lock().unwrap().last(), Some(&(10, 10)));
}

#[tokio::test]
async fn test_search_ranking() {
    let ws = Workspace::new(KeywordEmbedder::with_fixed(&[
        ("doc a", [1.0, 0.0]),
        ("doc b", [0.0, 1.0]),
        ("doc c", [1.0, 0.01]),
        ("query", [1.0, 0.0]),
    ]));
    let index = ws.index().await;

    index
        .add_documents(
            &strings(&["doc a", "doc b", "doc c"]),
            &vec![Metadata::new(); 3],
            None,
            10,
        )
        .await
        .unwrap();

    let results = index.query("query", 2, None).await.unwrap();
    let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["doc a", "doc c"]);
}

#[tokio::test]
async fn test_metadata_filter_exactness() {
    let ws = Workspace::new(KeywordEmbedder::default());
    let index = ws.index().await;

    index
        .add_documents(
            &strings(&["rust one", "rust two", "rust three"]),
            &[
                meta(json!({"lang": "en", "year": 2023})),
                meta(json!({"lang": "en", "year": 2024})),
                meta(json!({"lang": "de", "year": 2024})),
            ],
            None,
            2,
        )
        .await
        .unwrap();

    let filter = meta(json!({"lang": "en", "year": 2024}));
    let results = index.query("rust", 10, Some(&filter)).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "rust two");
    for result in &results {
        for (key, value) in &filter {
            assert_eq!(&result.metadata[key], value);
        }
    }
}

#[tokio::test]
async fn test_validation_without_service_contact() {
    let ws = Workspace::new(KeywordEmbedder::default());
    let index = ws.index().await;

    let err = index
        .add_documents_with_retry(&[], &[], None, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Validation(_)));

    let err = index
        .add_documents_with_retry(&strings(&["a", "b"]), &[Metadata::new()], None, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Validation(_)));

    assert_eq!(ws.embedder.calls(), 0);
    assert!(index.is_empty().await);
}

#[tokio::test]
async fn test_crash_recovery_round_trip() {
    let ws = Workspace::new(KeywordEmbedder::default());
    let file = ws.write_doc("notes.txt", "Rust ownership notes.\n\nBorrowing rules.");

    // A previous run started this file and died before completing it
    {
        let recovery = RecoveryManager::new(ws.path("operations"));
        let mut input = Metadata::new();
        input.insert("file_path".into(), Value::String(file.display().to_string()));
        let record = recovery
            .start_operation(PROCESS_FILE_OPERATION, input)
            .await
            .unwrap();
        recovery
            .update_operation(&record.operation_id, OperationStatus::InProgress, None)
            .await
            .unwrap();
    }

    let mut orchestrator = ws.orchestrator().await;
    let stats = orchestrator
        .process_directory(&ws.path("docs"), true)
        .await;

    assert_eq!(stats.retry_successes, 1);
    assert_eq!(stats.successful_files, 1);
    assert_eq!(stats.failed_files, 0);
    assert!(
        RecoveryManager::new(ws.path("operations"))
            .list_incomplete_operations()
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_snapshot_durability() {
    let ws = Workspace::new(KeywordEmbedder::default());
    let texts = strings(&["rust compiler", "python scripts", "cooking pasta"]);

    let before = {
        let index = ws.index().await;
        index
            .add_documents(&texts, &vec![Metadata::new(); 3], None, 2)
            .await
            .unwrap();
        index.query("rust", 3, None).await.unwrap()
    };

    let reopened = ws.index().await;
    assert_eq!(reopened.len().await, 3);
    assert_eq!(reopened.query("rust", 3, None).await.unwrap(), before);
}

#[tokio::test]
async fn test_ingest_then_search() {
    let ws = Workspace::new(KeywordEmbedder::default());
    ws.write_doc("rust.md", "# Rust\n\nRust has ownership and borrowing.");
    ws.write_doc("kitchen/cooking.txt", "Cooking pasta takes ten minutes.");
    ws.write_doc("garden.txt", "The garden needs water.");

    let mut orchestrator = ws.orchestrator().await;
    let stats = orchestrator
        .process_directory(&ws.path("docs"), true)
        .await;
    assert_eq!(stats.successful_files, 3);
    assert!(!stats.has_errors());

    let results = orchestrator
        .index()
        .query("cooking", 1, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata["file_name"], "cooking.txt");

    // A second run finds nothing new
    let mut again = ws.orchestrator().await;
    let calls = ws.embedder.calls();
    let stats = again.process_directory(&ws.path("docs"), true).await;
    assert_eq!(stats.skipped_files, 3);
    assert_eq!(ws.embedder.calls(), calls);
    assert_eq!(again.index().len().await, orchestrator.index().len().await);
    assert!(again.ledger_path().exists());
}
