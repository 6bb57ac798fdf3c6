//! Deterministic in-process embedding service for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbeddingError;
use crate::models::Embedding;
use crate::services::EmbeddingService;

pub const FAKE_DIM: usize = 8;

#[derive(Default)]
pub struct FakeEmbeddingService {
    vectors: HashMap<String, Embedding>,
    failing: HashSet<String>,
    invalid: HashSet<String>,
    transient_failures: AtomicUsize,
    delay: Option<Duration>,
    calls: AtomicUsize,
    per_text: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeEmbeddingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed vector returned for `text`.
    pub fn with_vector(mut self, text: &str, vector: Embedding) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    /// `text` fails with a transport error on every attempt.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// `text` gets a response without an embedding.
    pub fn invalid_on(mut self, text: &str) -> Self {
        self.invalid.insert(text.to_string());
        self
    }

    /// The first `n` calls fail with a transport error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.per_text
            .lock()
            .unwrap()
            .get(text)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The vector this service answers for `text`.
    pub fn vector_for(&self, text: &str) -> Embedding {
        if let Some(v) = self.vectors.get(text) {
            return v.clone();
        }
        let hash = Sha256::digest(text.as_bytes());
        hash.iter()
            .take(FAKE_DIM)
            .map(|b| *b as f32 / 255.0 - 0.5)
            .collect()
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_text
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient || self.failing.contains(text) {
            return Err(EmbeddingError::Transport("connection reset".to_string()));
        }
        if self.invalid.contains(text) {
            return Err(EmbeddingError::InvalidResponse(
                "response has no embedding field".to_string(),
            ));
        }
        Ok(self.vector_for(text))
    }

    fn model(&self) -> &str {
        "fake-embed"
    }
}
