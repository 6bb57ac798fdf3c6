//! Embedding generation: the remote service client and the cache-first generator.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;
use crate::models::{Embedding, EmbeddingConfig};
use crate::services::cache::EmbeddingCache;
use crate::utils::{RetryPolicy, with_retry};

/// Anything that can turn one text into an embedding vector.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Model identifier used for the embeddings.
    fn model(&self) -> &str;
}

/// Request body for the /api/embeddings endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Response from the /api/embeddings endpoint.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

/// HTTP client for an Ollama-compatible embedding server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a new client with the given configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
        })
    }

    /// Create a client with default configuration.
    pub fn with_defaults() -> Result<Self, EmbeddingError> {
        Self::new(&EmbeddingConfig::default())
    }

    /// Check that the embedding server answers.
    pub async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Get the base URL of the embedding server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_transport(&self, e: reqwest::Error) -> EmbeddingError {
        if e.is_timeout() {
            EmbeddingError::Timeout(self.timeout)
        } else {
            EmbeddingError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingService for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status { status, body });
        }

        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        parsed.embedding.ok_or_else(|| {
            EmbeddingError::InvalidResponse("response has no embedding field".to_string())
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Progress callback invoked as `(completed, total)` after each request batch.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// A text whose embedding could not be produced in a lenient batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingFailure {
    pub text: String,
    pub error: String,
}

/// Cache-first embedding generator with batching and retry.
pub struct EmbeddingGenerator {
    service: Arc<dyn EmbeddingService>,
    cache: Option<Arc<EmbeddingCache>>,
    retry: RetryPolicy,
    batch_size: usize,
    timeout: Duration,
    failures: Mutex<Vec<EmbeddingFailure>>,
    requests: AtomicU64,
    slow_requests: AtomicU64,
}

impl EmbeddingGenerator {
    pub fn new(service: Arc<dyn EmbeddingService>, cache: Option<Arc<EmbeddingCache>>) -> Self {
        Self::from_config(&EmbeddingConfig::default(), service, cache)
    }

    pub fn from_config(
        config: &EmbeddingConfig,
        service: Arc<dyn EmbeddingService>,
        cache: Option<Arc<EmbeddingCache>>,
    ) -> Self {
        Self {
            service,
            cache,
            retry: config.retry_policy(),
            batch_size: config.batch_size.max(1) as usize,
            timeout: config.timeout(),
            failures: Mutex::new(Vec::new()),
            requests: AtomicU64::new(0),
            slow_requests: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        self.service.model()
    }

    pub fn cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.cache.as_ref()
    }

    /// Number of requests sent to the embedding service, retries included.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Number of requests that took longer than half the timeout.
    pub fn slow_requests(&self) -> u64 {
        self.slow_requests.load(Ordering::Relaxed)
    }

    /// Failures recorded by lenient batch calls.
    pub fn failures(&self) -> Vec<EmbeddingFailure> {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn take_failures(&self) -> Vec<EmbeddingFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Embed one text, consulting the cache first.
    pub async fn generate_embedding(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if let Some(cache) = &self.cache
            && let Some(embedding) = cache.get(text).await
        {
            return Ok(embedding);
        }

        let embedding = self.request_with_retry(text).await?;
        if let Some(cache) = &self.cache {
            cache.put(text, &embedding).await;
        }
        Ok(embedding)
    }

    /// Embed many texts; the result is keyed by text.
    pub async fn batch_generate_embeddings(
        &self,
        texts: &[String],
        ignore_errors: bool,
    ) -> Result<HashMap<String, Embedding>, EmbeddingError> {
        self.batch_generate_with_progress(texts, ignore_errors, None)
            .await
    }

    /// Embed many texts, reporting progress after every request batch.
    ///
    /// With `ignore_errors` a text that still fails after retries is left out
    /// of the result and recorded in [`failures`](Self::failures); otherwise
    /// the first such error aborts the call.
    pub async fn batch_generate_with_progress(
        &self,
        texts: &[String],
        ignore_errors: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<HashMap<String, Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(HashMap::new());
        }

        let mut results = match &self.cache {
            Some(cache) => cache.get_batch(texts).await,
            None => HashMap::new(),
        };

        let mut seen = HashSet::new();
        let uncached: Vec<&str> = texts
            .iter()
            .map(String::as_str)
            .filter(|text| !results.contains_key(*text) && seen.insert(*text))
            .collect();

        debug!(
            total = texts.len(),
            cached = results.len(),
            uncached = uncached.len(),
            "embedding batch"
        );

        let total = uncached.len();
        let mut completed = 0;

        for batch in uncached.chunks(self.batch_size) {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|text| async move { (*text, self.request_with_retry(text).await) }),
            )
            .await;

            let mut fresh = HashMap::with_capacity(batch.len());
            let mut first_error = None;

            for (text, outcome) in outcomes {
                match outcome {
                    Ok(embedding) => {
                        fresh.insert(text.to_string(), embedding);
                    }
                    Err(e) if ignore_errors => {
                        warn!("skipping text after embedding failure: {}", e);
                        self.failures
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(EmbeddingFailure {
                                text: text.to_string(),
                                error: e.to_string(),
                            });
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }

            if let Some(cache) = &self.cache {
                cache.put_batch(&fresh).await;
            }

            completed += batch.len();
            if let Some(progress) = progress {
                progress(completed, total);
            }

            if let Some(e) = first_error {
                return Err(e);
            }
            results.extend(fresh);
        }

        if total > 0 {
            info!(
                generated = total,
                cached = results.len().saturating_sub(total),
                "embeddings generated"
            );
        }

        Ok(results)
    }

    async fn request_with_retry(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let this = self;
        with_retry(&self.retry, move || this.request_once(text))
            .await
            .into_result()
    }

    async fn request_once(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let outcome = tokio::time::timeout(self.timeout, self.service.embed(text)).await;

        let elapsed = start.elapsed();
        if elapsed > self.timeout / 2 {
            self.slow_requests.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "slow embedding request"
            );
        }

        match outcome {
            Err(_) => Err(EmbeddingError::Timeout(self.timeout)),
            Ok(Ok(embedding)) if embedding.is_empty() => Err(EmbeddingError::InvalidResponse(
                "empty embedding vector".to_string(),
            )),
            Ok(result) => result,
        }
    }
}
