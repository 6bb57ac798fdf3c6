//! Flat in-process vector index persisted as one snapshot file per collection.
//!
//! Search is exact: every candidate is scored against the query with cosine
//! similarity, so cost grows linearly with the collection.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::models::{
    CollectionStats, DuplicatePolicy, IndexedDocument, Metadata, SearchResult, VectorStoreConfig,
};
use crate::services::EmbeddingGenerator;
use crate::utils::file::{remove_if_exists, write_atomic};
use crate::utils::{RetryPolicy, sanitize_filename, with_retry};

#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    name: &'a str,
    documents: &'a [IndexedDocument],
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    documents: Vec<IndexedDocument>,
}

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Vec<IndexedDocument>,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn from_documents(documents: Vec<IndexedDocument>) -> Self {
        let positions = documents
            .iter()
            .enumerate()
            .map(|(pos, doc)| (doc.id.clone(), pos))
            .collect();
        Self {
            documents,
            positions,
        }
    }

    fn dimension(&self) -> Option<usize> {
        self.documents.first().map(|d| d.embedding.len())
    }

    fn upsert(&mut self, doc: IndexedDocument, policy: DuplicatePolicy) -> Result<(), IndexError> {
        if let Some(expected) = self.dimension()
            && expected != doc.embedding.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: doc.embedding.len(),
            });
        }

        match self.positions.get(&doc.id) {
            Some(&pos) => {
                if self.documents[pos].same_content(&doc) {
                    return Ok(());
                }
                match policy {
                    DuplicatePolicy::Replace => {
                        self.documents[pos] = doc;
                        Ok(())
                    }
                    DuplicatePolicy::Reject => Err(IndexError::DuplicateId(doc.id)),
                }
            }
            None => {
                self.positions.insert(doc.id.clone(), self.documents.len());
                self.documents.push(doc);
                Ok(())
            }
        }
    }

    /// Keep only documents passing `keep`, returning how many were dropped.
    fn retain(&mut self, mut keep: impl FnMut(&IndexedDocument) -> bool) -> usize {
        let before = self.documents.len();
        let documents: Vec<IndexedDocument> = std::mem::take(&mut self.documents)
            .into_iter()
            .filter(|doc| keep(doc))
            .collect();
        *self = Self::from_documents(documents);
        before - self.documents.len()
    }

    fn clear(&mut self) {
        self.documents.clear();
        self.positions.clear();
    }
}

pub struct VectorIndex {
    name: String,
    snapshot_path: PathBuf,
    generator: Arc<EmbeddingGenerator>,
    duplicate_policy: DuplicatePolicy,
    retry: RetryPolicy,
    collection: RwLock<Collection>,
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Open the collection `name` stored under `dir`, loading its snapshot if present.
    pub async fn open(
        dir: impl AsRef<Path>,
        name: &str,
        generator: Arc<EmbeddingGenerator>,
    ) -> Result<Self, IndexError> {
        let snapshot_path = dir
            .as_ref()
            .join(format!("{}.json", sanitize_filename(name)));

        let documents = match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?.documents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            collection = name,
            documents = documents.len(),
            "opened vector collection"
        );

        Ok(Self {
            name: name.to_string(),
            snapshot_path,
            generator,
            duplicate_policy: DuplicatePolicy::default(),
            retry: RetryPolicy::default(),
            collection: RwLock::new(Collection::from_documents(documents)),
            writer: Mutex::new(()),
        })
    }

    pub async fn from_config(
        config: &VectorStoreConfig,
        generator: Arc<EmbeddingGenerator>,
    ) -> Result<Self, IndexError> {
        Ok(Self::open(config.resolved_dir(), &config.collection, generator)
            .await?
            .with_duplicate_policy(config.on_duplicate))
    }

    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn generator(&self) -> &Arc<EmbeddingGenerator> {
        &self.generator
    }

    pub async fn len(&self) -> usize {
        self.collection.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: &str) -> Option<IndexedDocument> {
        let collection = self.collection.read().await;
        collection
            .positions
            .get(id)
            .map(|&pos| collection.documents[pos].clone())
    }

    /// Embed and store documents batch by batch, returning their ids in input order.
    ///
    /// The snapshot is rewritten after every batch, so an interruption leaves
    /// a prefix of the input persisted.
    pub async fn add_documents(
        &self,
        texts: &[String],
        metadata_list: &[Metadata],
        ids: Option<&[String]>,
        batch_size: usize,
    ) -> Result<Vec<String>, IndexError> {
        validate_input(texts, metadata_list, ids, batch_size)?;

        let _writer = self.writer.lock().await;
        let mut all_ids = Vec::with_capacity(texts.len());

        for start in (0..texts.len()).step_by(batch_size) {
            let end = (start + batch_size).min(texts.len());
            let batch_texts = &texts[start..end];
            let batch_ids: Vec<String> = match ids {
                Some(ids) => ids[start..end].to_vec(),
                None => batch_texts
                    .iter()
                    .map(|t| IndexedDocument::generate_id(t))
                    .collect(),
            };

            let mut embeddings = self
                .generator
                .batch_generate_embeddings(batch_texts, false)
                .await?;

            let mut documents = Vec::with_capacity(batch_texts.len());
            for ((text, id), metadata) in batch_texts
                .iter()
                .zip(batch_ids.iter())
                .zip(&metadata_list[start..end])
            {
                // A text repeated inside the batch shares one embedding
                let embedding = match embeddings.get(text) {
                    Some(e) => e.clone(),
                    None => return Err(IndexError::MissingEmbedding(id.clone())),
                };
                documents.push(IndexedDocument {
                    id: id.clone(),
                    text: text.clone(),
                    embedding,
                    metadata: metadata.clone(),
                });
            }
            embeddings.clear();

            self.commit_batch(documents).await?;
            debug!(
                collection = %self.name,
                batch_start = start,
                batch_len = end - start,
                "committed batch"
            );
            all_ids.extend(batch_ids);
        }

        info!(
            collection = %self.name,
            added = all_ids.len(),
            "documents added"
        );
        Ok(all_ids)
    }

    /// [`add_documents`](Self::add_documents) under the index's retry policy.
    ///
    /// Validation, dimension and duplicate errors fail on the first attempt.
    pub async fn add_documents_with_retry(
        &self,
        texts: &[String],
        metadata_list: &[Metadata],
        ids: Option<&[String]>,
        batch_size: usize,
    ) -> Result<Vec<String>, IndexError> {
        validate_input(texts, metadata_list, ids, batch_size)?;

        let this = self;
        with_retry(&self.retry, move || {
            this.add_documents(texts, metadata_list, ids, batch_size)
        })
        .await
        .into_result()
    }

    async fn commit_batch(&self, documents: Vec<IndexedDocument>) -> Result<(), IndexError> {
        let mut collection = self.collection.write().await;
        let previous = collection.clone();

        for doc in documents {
            if let Err(e) = collection.upsert(doc, self.duplicate_policy) {
                *collection = previous;
                return Err(e);
            }
        }

        if let Err(e) = self.persist(&collection).await {
            *collection = previous;
            return Err(e);
        }
        Ok(())
    }

    async fn persist(&self, collection: &Collection) -> Result<(), IndexError> {
        let snapshot = SnapshotRef {
            name: &self.name,
            documents: &collection.documents,
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        write_atomic(&self.snapshot_path, &bytes).await?;
        Ok(())
    }

    /// Remove every document matching `filter` except those whose id is in `keep`.
    ///
    /// Returns the number of documents removed. An empty filter matches nothing.
    pub async fn delete_where(
        &self,
        filter: &Metadata,
        keep: &[String],
    ) -> Result<usize, IndexError> {
        if filter.is_empty() {
            return Ok(0);
        }

        let _writer = self.writer.lock().await;
        let mut collection = self.collection.write().await;
        let previous = collection.clone();

        let removed = collection.retain(|doc| !doc.matches(filter) || keep.contains(&doc.id));
        if removed == 0 {
            return Ok(0);
        }
        if let Err(e) = self.persist(&collection).await {
            *collection = previous;
            return Err(e);
        }

        info!(collection = %self.name, removed, "documents deleted");
        Ok(removed)
    }

    /// Rank documents against each query text by cosine similarity.
    ///
    /// Returns one list per query, best match first. Documents must match every
    /// pair in `filter` exactly to be considered.
    pub async fn search(
        &self,
        query_texts: &[String],
        n_results: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Vec<SearchResult>>, IndexError> {
        if query_texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .generator
            .batch_generate_embeddings(query_texts, false)
            .await?;

        let collection = self.collection.read().await;
        let candidates: Vec<&IndexedDocument> = collection
            .documents
            .iter()
            .filter(|doc| filter.is_none_or(|f| doc.matches(f)))
            .collect();

        let Some(dim) = collection.dimension() else {
            return Ok(vec![Vec::new(); query_texts.len()]);
        };
        if candidates.is_empty() || n_results == 0 {
            return Ok(vec![Vec::new(); query_texts.len()]);
        }

        let flat: Vec<f32> = candidates
            .iter()
            .flat_map(|doc| doc.embedding.iter().copied())
            .collect();
        let matrix = Array2::from_shape_vec((candidates.len(), dim), flat).map_err(|_| {
            IndexError::Validation("collection has inconsistent embedding sizes".to_string())
        })?;
        let norms: Array1<f32> = matrix.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        let mut all_results = Vec::with_capacity(query_texts.len());
        for query in query_texts {
            let query_embedding = embeddings
                .get(query)
                .ok_or_else(|| IndexError::MissingEmbedding(query.clone()))?;
            if query_embedding.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    actual: query_embedding.len(),
                });
            }

            let scores = cosine_scores(&matrix, &norms, ArrayView1::from(&query_embedding[..]));
            let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
            // Stable: equal scores keep insertion order
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

            let results = ranked
                .into_iter()
                .take(n_results)
                .map(|(i, score)| {
                    let doc = candidates[i];
                    SearchResult {
                        id: doc.id.clone(),
                        text: doc.text.clone(),
                        score,
                        distance: 1.0 - score,
                        metadata: doc.metadata.clone(),
                    }
                })
                .collect();
            all_results.push(results);
        }

        Ok(all_results)
    }

    /// Single-query convenience over [`search`](Self::search).
    pub async fn query(
        &self,
        text: &str,
        n_results: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let mut results = self
            .search(&[text.to_string()], n_results, filter)
            .await?;
        Ok(results.pop().unwrap_or_default())
    }

    pub async fn get_collection_stats(&self) -> CollectionStats {
        let collection = self.collection.read().await;
        let metadata_keys: BTreeSet<&String> = collection
            .documents
            .iter()
            .flat_map(|doc| doc.metadata.keys())
            .collect();

        CollectionStats {
            name: self.name.clone(),
            total_documents: collection.documents.len(),
            embedding_dim: collection.dimension(),
            metadata_keys: metadata_keys.into_iter().cloned().collect(),
            snapshot_path: self.snapshot_path.clone(),
        }
    }

    /// Remove the snapshot and every in-memory document.
    pub async fn delete_collection(&self) -> Result<(), IndexError> {
        let _writer = self.writer.lock().await;
        let mut collection = self.collection.write().await;
        remove_if_exists(&self.snapshot_path).await?;
        let removed = collection.documents.len();
        collection.clear();
        info!(collection = %self.name, removed, "collection deleted");
        Ok(())
    }
}

fn validate_input(
    texts: &[String],
    metadata_list: &[Metadata],
    ids: Option<&[String]>,
    batch_size: usize,
) -> Result<(), IndexError> {
    if texts.is_empty() {
        return Err(IndexError::Validation("no texts provided".to_string()));
    }
    if texts.len() != metadata_list.len() {
        return Err(IndexError::Validation(format!(
            "texts and metadata_list lengths differ: {} != {}",
            texts.len(),
            metadata_list.len()
        )));
    }
    if let Some(ids) = ids
        && ids.len() != texts.len()
    {
        return Err(IndexError::Validation(format!(
            "texts and ids lengths differ: {} != {}",
            texts.len(),
            ids.len()
        )));
    }
    if batch_size == 0 {
        return Err(IndexError::Validation(
            "batch_size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Cosine similarity of `query` against every row of `matrix`.
///
/// A zero-norm row or query scores 0, as does any pair whose arithmetic
/// overflows to a non-finite value.
fn cosine_scores(matrix: &Array2<f32>, norms: &Array1<f32>, query: ArrayView1<f32>) -> Vec<f32> {
    let query_norm = query.dot(&query).sqrt();
    let dots = matrix.dot(&query);

    dots.iter()
        .zip(norms.iter())
        .map(|(dot, norm)| {
            let denom = norm * query_norm;
            let score = if denom == 0.0 { 0.0 } else { dot / denom };
            if score.is_finite() { score } else { 0.0 }
        })
        .collect()
}
