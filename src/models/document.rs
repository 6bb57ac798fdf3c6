use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::calculate_checksum;

/// Fixed-length embedding vector produced by the embedding service.
pub type Embedding = Vec<f32>;

/// Open key/value bag attached to chunks and indexed documents.
pub type Metadata = Map<String, Value>;

/// A chunk of text handed to the pipeline by a chunking collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// A record stored in a vector index collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    pub embedding: Embedding,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IndexedDocument {
    /// Content-derived id used when the caller supplies none.
    pub fn generate_id(text: &str) -> String {
        calculate_checksum(text)
    }

    /// True when every key/value pair of `filter` is present with an equal value.
    pub fn matches(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.metadata.get(key) == Some(expected))
    }

    /// Same id, text and metadata; used to make re-adds idempotent.
    pub fn same_content(&self, other: &IndexedDocument) -> bool {
        self.id == other.id && self.text == other.text && self.metadata == other.metadata
    }
}
