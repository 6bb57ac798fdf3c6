//! Splitting source files into embeddable chunks.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::ChunkError;
use crate::models::{Chunk, Metadata};
use crate::utils::file::has_extension;
use crate::utils::has_meaningful_content;

/// Turns one file into chunks of text with metadata.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Whether this chunker handles the file at `path`.
    fn accepts(&self, path: &Path) -> bool;

    async fn chunk(&self, path: &Path) -> Result<Vec<Chunk>, ChunkError>;
}

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\r?\n[ \t]*)+").unwrap());

const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Paragraph-based chunker for plain text and Markdown files.
///
/// Paragraphs are separated by blank lines. Consecutive short paragraphs are
/// merged until a chunk would exceed `max_chars`; a single paragraph longer
/// than that becomes its own chunk.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    max_chars: usize,
    min_chars: usize,
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self {
            max_chars: 1500,
            min_chars: 20,
        }
    }
}

impl ParagraphChunker {
    pub fn new(max_chars: usize, min_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            min_chars,
        }
    }

    /// Split already-loaded text into chunk bodies.
    pub fn split(&self, content: &str) -> Vec<String> {
        let normalized = content.replace("\r\n", "\n");
        let mut chunks = Vec::new();
        let mut current = String::new();

        for paragraph in PARAGRAPH_BREAK
            .split(&normalized)
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            if !current.is_empty() && current.len() + 2 + paragraph.len() > self.max_chars {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .filter(|c| has_meaningful_content(c, self.min_chars))
            .collect()
    }
}

#[async_trait]
impl Chunker for ParagraphChunker {
    fn accepts(&self, path: &Path) -> bool {
        path.is_file() && has_extension(path, PLAIN_TEXT_EXTENSIONS)
    }

    async fn chunk(&self, path: &Path) -> Result<Vec<Chunk>, ChunkError> {
        if !has_extension(path, PLAIN_TEXT_EXTENSIONS) {
            return Err(ChunkError::Unsupported(path.display().to_string()));
        }

        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8(bytes).map_err(|e| {
            ChunkError::ExtractionError(format!("{} is not valid UTF-8: {}", path.display(), e))
        })?;

        let source = path.display().to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(self
            .split(&content)
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                let mut metadata = Metadata::new();
                metadata.insert("source".into(), Value::String(source.clone()));
                metadata.insert("file_name".into(), Value::String(file_name.clone()));
                metadata.insert("chunk_index".into(), Value::from(index));
                Chunk::new(text, metadata)
            })
            .collect())
    }
}
