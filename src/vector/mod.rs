//! Embedding index: one vector per chunk, searchable by cosine similarity.
//!
//! Two backends are provided:
//! - `QdrantIndex`: Qdrant over its REST API
//! - `SqliteEmbeddingIndex`: embedded single-file store with brute-force cosine

mod qdrant;
mod sqlite;

pub use qdrant::QdrantIndex;
pub use sqlite::SqliteEmbeddingIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::RetrievalError;
use crate::models::{Chunk, ContentType, SearchResult};

/// Conjunction of exact-match predicates over indexed payload fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorFilter {
    pub project: Option<String>,
    pub content_type: Option<ContentType>,
    pub url: Option<String>,
}

impl VectorFilter {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: Option<ContentType>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.project.as_ref().map_or(true, |p| p == &chunk.project)
            && self.content_type.map_or(true, |t| t == chunk.content_type)
            && self.url.as_ref().map_or(true, |u| u == &chunk.url)
    }
}

#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Idempotent by chunk id. `chunks` and `embeddings` are parallel slices.
    async fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RetrievalError>;

    /// Nearest neighbors by cosine similarity, orphaned chunks excluded.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchResult>, RetrievalError>;

    async fn delete_by_url(&self, url: &str) -> Result<(), RetrievalError>;

    async fn delete_by_project(&self, project: &str) -> Result<(), RetrievalError>;

    async fn get_urls_for_project(&self, project: &str) -> Result<Vec<String>, RetrievalError>;

    async fn mark_orphaned(&self, urls: &[String], orphaned: bool) -> Result<(), RetrievalError>;
}

pub(crate) fn check_upsert_input(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    dimension: Option<usize>,
) -> Result<(), RetrievalError> {
    if chunks.len() != embeddings.len() {
        return Err(RetrievalError::InvalidInput(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }

    let expected = dimension.or_else(|| embeddings.first().map(Vec::len));
    if let Some(expected) = expected {
        if let Some((chunk, embedding)) = chunks
            .iter()
            .zip(embeddings)
            .find(|(_, e)| e.len() != expected || e.is_empty())
        {
            return Err(RetrievalError::InvalidInput(format!(
                "embedding for chunk {} has dimension {}, expected {}",
                chunk.id,
                embedding.len(),
                expected
            )));
        }
    }

    Ok(())
}
