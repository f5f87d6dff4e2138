use async_trait::async_trait;
use serde::Serialize;

use crate::core::errors::RetrievalError;
use crate::models::ContentType;
use crate::query::QueryType;

/// Turns texts into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One embedding per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// What the reranker sees of a fused candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankCandidate {
    pub title: String,
    pub section: Option<String>,
    pub content_type: ContentType,
    /// Content truncated to the policy's preview length.
    pub preview: String,
}

/// Relevance scores in `[0, 1]`, parallel to the candidates that were scored.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub scores: Vec<f64>,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(
        &self,
        query: &str,
        query_type: QueryType,
        candidates: &[RerankCandidate],
    ) -> Result<RerankOutcome, RetrievalError>;
}

/// Splits a long question into 2-4 self-contained sub-questions.
#[async_trait]
pub trait QueryDecomposer: Send + Sync {
    async fn decompose(&self, query: &str) -> Result<Vec<String>, RetrievalError>;
}
