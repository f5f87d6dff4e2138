use serde::{Deserialize, Serialize};

use crate::core::errors::RetrievalWarning;
use crate::models::{ContentType, SearchResult};
use crate::query::QueryType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveOptions {
    pub project: String,
    /// Restricts both indices to one content type and makes it the primary type.
    #[serde(default)]
    pub content_type: Option<ContentType>,
    /// Overrides the query type's result limit.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RetrieveOptions {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub query_type: QueryType,
    pub chunks: Vec<SearchResult>,
    pub was_retried: bool,
    pub reranked: bool,
    pub alternate_queries: Vec<String>,
    /// The deadline cut the fan-out short; ranking is lower confidence.
    pub partial: bool,
    pub no_match: bool,
    pub warnings: Vec<RetrievalWarning>,
    /// Query texts searched across all passes.
    pub variants_executed: usize,
    /// Index calls that failed or were skipped because the query could not be embedded.
    pub sources_failed: usize,
}

impl RetrievalResult {
    /// Result for a query that had nothing to search for.
    pub fn no_match(query: &str, query_type: QueryType) -> Self {
        Self {
            query: query.to_string(),
            query_type,
            chunks: Vec::new(),
            was_retried: false,
            reranked: false,
            alternate_queries: Vec::new(),
            partial: false,
            no_match: true,
            warnings: vec![RetrievalWarning::NoMatchingContent],
            variants_executed: 0,
            sources_failed: 0,
        }
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|r| r.chunk.id.as_str()).collect()
    }
}
