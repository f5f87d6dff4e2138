//! Chunk store with BM25 full-text search.
//!
//! The lexical index is the system of record for chunks: besides keyword
//! search it owns positional metadata used for adjacency expansion and the
//! per-page content hashes used to skip unchanged pages on re-crawl.

mod sqlite;

pub use sqlite::SqliteLexicalIndex;

use async_trait::async_trait;

use crate::core::errors::RetrievalError;
use crate::models::{Chunk, ContentType, PageHash, SearchResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub content_type: Option<ContentType>,
    pub project: Option<String>,
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_content_type(mut self, content_type: Option<ContentType>) -> Self {
        self.content_type = content_type;
        self
    }
}

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Insert or overwrite chunks by id, together with their postings.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<(), RetrievalError>;

    /// BM25 search. Scores are non-negative, higher is better. Queries that
    /// are empty after sanitation return no results.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError>;

    /// Inclusive range on `(page_id, chunk_index)`, ordered by index.
    async fn get_adjacent_chunks(
        &self,
        page_id: &str,
        start_index: i64,
        end_index: i64,
    ) -> Result<Vec<Chunk>, RetrievalError>;

    async fn delete_by_url(&self, url: &str) -> Result<u64, RetrievalError>;

    /// Removes the project's chunks and its page hashes.
    async fn delete_by_project(&self, project: &str) -> Result<u64, RetrievalError>;

    /// URLs with chunks or a recorded page hash in the project.
    async fn get_urls_for_project(&self, project: &str) -> Result<Vec<String>, RetrievalError>;

    async fn mark_orphaned(&self, urls: &[String], orphaned: bool) -> Result<u64, RetrievalError>;

    async fn get_page_hash(&self, url: &str) -> Result<Option<PageHash>, RetrievalError>;

    async fn set_page_hash(&self, page_hash: &PageHash) -> Result<(), RetrievalError>;

    async fn delete_page_hash(&self, url: &str) -> Result<bool, RetrievalError>;
}

/// Turn free text into an FTS5 query that cannot contain operators.
///
/// Each whitespace token becomes a quoted phrase (embedded quotes doubled)
/// and tokens are OR-ed together. Tokens without any alphanumeric character
/// are dropped. Returns `None` when nothing searchable remains.
pub fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
