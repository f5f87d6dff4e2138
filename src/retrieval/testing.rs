//! Hand-written fakes for the retrieval collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::errors::RetrievalError;
use crate::lexical::{LexicalIndex, SearchOptions};
use crate::llm::{Embedder, QueryDecomposer, RerankCandidate, RerankOutcome, Reranker};
use crate::models::{Chunk, ChunkDraft, ContentType, PageHash, SearchResult};
use crate::query::QueryType;
use crate::vector::{EmbeddingIndex, VectorFilter};

pub fn hit_typed(id: &str, score: f64, content_type: ContentType) -> SearchResult {
    let mut chunk = Chunk::from_draft(ChunkDraft {
        url: format!("https://docs.test/{id}"),
        title: id.to_string(),
        content: format!("content of {id}"),
        content_type: Some(content_type),
        project: "p".to_string(),
        ..Default::default()
    });
    chunk.id = id.to_string();
    SearchResult { chunk, score }
}

pub fn hit(id: &str, score: f64) -> SearchResult {
    hit_typed(id, score, ContentType::Prose)
}

#[derive(Default)]
pub struct FakeLexical {
    results: Vec<SearchResult>,
    by_query: HashMap<String, Vec<SearchResult>>,
    chunks: Vec<Chunk>,
    fail_search: bool,
    fail_adjacency: bool,
    search_calls: AtomicUsize,
    adjacent_calls: AtomicUsize,
    last_range: Mutex<Option<(i64, i64)>>,
    queries: Mutex<Vec<String>>,
}

impl FakeLexical {
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_search: true,
            ..Default::default()
        }
    }

    pub fn failing_adjacency(mut self) -> Self {
        self.fail_adjacency = true;
        self
    }

    pub fn on_query(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.by_query.insert(query.to_string(), results);
        self
    }

    pub fn calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn adjacent_calls(&self) -> usize {
        self.adjacent_calls.load(Ordering::SeqCst)
    }

    pub fn last_adjacent_range(&self) -> Option<(i64, i64)> {
        *self.last_range.lock().unwrap()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LexicalIndex for FakeLexical {
    async fn upsert(&self, _chunks: &[Chunk]) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail_search {
            return Err(RetrievalError::lexical("database is locked"));
        }
        let results = self.by_query.get(query).unwrap_or(&self.results);
        Ok(results.iter().take(options.limit).cloned().collect())
    }

    async fn get_adjacent_chunks(
        &self,
        page_id: &str,
        start_index: i64,
        end_index: i64,
    ) -> Result<Vec<Chunk>, RetrievalError> {
        self.adjacent_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_range.lock().unwrap() = Some((start_index, end_index));
        if self.fail_adjacency {
            return Err(RetrievalError::AdjacencyLookupFailure("disk I/O error".to_string()));
        }
        let mut out: Vec<Chunk> = self
            .chunks
            .iter()
            .filter(|c| c.page_id == page_id)
            .filter(|c| c.chunk_index.is_some_and(|i| i >= start_index && i <= end_index))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.chunk_index);
        Ok(out)
    }

    async fn delete_by_url(&self, _url: &str) -> Result<u64, RetrievalError> {
        Ok(0)
    }

    async fn delete_by_project(&self, _project: &str) -> Result<u64, RetrievalError> {
        Ok(0)
    }

    async fn get_urls_for_project(&self, _project: &str) -> Result<Vec<String>, RetrievalError> {
        Ok(Vec::new())
    }

    async fn mark_orphaned(&self, _urls: &[String], _orphaned: bool) -> Result<u64, RetrievalError> {
        Ok(0)
    }

    async fn get_page_hash(&self, _url: &str) -> Result<Option<PageHash>, RetrievalError> {
        Ok(None)
    }

    async fn set_page_hash(&self, _page_hash: &PageHash) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn delete_page_hash(&self, _url: &str) -> Result<bool, RetrievalError> {
        Ok(false)
    }
}

#[derive(Default)]
pub struct FakeVector {
    results: Vec<SearchResult>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeVector {
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingIndex for FakeVector {
    async fn upsert(&self, _chunks: &[Chunk], _embeddings: &[Vec<f32>]) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn search(
        &self,
        _embedding: &[f32],
        limit: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(RetrievalError::vector("connection refused"));
        }
        Ok(self
            .results
            .iter()
            .filter(|r| filter.matches(&r.chunk))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_url(&self, _url: &str) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn delete_by_project(&self, _project: &str) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn get_urls_for_project(&self, _project: &str) -> Result<Vec<String>, RetrievalError> {
        Ok(Vec::new())
    }

    async fn mark_orphaned(&self, _urls: &[String], _orphaned: bool) -> Result<(), RetrievalError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    fail: bool,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl FakeEmbedder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        if self.fail {
            return Err(RetrievalError::vector("embedding server unreachable"));
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

#[derive(Default)]
pub struct FakeReranker {
    scores: Option<Vec<f64>>,
    fail: bool,
    calls: AtomicUsize,
    preview_lengths: Mutex<Vec<usize>>,
}

impl FakeReranker {
    /// Fixed scores; shorter candidate lists get a prefix, longer ones 0.0.
    pub fn scores(scores: Vec<f64>) -> Self {
        Self {
            scores: Some(scores),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_preview_lengths(&self) -> Vec<usize> {
        self.preview_lengths.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reranker for FakeReranker {
    async fn score(
        &self,
        _query: &str,
        _query_type: QueryType,
        candidates: &[RerankCandidate],
    ) -> Result<RerankOutcome, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.preview_lengths
            .lock()
            .unwrap()
            .extend(candidates.iter().map(|c| c.preview.chars().count()));
        if self.fail {
            return Err(RetrievalError::MalformedResponse("not json".to_string()));
        }
        let fixed = self.scores.clone().unwrap_or_default();
        let scores = (0..candidates.len())
            .map(|i| fixed.get(i).copied().unwrap_or(0.0))
            .collect();
        Ok(RerankOutcome { scores })
    }
}

#[derive(Default)]
pub struct FakeDecomposer {
    questions: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeDecomposer {
    pub fn returning(questions: &[&str]) -> Self {
        Self {
            questions: questions.iter().map(|q| q.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryDecomposer for FakeDecomposer {
    async fn decompose(&self, _query: &str) -> Result<Vec<String>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RetrievalError::MalformedResponse("expected a JSON array".to_string()));
        }
        Ok(self.questions.clone())
    }
}
