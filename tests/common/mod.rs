#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use doc_retriever::core::errors::RetrievalError;
use doc_retriever::ingest::{Ingestor, PageChunker, PageDocument};
use doc_retriever::lexical::SqliteLexicalIndex;
use doc_retriever::llm::Embedder;
use doc_retriever::models::ChunkDraft;
use doc_retriever::vector::SqliteEmbeddingIndex;

pub const DIMENSION: usize = 16;

/// Bag-of-words vectors hashed into a few buckets.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| hash_vector(text)).collect())
    }
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = token
            .to_lowercase()
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
        vector[bucket % DIMENSION] += 1.0;
    }
    vector
}

pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Err(RetrievalError::vector("embedding endpoint unreachable"))
    }
}

/// One chunk per blank-line separated paragraph.
pub struct ParagraphChunker;

#[async_trait]
impl PageChunker for ParagraphChunker {
    async fn chunk(&self, page: &PageDocument) -> Result<Vec<ChunkDraft>, RetrievalError> {
        let paragraphs: Vec<&str> = page
            .content
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let total = paragraphs.len() as i64;
        Ok(paragraphs
            .into_iter()
            .enumerate()
            .map(|(i, text)| ChunkDraft {
                chunk_index: Some(i as i64),
                chunk_total: Some(total),
                content: text.to_string(),
                ..Default::default()
            })
            .collect())
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub lexical: Arc<SqliteLexicalIndex>,
    pub vector: Arc<SqliteEmbeddingIndex>,
    pub embedder: Arc<HashEmbedder>,
    pub ingestor: Ingestor,
}

pub async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let lexical = Arc::new(
        SqliteLexicalIndex::with_path(dir.path().join("chunks.db"))
            .await
            .unwrap(),
    );
    let vector = Arc::new(
        SqliteEmbeddingIndex::with_path(dir.path().join("vectors.db"), Some(DIMENSION))
            .await
            .unwrap(),
    );
    let embedder = Arc::new(HashEmbedder::default());
    let ingestor = Ingestor::new(
        lexical.clone(),
        vector.clone(),
        embedder.clone(),
        Arc::new(ParagraphChunker),
    );
    Fixture {
        dir,
        lexical,
        vector,
        embedder,
        ingestor,
    }
}

pub fn page(project: &str, url: &str, title: &str, content: &str) -> PageDocument {
    PageDocument {
        url: url.to_string(),
        project: project.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        content_type: None,
    }
}
