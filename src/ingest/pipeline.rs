//! Page ingestion with content-hash skipping and per-URL write serialization.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::identity::content_hash;
use super::locks::UrlLocks;
use crate::core::errors::RetrievalError;
use crate::lexical::LexicalIndex;
use crate::llm::Embedder;
use crate::models::{Chunk, ChunkDraft, ContentType, PageHash};
use crate::vector::EmbeddingIndex;

/// A crawled page before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDocument {
    pub url: String,
    pub project: String,
    #[serde(default)]
    pub title: String,
    /// Raw page content; its hash decides whether the page is re-indexed.
    pub content: String,
    #[serde(default)]
    pub content_type: Option<ContentType>,
}

/// Splits a page into chunk drafts. Implemented by the crawler side.
#[async_trait]
pub trait PageChunker: Send + Sync {
    async fn chunk(&self, page: &PageDocument) -> Result<Vec<ChunkDraft>, RetrievalError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Unchanged { url: String },
    Indexed { url: String, chunks: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub orphaned: Vec<String>,
    pub restored: Vec<String>,
}

pub struct Ingestor {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn EmbeddingIndex>,
    embedder: Arc<dyn Embedder>,
    chunker: Arc<dyn PageChunker>,
    locks: UrlLocks,
}

impl Ingestor {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
        chunker: Arc<dyn PageChunker>,
    ) -> Self {
        Self {
            lexical,
            vector,
            embedder,
            chunker,
            locks: UrlLocks::new(),
        }
    }

    pub async fn ingest_page(&self, page: &PageDocument) -> Result<IngestOutcome, RetrievalError> {
        if page.url.trim().is_empty() || page.project.trim().is_empty() {
            return Err(RetrievalError::InvalidInput(
                "page url and project are required".to_string(),
            ));
        }

        let _guard = self.locks.lock(&page.url).await;

        let hash = content_hash(&page.content);
        if let Some(stored) = self.lexical.get_page_hash(&page.url).await? {
            if stored.content_hash == hash && stored.project == page.project {
                tracing::debug!("Skipping unchanged page {}", page.url);
                return Ok(IngestOutcome::Unchanged {
                    url: page.url.clone(),
                });
            }
        }

        let drafts = self.chunker.chunk(page).await?;
        let chunks = prepare_chunks(page, drafts);

        let texts: Vec<String> = chunks.iter().map(embedding_text).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if embeddings.len() != chunks.len() {
            return Err(RetrievalError::MalformedResponse(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        self.lexical.delete_by_url(&page.url).await?;
        self.vector.delete_by_url(&page.url).await?;
        self.lexical.upsert(&chunks).await?;
        self.vector.upsert(&chunks, &embeddings).await?;
        self.lexical
            .set_page_hash(&PageHash {
                url: page.url.clone(),
                project: page.project.clone(),
                content_hash: hash,
                chunk_count: chunks.len() as i64,
                last_indexed: Utc::now(),
            })
            .await?;

        tracing::info!("Indexed {} ({} chunks)", page.url, chunks.len());
        Ok(IngestOutcome::Indexed {
            url: page.url.clone(),
            chunks: chunks.len(),
        })
    }

    /// Orphan the project's URLs missing from `crawled_urls` and restore the
    /// ones that are present again.
    pub async fn reconcile_crawl(
        &self,
        project: &str,
        crawled_urls: &[String],
    ) -> Result<ReconcileReport, RetrievalError> {
        let mut known: BTreeSet<String> = self
            .lexical
            .get_urls_for_project(project)
            .await?
            .into_iter()
            .collect();
        known.extend(self.vector.get_urls_for_project(project).await?);

        let crawled: HashSet<&str> = crawled_urls.iter().map(String::as_str).collect();
        let (restored, orphaned): (Vec<String>, Vec<String>) =
            known.into_iter().partition(|url| crawled.contains(url.as_str()));

        let affected: Vec<String> = orphaned.iter().chain(&restored).cloned().collect();
        let _guards = self.locks.lock_many(&affected).await;

        if !orphaned.is_empty() {
            self.lexical.mark_orphaned(&orphaned, true).await?;
            self.vector.mark_orphaned(&orphaned, true).await?;
        }
        if !restored.is_empty() {
            self.lexical.mark_orphaned(&restored, false).await?;
            self.vector.mark_orphaned(&restored, false).await?;
        }

        tracing::info!(
            "Reconciled crawl for {}: {} orphaned, {} present",
            project,
            orphaned.len(),
            restored.len()
        );
        Ok(ReconcileReport { orphaned, restored })
    }

    /// Remove a URL's chunks from both indices and forget its hash.
    pub async fn delete_url(&self, url: &str) -> Result<u64, RetrievalError> {
        let _guard = self.locks.lock(url).await;
        let removed = self.lexical.delete_by_url(url).await?;
        self.vector.delete_by_url(url).await?;
        self.lexical.delete_page_hash(url).await?;
        tracing::info!("Deleted {} ({} chunks)", url, removed);
        Ok(removed)
    }

    /// Remove every chunk and page hash of a project. Holds the lock of each
    /// URL the project knows about while deleting.
    pub async fn delete_project(&self, project: &str) -> Result<u64, RetrievalError> {
        let mut urls: BTreeSet<String> = self
            .lexical
            .get_urls_for_project(project)
            .await?
            .into_iter()
            .collect();
        urls.extend(self.vector.get_urls_for_project(project).await?);
        let urls: Vec<String> = urls.into_iter().collect();
        let _guards = self.locks.lock_many(&urls).await;

        let removed = self.lexical.delete_by_project(project).await?;
        self.vector.delete_by_project(project).await?;
        tracing::info!("Deleted project {} ({} chunks)", project, removed);
        Ok(removed)
    }
}

/// Pin drafts to the page they came from and drop duplicate identities.
fn prepare_chunks(page: &PageDocument, drafts: Vec<ChunkDraft>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    drafts
        .into_iter()
        .filter(|draft| !draft.content.trim().is_empty())
        .map(|mut draft| {
            draft.url = page.url.clone();
            draft.project = page.project.clone();
            if draft.title.trim().is_empty() {
                draft.title = page.title.clone();
            }
            if draft.content_type.is_none() {
                draft.content_type = page.content_type;
            }
            Chunk::from_draft(draft)
        })
        .filter(|chunk| seen.insert(chunk.id.clone()))
        .collect()
}

fn embedding_text(chunk: &Chunk) -> String {
    match &chunk.section {
        Some(section) if !section.is_empty() => {
            format!("{}\n{}\n\n{}", chunk.title, section, chunk.content)
        }
        _ => format!("{}\n\n{}", chunk.title, chunk.content),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::lexical::{SearchOptions, SqliteLexicalIndex};
    use crate::vector::{SqliteEmbeddingIndex, VectorFilter};

    /// Splits on blank lines, one chunk per paragraph.
    #[derive(Default)]
    struct ParagraphChunker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageChunker for ParagraphChunker {
        async fn chunk(&self, page: &PageDocument) -> Result<Vec<ChunkDraft>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let paragraphs: Vec<&str> = page.content.split("\n\n").collect();
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

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.5]).collect())
        }
    }

    /// Counts upserts and forwards to a real embedded index.
    struct CountingVector {
        inner: SqliteEmbeddingIndex,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingIndex for CountingVector {
        async fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RetrievalError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert(chunks, embeddings).await
        }

        async fn search(
            &self,
            embedding: &[f32],
            limit: usize,
            filter: &VectorFilter,
        ) -> Result<Vec<crate::models::SearchResult>, RetrievalError> {
            self.inner.search(embedding, limit, filter).await
        }

        async fn delete_by_url(&self, url: &str) -> Result<(), RetrievalError> {
            self.inner.delete_by_url(url).await
        }

        async fn delete_by_project(&self, project: &str) -> Result<(), RetrievalError> {
            self.inner.delete_by_project(project).await
        }

        async fn get_urls_for_project(&self, project: &str) -> Result<Vec<String>, RetrievalError> {
            self.inner.get_urls_for_project(project).await
        }

        async fn mark_orphaned(&self, urls: &[String], orphaned: bool) -> Result<(), RetrievalError> {
            self.inner.mark_orphaned(urls, orphaned).await
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        lexical: Arc<SqliteLexicalIndex>,
        vector: Arc<CountingVector>,
        embedder: Arc<CountingEmbedder>,
        chunker: Arc<ParagraphChunker>,
        ingestor: Ingestor,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let lexical = Arc::new(SqliteLexicalIndex::with_path(dir.path().join("chunks.db")).await.unwrap());
        let vector = Arc::new(CountingVector {
            inner: SqliteEmbeddingIndex::with_path(dir.path().join("vectors.db"), Some(3))
                .await
                .unwrap(),
            upserts: AtomicUsize::new(0),
        });
        let embedder = Arc::new(CountingEmbedder::default());
        let chunker = Arc::new(ParagraphChunker::default());
        let ingestor = Ingestor::new(
            lexical.clone(),
            vector.clone(),
            embedder.clone(),
            chunker.clone(),
        );
        Harness {
            _dir: dir,
            lexical,
            vector,
            embedder,
            chunker,
            ingestor,
        }
    }

    fn page(url: &str, content: &str) -> PageDocument {
        PageDocument {
            url: url.to_string(),
            project: "acme".to_string(),
            title: "Guide".to_string(),
            content: content.to_string(),
            content_type: None,
        }
    }

    #[tokio::test]
    async fn unchanged_page_skips_all_work() {
        let h = harness().await;
        let doc = page("https://d/guide", "Install the CLI.\n\nRun deploy.");

        let first = h.ingestor.ingest_page(&doc).await.unwrap();
        assert_eq!(
            first,
            IngestOutcome::Indexed {
                url: doc.url.clone(),
                chunks: 2
            }
        );

        let second = h.ingestor.ingest_page(&doc).await.unwrap();
        assert_eq!(second, IngestOutcome::Unchanged { url: doc.url.clone() });
        assert_eq!(h.chunker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.vector.upserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_page_replaces_its_chunks() {
        let h = harness().await;
        h.ingestor
            .ingest_page(&page("https://d/guide", "one\n\ntwo\n\nthree"))
            .await
            .unwrap();
        h.ingestor
            .ingest_page(&page("https://d/guide", "one\n\nfour"))
            .await
            .unwrap();

        assert_eq!(h.lexical.count(Some("acme")).await.unwrap(), 2);
        assert_eq!(h.vector.inner.count().await.unwrap(), 2);
        let stored = h.lexical.get_page_hash("https://d/guide").await.unwrap().unwrap();
        assert_eq!(stored.chunk_count, 2);
        assert_eq!(stored.content_hash, content_hash("one\n\nfour"));
    }

    #[tokio::test]
    async fn reingesting_identical_content_does_not_duplicate() {
        let h = harness().await;
        let doc = page("https://d/guide", "alpha\n\nbeta");
        h.ingestor.ingest_page(&doc).await.unwrap();
        h.lexical.delete_page_hash(&doc.url).await.unwrap();
        h.ingestor.ingest_page(&doc).await.unwrap();

        assert_eq!(h.lexical.count(Some("acme")).await.unwrap(), 2);
        assert_eq!(h.vector.inner.count().await.unwrap(), 2);
        assert_eq!(h.vector.upserts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_ingest_of_one_url_is_serialized() {
        let h = harness().await;
        let doc = page("https://d/guide", "alpha\n\nbeta");

        let (a, b) = tokio::join!(h.ingestor.ingest_page(&doc), h.ingestor.ingest_page(&doc));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, IngestOutcome::Unchanged { .. }))
                .count(),
            1
        );
        assert_eq!(h.chunker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconcile_orphans_and_restores() {
        let h = harness().await;
        h.ingestor
            .ingest_page(&page("https://d/a", "deploy with docker"))
            .await
            .unwrap();
        h.ingestor
            .ingest_page(&page("https://d/b", "deploy with nix"))
            .await
            .unwrap();

        let report = h
            .ingestor
            .reconcile_crawl("acme", &["https://d/a".to_string()])
            .await
            .unwrap();
        assert_eq!(report.orphaned, vec!["https://d/b".to_string()]);

        let options = SearchOptions::new(10).with_project("acme");
        let hits = h.lexical.search("deploy", &options).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.url, "https://d/a");

        let report = h
            .ingestor
            .reconcile_crawl("acme", &["https://d/a".to_string(), "https://d/b".to_string()])
            .await
            .unwrap();
        assert!(report.orphaned.is_empty());
        assert_eq!(report.restored.len(), 2);
        assert_eq!(h.lexical.search("deploy", &options).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_url_and_project() {
        let h = harness().await;
        h.ingestor
            .ingest_page(&page("https://d/a", "alpha\n\nbeta"))
            .await
            .unwrap();
        h.ingestor
            .ingest_page(&page("https://d/b", "gamma"))
            .await
            .unwrap();

        assert_eq!(h.ingestor.delete_url("https://d/a").await.unwrap(), 2);
        assert!(h.lexical.get_page_hash("https://d/a").await.unwrap().is_none());
        assert_eq!(h.vector.inner.count().await.unwrap(), 1);

        assert_eq!(h.ingestor.delete_project("acme").await.unwrap(), 1);
        assert_eq!(h.lexical.count(None).await.unwrap(), 0);
        assert_eq!(h.vector.inner.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn project_delete_waits_for_writers_on_its_urls() {
        let h = harness().await;
        h.ingestor
            .ingest_page(&page("https://d/a", "one\n\ntwo"))
            .await
            .unwrap();

        let guard = h.ingestor.locks.lock("https://d/a").await;
        let delete = h.ingestor.delete_project("acme");
        tokio::pin!(delete);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), &mut delete)
                .await
                .is_err()
        );
        assert_eq!(h.lexical.count(None).await.unwrap(), 2);

        drop(guard);
        assert_eq!(delete.await.unwrap(), 2);
        assert!(h.lexical.get_page_hash("https://d/a").await.unwrap().is_none());
        assert_eq!(h.vector.inner.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_ingest_and_project_delete_leave_a_consistent_page() {
        let h = harness().await;
        let url = "https://d/a";
        h.ingestor.ingest_page(&page(url, "one\n\ntwo")).await.unwrap();

        let changed = page(url, "one\n\ntwo\n\nthree");
        let (ingested, deleted) = tokio::join!(
            h.ingestor.ingest_page(&changed),
            h.ingestor.delete_project("acme")
        );
        ingested.unwrap();
        deleted.unwrap();

        let chunks = h.lexical.count(None).await.unwrap();
        let hash = h.lexical.get_page_hash(url).await.unwrap();
        match hash {
            Some(hash) => {
                assert_eq!(hash.chunk_count, 3);
                assert_eq!(chunks, 3);
                assert_eq!(h.vector.inner.count().await.unwrap(), 3);
            }
            None => {
                assert_eq!(chunks, 0);
                assert_eq!(h.vector.inner.count().await.unwrap(), 0);
            }
        }

        // A page left behind must not be skipped as unchanged after a delete.
        h.ingestor.delete_project("acme").await.unwrap();
        assert!(matches!(
            h.ingestor.ingest_page(&changed).await.unwrap(),
            IngestOutcome::Indexed { chunks: 3, .. }
        ));
    }

    #[tokio::test]
    async fn zero_chunk_pages_are_listed_for_their_project() {
        let h = harness().await;
        h.ingestor.ingest_page(&page("https://d/empty", "  ")).await.unwrap();
        assert_eq!(
            h.lexical.get_urls_for_project("acme").await.unwrap(),
            vec!["https://d/empty".to_string()]
        );

        h.ingestor.delete_project("acme").await.unwrap();
        assert!(h.lexical.get_page_hash("https://d/empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_pages_without_identity() {
        let h = harness().await;
        let mut doc = page("", "text");
        assert!(h.ingestor.ingest_page(&doc).await.is_err());
        doc.url = "https://d/a".to_string();
        doc.project = " ".to_string();
        assert!(h.ingestor.ingest_page(&doc).await.is_err());
    }

    #[test]
    fn drafts_are_pinned_to_their_page() {
        let doc = page("https://d/a", "x");
        let chunks = prepare_chunks(
            &doc,
            vec![
                ChunkDraft {
                    url: "https://elsewhere".to_string(),
                    chunk_index: Some(0),
                    content: "same".to_string(),
                    ..Default::default()
                },
                ChunkDraft {
                    chunk_index: Some(0),
                    content: "same".to_string(),
                    ..Default::default()
                },
                ChunkDraft {
                    chunk_index: Some(1),
                    content: "   ".to_string(),
                    ..Default::default()
                },
            ],
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].url, "https://d/a");
        assert_eq!(chunks[0].project, "acme");
        assert_eq!(chunks[0].title, "Guide");
    }
}
