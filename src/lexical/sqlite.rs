//! SQLite-backed chunk store with an FTS5 BM25 index.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{sanitize_fts_query, LexicalIndex, SearchOptions};
use crate::core::errors::RetrievalError;
use crate::models::{Chunk, ChunkMetadata, PageHash, SearchResult};

const CHUNK_COLUMNS: &str = "c.id, c.url, c.page_id, c.chunk_index, c.chunk_total, c.char_start, \
     c.char_end, c.title, c.section, c.content, c.content_type, c.project, c.metadata_json, c.orphaned";

pub struct SqliteLexicalIndex {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteLexicalIndex {
    pub async fn with_path(db_path: PathBuf) -> Result<Self, RetrievalError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(RetrievalError::lexical)?;

        let index = Self { pool, db_path };
        index.init_schema().await?;
        Ok(index)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), RetrievalError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                page_id TEXT NOT NULL,
                chunk_index INTEGER,
                chunk_total INTEGER,
                char_start INTEGER,
                char_end INTEGER,
                title TEXT NOT NULL DEFAULT '',
                section TEXT,
                content TEXT NOT NULL,
                content_type TEXT NOT NULL,
                project TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                orphaned INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RetrievalError::lexical)?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_chunks_url ON chunks(url)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_project ON chunks(project)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_page ON chunks(page_id, chunk_index)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(RetrievalError::lexical)?;
        }

        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                chunk_id UNINDEXED,
                title,
                section,
                content,
                tokenize = 'unicode61'
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RetrievalError::lexical)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS page_hashes (
                url TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                last_indexed TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RetrievalError::lexical)?;

        Ok(())
    }

    /// Number of non-orphaned chunks, optionally scoped to a project.
    pub async fn count(&self, project: Option<&str>) -> Result<usize, RetrievalError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE orphaned = 0 AND (?1 IS NULL OR project = ?1)",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await
        .map_err(RetrievalError::lexical)?;

        Ok(count as usize)
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, RetrievalError> {
        let id: String = row.try_get("id").map_err(RetrievalError::lexical)?;
        let metadata_str: String = row.try_get("metadata_json").map_err(RetrievalError::lexical)?;
        let mut metadata: ChunkMetadata = serde_json::from_str(&metadata_str).map_err(|e| {
            tracing::warn!("Chunk {} has unreadable metadata: {}", id, e);
            RetrievalError::lexical(format!("corrupt metadata for chunk {id}: {e}"))
        })?;
        metadata.orphaned = row.try_get::<bool, _>("orphaned").map_err(RetrievalError::lexical)?;

        let content_type: String = row.try_get("content_type").map_err(RetrievalError::lexical)?;

        Ok(Chunk {
            id,
            url: row.try_get("url").map_err(RetrievalError::lexical)?,
            page_id: row.try_get("page_id").map_err(RetrievalError::lexical)?,
            chunk_index: row.try_get("chunk_index").map_err(RetrievalError::lexical)?,
            chunk_total: row.try_get("chunk_total").map_err(RetrievalError::lexical)?,
            char_start: row.try_get("char_start").map_err(RetrievalError::lexical)?,
            char_end: row.try_get("char_end").map_err(RetrievalError::lexical)?,
            title: row.try_get("title").map_err(RetrievalError::lexical)?,
            section: row.try_get("section").map_err(RetrievalError::lexical)?,
            content: row.try_get("content").map_err(RetrievalError::lexical)?,
            content_type: content_type.parse()?,
            project: row.try_get("project").map_err(RetrievalError::lexical)?,
            metadata,
        })
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn upsert(&self, chunks: &[Chunk]) -> Result<(), RetrievalError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(RetrievalError::lexical)?;

        for chunk in chunks {
            let metadata_str =
                serde_json::to_string(&chunk.metadata).map_err(RetrievalError::internal)?;

            sqlx::query(
                "INSERT INTO chunks (id, url, page_id, chunk_index, chunk_total, char_start, char_end,
                                     title, section, content, content_type, project, metadata_json, orphaned)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                    url = excluded.url,
                    page_id = excluded.page_id,
                    chunk_index = excluded.chunk_index,
                    chunk_total = excluded.chunk_total,
                    char_start = excluded.char_start,
                    char_end = excluded.char_end,
                    title = excluded.title,
                    section = excluded.section,
                    content = excluded.content,
                    content_type = excluded.content_type,
                    project = excluded.project,
                    metadata_json = excluded.metadata_json,
                    orphaned = excluded.orphaned",
            )
            .bind(&chunk.id)
            .bind(&chunk.url)
            .bind(&chunk.page_id)
            .bind(chunk.chunk_index)
            .bind(chunk.chunk_total)
            .bind(chunk.char_start)
            .bind(chunk.char_end)
            .bind(&chunk.title)
            .bind(&chunk.section)
            .bind(&chunk.content)
            .bind(chunk.content_type.as_str())
            .bind(&chunk.project)
            .bind(&metadata_str)
            .bind(chunk.metadata.orphaned)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::lexical)?;

            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?1")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await
                .map_err(RetrievalError::lexical)?;

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, title, section, content) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&chunk.id)
            .bind(&chunk.title)
            .bind(chunk.section.as_deref().unwrap_or(""))
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::lexical)?;
        }

        tx.commit().await.map_err(RetrievalError::lexical)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let Some(match_expr) = sanitize_fts_query(query) else {
            tracing::debug!("lexical query empty after sanitation: {:?}", query);
            return Ok(Vec::new());
        };

        // bm25() is negative-is-better; column weights favour title and section.
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}, -bm25(chunks_fts, 0.0, 3.0, 2.0, 1.0) AS score
             FROM chunks_fts
             JOIN chunks c ON c.id = chunks_fts.chunk_id
             WHERE chunks_fts MATCH ?1
               AND c.orphaned = 0
               AND (?2 IS NULL OR c.content_type = ?2)
               AND (?3 IS NULL OR c.project = ?3)
             ORDER BY score DESC
             LIMIT ?4"
        );

        let rows = sqlx::query(&sql)
            .bind(&match_expr)
            .bind(options.content_type.map(|t| t.as_str()))
            .bind(options.project.as_deref())
            .bind(options.limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(RetrievalError::lexical)?;

        rows.iter()
            .map(|row| {
                let score: f64 = row.try_get("score").map_err(RetrievalError::lexical)?;
                Ok(SearchResult {
                    chunk: Self::row_to_chunk(row)?,
                    score: score.max(0.0),
                })
            })
            .collect()
    }

    async fn get_adjacent_chunks(
        &self,
        page_id: &str,
        start_index: i64,
        end_index: i64,
    ) -> Result<Vec<Chunk>, RetrievalError> {
        if end_index < start_index {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {CHUNK_COLUMNS}
             FROM chunks c
             WHERE c.page_id = ?1
               AND c.chunk_index IS NOT NULL
               AND c.chunk_index BETWEEN ?2 AND ?3
               AND c.orphaned = 0
             ORDER BY c.chunk_index ASC"
        );

        let rows = sqlx::query(&sql)
            .bind(page_id)
            .bind(start_index)
            .bind(end_index)
            .fetch_all(&self.pool)
            .await
            .map_err(RetrievalError::lexical)?;

        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn delete_by_url(&self, url: &str) -> Result<u64, RetrievalError> {
        let mut tx = self.pool.begin().await.map_err(RetrievalError::lexical)?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE url = ?1)")
            .bind(url)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::lexical)?;

        let result = sqlx::query("DELETE FROM chunks WHERE url = ?1")
            .bind(url)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::lexical)?;

        tx.commit().await.map_err(RetrievalError::lexical)?;
        Ok(result.rows_affected())
    }

    async fn delete_by_project(&self, project: &str) -> Result<u64, RetrievalError> {
        let mut tx = self.pool.begin().await.map_err(RetrievalError::lexical)?;

        sqlx::query(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE project = ?1)",
        )
        .bind(project)
        .execute(&mut *tx)
        .await
        .map_err(RetrievalError::lexical)?;

        let result = sqlx::query("DELETE FROM chunks WHERE project = ?1")
            .bind(project)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::lexical)?;

        sqlx::query("DELETE FROM page_hashes WHERE project = ?1")
            .bind(project)
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::lexical)?;

        tx.commit().await.map_err(RetrievalError::lexical)?;
        Ok(result.rows_affected())
    }

    async fn get_urls_for_project(&self, project: &str) -> Result<Vec<String>, RetrievalError> {
        sqlx::query_scalar(
            "SELECT url FROM chunks WHERE project = ?1
             UNION
             SELECT url FROM page_hashes WHERE project = ?1
             ORDER BY url",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await
        .map_err(RetrievalError::lexical)
    }

    async fn mark_orphaned(&self, urls: &[String], orphaned: bool) -> Result<u64, RetrievalError> {
        if urls.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(RetrievalError::lexical)?;
        let mut affected = 0;

        for url in urls {
            let result = sqlx::query("UPDATE chunks SET orphaned = ?1 WHERE url = ?2")
                .bind(orphaned)
                .bind(url)
                .execute(&mut *tx)
                .await
                .map_err(RetrievalError::lexical)?;
            affected += result.rows_affected();
        }

        tx.commit().await.map_err(RetrievalError::lexical)?;
        Ok(affected)
    }

    async fn get_page_hash(&self, url: &str) -> Result<Option<PageHash>, RetrievalError> {
        let row = sqlx::query(
            "SELECT url, project, content_hash, chunk_count, last_indexed
             FROM page_hashes
             WHERE url = ?1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(RetrievalError::lexical)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_indexed: String = row.try_get("last_indexed").map_err(RetrievalError::lexical)?;
        let last_indexed = DateTime::parse_from_rfc3339(&last_indexed)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(RetrievalError::internal)?;

        Ok(Some(PageHash {
            url: row.try_get("url").map_err(RetrievalError::lexical)?,
            project: row.try_get("project").map_err(RetrievalError::lexical)?,
            content_hash: row.try_get("content_hash").map_err(RetrievalError::lexical)?,
            chunk_count: row.try_get("chunk_count").map_err(RetrievalError::lexical)?,
            last_indexed,
        }))
    }

    async fn set_page_hash(&self, page_hash: &PageHash) -> Result<(), RetrievalError> {
        sqlx::query(
            "INSERT INTO page_hashes (url, project, content_hash, chunk_count, last_indexed)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(url) DO UPDATE SET
                project = excluded.project,
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                last_indexed = excluded.last_indexed",
        )
        .bind(&page_hash.url)
        .bind(&page_hash.project)
        .bind(&page_hash.content_hash)
        .bind(page_hash.chunk_count)
        .bind(page_hash.last_indexed.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RetrievalError::lexical)?;

        Ok(())
    }

    async fn delete_page_hash(&self, url: &str) -> Result<bool, RetrievalError> {
        let result = sqlx::query("DELETE FROM page_hashes WHERE url = ?1")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(RetrievalError::lexical)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkDraft, ContentType};

    async fn test_index() -> (tempfile::TempDir, SqliteLexicalIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteLexicalIndex::with_path(dir.path().join("lexical.db"))
            .await
            .unwrap();
        (dir, index)
    }

    fn make_chunk(url: &str, index: i64, content: &str, content_type: ContentType) -> Chunk {
        Chunk::from_draft(ChunkDraft {
            url: url.to_string(),
            chunk_index: Some(index),
            chunk_total: Some(5),
            title: "Deploying apps".to_string(),
            content: content.to_string(),
            content_type: Some(content_type),
            project: "acme".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn corrupt_metadata_is_reported() {
        let (_dir, index) = test_index().await;
        let chunk = make_chunk("https://d/a", 0, "deploy the worker", ContentType::Prose);
        index.upsert(&[chunk.clone()]).await.unwrap();

        sqlx::query("UPDATE chunks SET metadata_json = '{not json' WHERE id = ?1")
            .bind(&chunk.id)
            .execute(&index.pool)
            .await
            .unwrap();

        let err = index
            .search("deploy", &SearchOptions::new(10))
            .await
            .unwrap_err();
        match err {
            RetrievalError::IndexUnavailable { index: kind, message } => {
                assert_eq!(kind, crate::core::errors::IndexKind::Lexical);
                assert!(message.contains(&chunk.id), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upsert_and_search_scores_are_non_negative() {
        let (_dir, index) = test_index().await;
        index
            .upsert(&[
                make_chunk("https://d/a", 0, "deploy the worker with the cli", ContentType::Prose),
                make_chunk("https://d/a", 1, "configure logging levels", ContentType::Prose),
            ])
            .await
            .unwrap();

        let results = index
            .search("deploy worker", &SearchOptions::new(10))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].score >= 0.0);
        assert!(results[0].chunk.content.contains("deploy"));
    }

    #[tokio::test]
    async fn search_with_operators_does_not_error() {
        let (_dir, index) = test_index().await;
        index
            .upsert(&[make_chunk("https://d/a", 0, "retry NEAR the limit", ContentType::Prose)])
            .await
            .unwrap();

        let results = index
            .search("NEAR( \"limit* AND", &SearchOptions::new(10))
            .await
            .unwrap();
        assert!(!results.is_empty());

        let results = index.search("* ( )", &SearchOptions::new(10)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_filters_by_project_and_content_type() {
        let (_dir, index) = test_index().await;
        let mut other = make_chunk("https://d/b", 0, "deploy with helm", ContentType::Code);
        other.project = "other".to_string();
        index
            .upsert(&[
                make_chunk("https://d/a", 0, "deploy with docker", ContentType::Prose),
                make_chunk("https://d/a", 1, "deploy script", ContentType::Code),
                other,
            ])
            .await
            .unwrap();

        let options = SearchOptions::new(10)
            .with_project("acme")
            .with_content_type(Some(ContentType::Code));
        let results = index.search("deploy", &options).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "deploy script");
    }

    #[tokio::test]
    async fn reupserting_same_content_keeps_one_row() {
        let (_dir, index) = test_index().await;
        let chunk = make_chunk("https://d/a", 0, "idempotent content", ContentType::Prose);
        index.upsert(&[chunk.clone()]).await.unwrap();
        index.upsert(&[chunk]).await.unwrap();

        assert_eq!(index.count(Some("acme")).await.unwrap(), 1);
        let results = index.search("idempotent", &SearchOptions::new(10)).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn adjacent_chunks_stay_within_bounds() {
        let (_dir, index) = test_index().await;
        let chunks: Vec<Chunk> = (0..6)
            .map(|i| make_chunk("https://d/page", i, &format!("part {i}"), ContentType::Prose))
            .collect();
        let mut unindexed = make_chunk("https://d/page", 0, "no position", ContentType::Prose);
        unindexed.chunk_index = None;
        index.upsert(&chunks).await.unwrap();
        index.upsert(&[unindexed]).await.unwrap();

        let window = index.get_adjacent_chunks("https://d/page", 1, 3).await.unwrap();
        let indices: Vec<i64> = window.iter().filter_map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(window.len(), 3);

        let empty = index.get_adjacent_chunks("https://d/page", 3, 1).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn delete_by_url_removes_rows_and_postings() {
        let (_dir, index) = test_index().await;
        index
            .upsert(&[
                make_chunk("https://d/a", 0, "alpha topic", ContentType::Prose),
                make_chunk("https://d/b", 0, "alpha other", ContentType::Prose),
            ])
            .await
            .unwrap();

        let removed = index.delete_by_url("https://d/a").await.unwrap();
        assert_eq!(removed, 1);

        let results = index.search("alpha", &SearchOptions::new(10)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.url, "https://d/b");

        let fts_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
            .fetch_one(&index.pool)
            .await
            .unwrap();
        assert_eq!(fts_rows, 1);
    }

    #[tokio::test]
    async fn orphaned_chunks_are_hidden_until_restored() {
        let (_dir, index) = test_index().await;
        index
            .upsert(&[make_chunk("https://d/a", 0, "orphan candidate", ContentType::Prose)])
            .await
            .unwrap();

        let urls = vec!["https://d/a".to_string()];
        assert_eq!(index.mark_orphaned(&urls, true).await.unwrap(), 1);
        assert!(index.search("orphan", &SearchOptions::new(5)).await.unwrap().is_empty());
        assert_eq!(
            index.get_urls_for_project("acme").await.unwrap(),
            vec!["https://d/a".to_string()]
        );

        index.mark_orphaned(&urls, false).await.unwrap();
        let results = index.search("orphan", &SearchOptions::new(5)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].chunk.metadata.orphaned);
    }

    #[tokio::test]
    async fn page_hash_round_trip_and_project_delete() {
        let (_dir, index) = test_index().await;
        let hash = PageHash {
            url: "https://d/a".to_string(),
            project: "acme".to_string(),
            content_hash: "abc".to_string(),
            chunk_count: 2,
            last_indexed: Utc::now(),
        };
        index.set_page_hash(&hash).await.unwrap();
        index
            .set_page_hash(&PageHash {
                content_hash: "def".to_string(),
                ..hash.clone()
            })
            .await
            .unwrap();

        let stored = index.get_page_hash("https://d/a").await.unwrap().unwrap();
        assert_eq!(stored.content_hash, "def");

        index
            .upsert(&[make_chunk("https://d/a", 0, "alpha", ContentType::Prose)])
            .await
            .unwrap();
        assert_eq!(index.delete_by_project("acme").await.unwrap(), 1);
        assert!(index.get_page_hash("https://d/a").await.unwrap().is_none());
        assert!(!index.delete_page_hash("https://d/a").await.unwrap());
    }
}
