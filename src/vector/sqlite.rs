//! SQLite-backed embedding index.
//!
//! In-process vector store using SQLite for payloads and
//! brute-force cosine similarity for search.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{check_upsert_input, EmbeddingIndex, VectorFilter};
use crate::core::errors::RetrievalError;
use crate::models::{Chunk, SearchResult};

pub struct SqliteEmbeddingIndex {
    pool: SqlitePool,
    dimension: Option<usize>,
}

impl SqliteEmbeddingIndex {
    pub async fn with_path(db_path: PathBuf, dimension: Option<usize>) -> Result<Self, RetrievalError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(RetrievalError::vector)?;

        let index = Self { pool, dimension };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), RetrievalError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                project TEXT NOT NULL,
                content_type TEXT NOT NULL,
                orphaned INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RetrievalError::vector)?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_embeddings_project ON embeddings(project)",
            "CREATE INDEX IF NOT EXISTS idx_embeddings_url ON embeddings(url)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(RetrievalError::vector)?;
        }

        Ok(())
    }

    /// Total number of stored embeddings, orphaned ones included.
    pub async fn count(&self) -> Result<usize, RetrievalError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await
            .map_err(RetrievalError::vector)?;
        Ok(count as usize)
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Cosine similarity of a stored little-endian f32 blob against the query.
    fn score_blob(query: &[f32], query_norm: f64, blob: &[u8]) -> Result<f64, RetrievalError> {
        if blob.len() != query.len() * 4 {
            return Err(RetrievalError::InvalidInput(format!(
                "stored embedding has {} dimensions, query has {}",
                blob.len() / 4,
                query.len()
            )));
        }

        let (dot, stored_sq) = Self::deserialize_embedding(blob)
            .into_iter()
            .zip(query)
            .fold((0.0f64, 0.0f64), |(dot, sq), (s, q)| {
                let s = f64::from(s);
                (dot + s * f64::from(*q), sq + s * s)
            });
        let denom = query_norm * stored_sq.sqrt();
        if denom <= f64::EPSILON {
            return Ok(0.0);
        }
        Ok((dot / denom).clamp(-1.0, 1.0))
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk, RetrievalError> {
        let payload: String = row.try_get("payload").map_err(RetrievalError::vector)?;
        let mut chunk: Chunk = serde_json::from_str(&payload).map_err(RetrievalError::internal)?;
        chunk.metadata.orphaned = row.try_get::<bool, _>("orphaned").map_err(RetrievalError::vector)?;
        Ok(chunk)
    }
}

#[async_trait]
impl EmbeddingIndex for SqliteEmbeddingIndex {
    async fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RetrievalError> {
        check_upsert_input(chunks, embeddings, self.dimension)?;
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(RetrievalError::vector)?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let payload = serde_json::to_string(chunk).map_err(RetrievalError::internal)?;
            sqlx::query(
                "INSERT OR REPLACE INTO embeddings (chunk_id, url, project, content_type, orphaned, payload, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&chunk.id)
            .bind(&chunk.url)
            .bind(&chunk.project)
            .bind(chunk.content_type.as_str())
            .bind(chunk.metadata.orphaned)
            .bind(&payload)
            .bind(Self::serialize_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(RetrievalError::vector)?;
        }

        tx.commit().await.map_err(RetrievalError::vector)?;
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if embedding.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "query embedding is empty".to_string(),
            ));
        }

        let rows = sqlx::query(
            "SELECT chunk_id, orphaned, payload, embedding
             FROM embeddings
             WHERE orphaned = 0
               AND (?1 IS NULL OR project = ?1)
               AND (?2 IS NULL OR content_type = ?2)
               AND (?3 IS NULL OR url = ?3)",
        )
        .bind(filter.project.as_deref())
        .bind(filter.content_type.map(|t| t.as_str()))
        .bind(filter.url.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(RetrievalError::vector)?;

        let query_norm = embedding
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt();

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(RetrievalError::vector)?;
            scored.push((Self::score_blob(embedding, query_norm, &blob)?, row));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit.max(1));

        scored
            .into_iter()
            .map(|(score, row)| {
                Ok(SearchResult {
                    chunk: Self::row_to_chunk(row)?,
                    score,
                })
            })
            .collect()
    }

    async fn delete_by_url(&self, url: &str) -> Result<(), RetrievalError> {
        sqlx::query("DELETE FROM embeddings WHERE url = ?1")
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(RetrievalError::vector)?;
        Ok(())
    }

    async fn delete_by_project(&self, project: &str) -> Result<(), RetrievalError> {
        sqlx::query("DELETE FROM embeddings WHERE project = ?1")
            .bind(project)
            .execute(&self.pool)
            .await
            .map_err(RetrievalError::vector)?;
        Ok(())
    }

    async fn get_urls_for_project(&self, project: &str) -> Result<Vec<String>, RetrievalError> {
        sqlx::query_scalar("SELECT DISTINCT url FROM embeddings WHERE project = ?1 ORDER BY url")
            .bind(project)
            .fetch_all(&self.pool)
            .await
            .map_err(RetrievalError::vector)
    }

    async fn mark_orphaned(&self, urls: &[String], orphaned: bool) -> Result<(), RetrievalError> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(RetrievalError::vector)?;
        for url in urls {
            sqlx::query("UPDATE embeddings SET orphaned = ?1 WHERE url = ?2")
                .bind(orphaned)
                .bind(url)
                .execute(&mut *tx)
                .await
                .map_err(RetrievalError::vector)?;
        }
        tx.commit().await.map_err(RetrievalError::vector)?;
        Ok(())
    }
}
