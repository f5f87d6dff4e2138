use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{ConfigService, RetrieverConfig, VectorBackend};
use crate::ingest::{Ingestor, PageChunker};
use crate::lexical::SqliteLexicalIndex;
use crate::llm::OpenAiCompatClient;
use crate::retrieval::{EmbeddingCache, HybridRetriever};
use crate::vector::{EmbeddingIndex, QdrantIndex, SqliteEmbeddingIndex};

pub mod error;

use error::InitializationError;

/// Every long-lived component, wired from one [`RetrieverConfig`].
///
/// Retrieval and ingestion share the same index handles, so a page written
/// through [`RetrieverStack::ingestor`] is visible to the next `retrieve`.
pub struct RetrieverStack {
    pub config: RetrieverConfig,
    pub lexical: Arc<SqliteLexicalIndex>,
    pub vector: Arc<dyn EmbeddingIndex>,
    pub llm: Arc<OpenAiCompatClient>,
    pub retriever: Arc<HybridRetriever>,
    pub ingestor: Arc<Ingestor>,
    embedding_cache: Option<Arc<EmbeddingCache>>,
}

impl RetrieverStack {
    /// Load configuration, start logging and build the stack.
    pub async fn initialize(
        config_path: Option<PathBuf>,
        chunker: Arc<dyn PageChunker>,
    ) -> Result<Self, InitializationError> {
        let service = ConfigService::new(config_path);
        let config = service
            .load_config()
            .map_err(InitializationError::Config)?;
        crate::logging::init(&config.logging);
        tracing::debug!("Effective configuration: {}", service.redacted(&config));

        Self::from_config(config, chunker).await
    }

    pub async fn from_config(
        config: RetrieverConfig,
        chunker: Arc<dyn PageChunker>,
    ) -> Result<Self, InitializationError> {
        ensure_parent_dir(&config.storage.sqlite_path)?;
        let lexical = Arc::new(
            SqliteLexicalIndex::with_path(config.storage.sqlite_path.clone())
                .await
                .map_err(InitializationError::Lexical)?,
        );

        let vector: Arc<dyn EmbeddingIndex> = match config.storage.vector_backend {
            VectorBackend::Qdrant => Arc::new(
                QdrantIndex::connect(&config.qdrant)
                    .await
                    .map_err(InitializationError::Vector)?,
            ),
            VectorBackend::Sqlite => {
                ensure_parent_dir(&config.storage.vector_sqlite_path)?;
                Arc::new(
                    SqliteEmbeddingIndex::with_path(
                        config.storage.vector_sqlite_path.clone(),
                        Some(config.qdrant.dimension),
                    )
                    .await
                    .map_err(InitializationError::Vector)?,
                )
            }
        };

        let llm = Arc::new(OpenAiCompatClient::new(&config.llm).map_err(InitializationError::Llm)?);

        let mut retriever = HybridRetriever::new(
            lexical.clone(),
            vector.clone(),
            llm.clone(),
            config.retrieval.clone(),
        )
        .with_reranker(llm.clone())
        .with_decomposer(llm.clone());

        let mut embedding_cache = None;
        if config.retrieval.embedding_cache_ttl_secs > 0 {
            let cache = Arc::new(EmbeddingCache::new(
                config.retrieval.embedding_cache_max_entries,
                Duration::from_secs(config.retrieval.embedding_cache_ttl_secs),
            ));
            retriever = retriever.with_embedding_cache(cache.clone());
            embedding_cache = Some(cache);
        }

        let ingestor = Ingestor::new(lexical.clone(), vector.clone(), llm.clone(), chunker);

        tracing::info!(
            "Retriever ready (lexical: {}, vector backend: {:?})",
            lexical.db_path().display(),
            config.storage.vector_backend
        );

        Ok(Self {
            config,
            lexical,
            vector,
            llm,
            retriever: Arc::new(retriever),
            ingestor: Arc::new(ingestor),
            embedding_cache,
        })
    }

    /// Release cached state.
    pub async fn shutdown(self) {
        if let Some(cache) = &self.embedding_cache {
            cache.shutdown();
        }
        tracing::info!("Retriever stack shut down");
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), InitializationError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(InitializationError::Storage)
        }
        _ => Ok(()),
    }
}
