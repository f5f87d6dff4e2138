pub mod defaults;
pub mod service;
pub mod validation;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use service::ConfigService;
pub use validation::validate_config;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub storage: StorageSettings,
    pub qdrant: QdrantSettings,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    #[default]
    Qdrant,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Chunk store and lexical index.
    pub sqlite_path: PathBuf,
    pub vector_backend: VectorBackend,
    /// Only read when `vector_backend` is `sqlite`.
    pub vector_sqlite_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from(defaults::SQLITE_PATH),
            vector_backend: VectorBackend::default(),
            vector_sqlite_path: PathBuf::from(defaults::VECTOR_SQLITE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantSettings {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            url: defaults::QDRANT_URL.to_string(),
            collection: defaults::QDRANT_COLLECTION.to_string(),
            api_key: None,
            dimension: defaults::EMBEDDING_DIMENSION,
            batch_size: defaults::QDRANT_BATCH_SIZE,
            timeout_secs: defaults::QDRANT_TIMEOUT_SECS,
            max_retries: defaults::QDRANT_MAX_RETRIES,
        }
    }
}

/// OpenAI-compatible endpoint used for embeddings, reranking and
/// decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub rerank_model: String,
    /// Falls back to `rerank_model`.
    pub decompose_model: Option<String>,
    pub timeout_secs: u64,
    pub embed_batch_size: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: defaults::LLM_BASE_URL.to_string(),
            api_key: None,
            embedding_model: defaults::EMBEDDING_MODEL.to_string(),
            rerank_model: defaults::RERANK_MODEL.to_string(),
            decompose_model: None,
            timeout_secs: defaults::LLM_TIMEOUT_SECS,
            embed_batch_size: defaults::EMBED_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub rrf_k: f64,
    pub max_concurrency: usize,
    /// Wall-clock budget for one `retrieve` call.
    pub deadline_ms: u64,
    pub candidates_per_source: usize,
    pub confidence_threshold: f64,
    pub fused_confidence_threshold: f64,
    pub min_acceptable: usize,
    pub max_retries: usize,
    pub neighbor_score_decay: f64,
    pub max_variants: usize,
    pub decompose_min_words: usize,
    pub embedding_cache_ttl_secs: u64,
    pub embedding_cache_max_entries: u64,
    /// Identifiers that mark a query as an API reference lookup.
    pub known_symbols: Vec<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            rrf_k: defaults::RRF_K,
            max_concurrency: defaults::MAX_CONCURRENCY,
            deadline_ms: defaults::DEADLINE_MS,
            candidates_per_source: defaults::CANDIDATES_PER_SOURCE,
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            fused_confidence_threshold: defaults::FUSED_CONFIDENCE_THRESHOLD,
            min_acceptable: defaults::MIN_ACCEPTABLE,
            max_retries: defaults::MAX_RETRIES,
            neighbor_score_decay: defaults::NEIGHBOR_SCORE_DECAY,
            max_variants: defaults::MAX_VARIANTS,
            decompose_min_words: defaults::DECOMPOSE_MIN_WORDS,
            embedding_cache_ttl_secs: defaults::EMBEDDING_CACHE_TTL_SECS,
            embedding_cache_max_entries: defaults::EMBEDDING_CACHE_MAX_ENTRIES,
            known_symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub file_prefix: String,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(defaults::LOG_DIR),
            file_prefix: defaults::LOG_FILE_PREFIX.to_string(),
            default_filter: defaults::LOG_FILTER.to_string(),
        }
    }
}
