//! Default values for every tunable in [`RetrieverConfig`](super::RetrieverConfig).

pub const CONFIG_ENV: &str = "DOC_RETRIEVER_CONFIG";
pub const QDRANT_API_KEY_ENV: &str = "DOC_RETRIEVER_QDRANT_API_KEY";
pub const LLM_API_KEY_ENV: &str = "DOC_RETRIEVER_LLM_API_KEY";

pub const SQLITE_PATH: &str = "data/chunks.db";
pub const VECTOR_SQLITE_PATH: &str = "data/vectors.db";

pub const QDRANT_URL: &str = "http://localhost:6333";
pub const QDRANT_COLLECTION: &str = "doc_chunks";
pub const EMBEDDING_DIMENSION: usize = 1536;
pub const QDRANT_BATCH_SIZE: usize = 100;
pub const QDRANT_TIMEOUT_SECS: u64 = 30;
pub const QDRANT_MAX_RETRIES: usize = 3;

pub const LLM_BASE_URL: &str = "https://api.openai.com";
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const RERANK_MODEL: &str = "gpt-4o-mini";
pub const LLM_TIMEOUT_SECS: u64 = 30;
pub const EMBED_BATCH_SIZE: usize = 64;

pub const RRF_K: f64 = 60.0;
pub const MAX_CONCURRENCY: usize = 8;
pub const DEADLINE_MS: u64 = 8_000;
pub const CANDIDATES_PER_SOURCE: usize = 30;
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const FUSED_CONFIDENCE_THRESHOLD: f64 = 0.02;
pub const MIN_ACCEPTABLE: usize = 2;
pub const MAX_RETRIES: usize = 1;
pub const NEIGHBOR_SCORE_DECAY: f64 = 0.9;
pub const MAX_VARIANTS: usize = 3;
pub const DECOMPOSE_MIN_WORDS: usize = 6;
pub const EMBEDDING_CACHE_TTL_SECS: u64 = 600;
pub const EMBEDDING_CACHE_MAX_ENTRIES: u64 = 10_000;

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE_PREFIX: &str = "doc-retriever.log";
pub const LOG_FILTER: &str = "info";
