pub mod adjacency;
pub mod corrective;
pub mod engine;
pub mod fanout;
pub mod fusion;
pub mod rerank;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EmbeddingCache, HybridRetriever};
pub use fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use types::{RetrievalResult, RetrieveOptions};
