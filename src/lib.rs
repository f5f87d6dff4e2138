//! Hybrid documentation retrieval.
//!
//! Chunks crawled documentation into a BM25 lexical index and an embedding
//! index, then answers queries by classifying them, fanning out query
//! variants to both indices, fusing with reciprocal rank fusion, reranking,
//! retrying with corrected queries when results look weak, and finally
//! pulling in neighboring chunks for context.

pub mod cache;
pub mod core;
pub mod ingest;
pub mod lexical;
pub mod llm;
pub mod logging;
pub mod models;
pub mod query;
pub mod retrieval;
pub mod state;
pub mod vector;

pub use crate::core::config::RetrieverConfig;
pub use crate::core::errors::{IndexKind, RetrievalError, RetrievalWarning};
pub use crate::ingest::{IngestOutcome, Ingestor, PageChunker, PageDocument};
pub use crate::retrieval::{HybridRetriever, RetrievalResult, RetrieveOptions};
pub use crate::state::RetrieverStack;
