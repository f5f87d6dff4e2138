pub mod openai;
pub mod parse;
pub mod provider;
pub mod types;

pub use openai::OpenAiCompatClient;
pub use provider::{Embedder, QueryDecomposer, RerankCandidate, RerankOutcome, Reranker};
pub use types::{ChatMessage, ChatRequest};
