use thiserror::Error;

use crate::core::errors::RetrievalError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] RetrievalError),

    #[error("Failed to open lexical index: {0}")]
    Lexical(#[source] RetrievalError),

    #[error("Failed to open embedding index: {0}")]
    Vector(#[source] RetrievalError),

    #[error("Failed to initialize LLM client: {0}")]
    Llm(#[source] RetrievalError),

    #[error("Failed to prepare storage directory: {0}")]
    Storage(#[source] std::io::Error),
}
