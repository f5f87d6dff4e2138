use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Which backing store a failure or degradation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Lexical,
    Vector,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Lexical => f.write_str("lexical"),
            IndexKind::Vector => f.write_str("vector"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("{index} index unavailable: {message}")]
    IndexUnavailable { index: IndexKind, message: String },
    #[error("rerank failed: {0}")]
    RerankFailure(String),
    #[error("corrective retry failed: {0}")]
    CorrectiveRetryFailure(String),
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("adjacency lookup failed: {0}")]
    AdjacencyLookupFailure(String),
    #[error("malformed collaborator response: {0}")]
    MalformedResponse(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RetrievalError {
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        RetrievalError::Internal(err.to_string())
    }

    pub fn index_unavailable<E: fmt::Display>(index: IndexKind, err: E) -> Self {
        RetrievalError::IndexUnavailable {
            index,
            message: err.to_string(),
        }
    }

    pub fn lexical<E: fmt::Display>(err: E) -> Self {
        Self::index_unavailable(IndexKind::Lexical, err)
    }

    pub fn vector<E: fmt::Display>(err: E) -> Self {
        Self::index_unavailable(IndexKind::Vector, err)
    }

    pub fn malformed<E: fmt::Display>(err: E) -> Self {
        RetrievalError::MalformedResponse(err.to_string())
    }

    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, RetrievalError::IndexUnavailable { .. })
    }
}

/// Recoverable conditions attached to a retrieval result instead of being
/// returned as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalWarning {
    IndexDegraded { index: IndexKind, message: String },
    DecompositionFailed { message: String },
    RerankFailure { message: String },
    CorrectiveRetryFailure { message: String },
    AdjacencyLookupFailure { chunk_id: String, message: String },
    DeadlineExceeded { stage: String },
    NoMatchingContent,
}

impl RetrievalWarning {
    pub fn deadline(stage: &str) -> Self {
        RetrievalWarning::DeadlineExceeded {
            stage: stage.to_string(),
        }
    }
}
