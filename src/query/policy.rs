use serde::Serialize;

use super::classifier::QueryType;
use crate::models::ContentType;

/// Neighbours to pull in around a hit, counted in chunk positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdjacencyWindow {
    pub before: i64,
    pub after: i64,
}

impl AdjacencyWindow {
    pub const NONE: AdjacencyWindow = AdjacencyWindow { before: 0, after: 0 };

    pub const fn new(before: i64, after: i64) -> Self {
        Self { before, after }
    }

    pub fn is_empty(&self) -> bool {
        self.before <= 0 && self.after <= 0
    }

    /// Inclusive index range around `index`, clamped at zero.
    pub fn range(&self, index: i64) -> (i64, i64) {
        ((index - self.before.max(0)).max(0), index + self.after.max(0))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdjacencyWindows {
    pub prose: AdjacencyWindow,
    pub code: AdjacencyWindow,
    pub api_reference: AdjacencyWindow,
}

impl AdjacencyWindows {
    pub fn for_content_type(&self, content_type: ContentType) -> AdjacencyWindow {
        match content_type {
            ContentType::Prose => self.prose,
            ContentType::Code => self.code,
            ContentType::ApiReference => self.api_reference,
        }
    }
}

/// Per query type retrieval knobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalPolicy {
    pub limit: usize,
    /// Primary content type; `None` means every type counts as primary.
    pub content_type_bias: Option<ContentType>,
    pub rerank_top_k: usize,
    pub preview_chars: usize,
    pub adjacency: AdjacencyWindows,
    pub rerank_after_adjacency: bool,
    pub decompose: bool,
}

const fn windows(prose: (i64, i64), code: (i64, i64), api: (i64, i64)) -> AdjacencyWindows {
    AdjacencyWindows {
        prose: AdjacencyWindow::new(prose.0, prose.1),
        code: AdjacencyWindow::new(code.0, code.1),
        api_reference: AdjacencyWindow::new(api.0, api.1),
    }
}

impl RetrievalPolicy {
    pub fn for_type(query_type: QueryType) -> Self {
        match query_type {
            QueryType::Error => Self {
                limit: 10,
                content_type_bias: Some(ContentType::Code),
                rerank_top_k: 10,
                preview_chars: 2000,
                adjacency: windows((1, 1), (1, 1), (0, 0)),
                rerank_after_adjacency: false,
                decompose: false,
            },
            QueryType::Howto => Self {
                limit: 12,
                content_type_bias: Some(ContentType::Prose),
                rerank_top_k: 12,
                preview_chars: 2500,
                adjacency: windows((1, 2), (1, 1), (0, 1)),
                rerank_after_adjacency: false,
                decompose: true,
            },
            QueryType::Concept => Self {
                limit: 15,
                content_type_bias: Some(ContentType::Prose),
                rerank_top_k: 12,
                preview_chars: 3000,
                adjacency: windows((1, 1), (0, 0), (0, 1)),
                rerank_after_adjacency: true,
                decompose: true,
            },
            QueryType::CodeLookup => Self {
                limit: 8,
                content_type_bias: Some(ContentType::Code),
                rerank_top_k: 8,
                preview_chars: 1500,
                adjacency: AdjacencyWindows::default(),
                rerank_after_adjacency: false,
                decompose: false,
            },
            QueryType::ApiReference => Self {
                limit: 10,
                content_type_bias: Some(ContentType::ApiReference),
                rerank_top_k: 10,
                preview_chars: 2000,
                adjacency: windows((0, 0), (0, 0), (1, 1)),
                rerank_after_adjacency: false,
                decompose: false,
            },
            QueryType::General => Self {
                limit: 15,
                content_type_bias: None,
                rerank_top_k: 15,
                preview_chars: 2000,
                adjacency: windows((1, 1), (0, 1), (0, 1)),
                rerank_after_adjacency: false,
                decompose: false,
            },
        }
    }

    pub fn is_primary(&self, content_type: ContentType) -> bool {
        self.content_type_bias.map_or(true, |bias| bias == content_type)
    }
}
