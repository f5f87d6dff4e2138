//! Core data model shared by both indices and the retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::RetrievalError;
use crate::ingest::identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Prose,
    Code,
    ApiReference,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [
        ContentType::Prose,
        ContentType::Code,
        ContentType::ApiReference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Prose => "prose",
            ContentType::Code => "code",
            ContentType::ApiReference => "api-reference",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = RetrievalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "prose" => Ok(ContentType::Prose),
            "code" => Ok(ContentType::Code),
            "api-reference" | "api_reference" => Ok(ContentType::ApiReference),
            other => Err(RetrievalError::InvalidInput(format!(
                "unknown content type: {other}"
            ))),
        }
    }
}

/// Free-form chunk metadata. `orphaned` is the only field that changes
/// after a chunk has been written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Heading path from the page root down to this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headings: Vec<String>,
    /// Class, method or function name for code and API chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub orphaned: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A chunk as produced by the chunker, before it has an identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDraft {
    pub url: String,
    /// Defaults to `url` when the source page is not itself split.
    pub page_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub chunk_total: Option<i64>,
    pub char_start: Option<i64>,
    pub char_end: Option<i64>,
    pub title: String,
    pub section: Option<String>,
    pub content: String,
    pub content_type: Option<ContentType>,
    pub project: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-addressable identifier, see [`identity::chunk_id`].
    pub id: String,
    pub url: String,
    pub page_id: String,
    pub chunk_index: Option<i64>,
    pub chunk_total: Option<i64>,
    pub char_start: Option<i64>,
    pub char_end: Option<i64>,
    pub title: String,
    pub section: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    pub project: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn from_draft(draft: ChunkDraft) -> Self {
        let section_or_index = draft
            .section
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .or_else(|| draft.chunk_index.map(|i| i.to_string()))
            .unwrap_or_default();
        let id = identity::chunk_id(&draft.url, &section_or_index, &draft.content);
        let page_id = draft
            .page_id
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| draft.url.clone());

        Self {
            id,
            url: draft.url,
            page_id,
            chunk_index: draft.chunk_index,
            chunk_total: draft.chunk_total,
            char_start: draft.char_start,
            char_end: draft.char_end,
            title: draft.title,
            section: draft.section,
            content: draft.content,
            content_type: draft.content_type.unwrap_or(ContentType::Prose),
            project: draft.project,
            metadata: draft.metadata,
        }
    }

    /// Position used for adjacency lookups, if this chunk has one.
    pub fn position(&self) -> Option<(&str, i64)> {
        match (self.page_id.as_str(), self.chunk_index) {
            ("", _) | (_, None) => None,
            (page_id, Some(index)) => Some((page_id, index)),
        }
    }
}

/// One record per crawled URL, used to skip unchanged pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHash {
    pub url: String,
    pub project: String,
    pub content_hash: String,
    pub chunk_count: i64,
    pub last_indexed: DateTime<Utc>,
}

/// Query-scoped result. `score` is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f64,
}
