//! Pull neighboring chunks of the same page around each hit.

use std::collections::HashSet;

use futures_util::stream::{self, StreamExt};

use crate::core::errors::RetrievalWarning;
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, SearchResult};
use crate::query::AdjacencyWindows;

pub const DEFAULT_NEIGHBOR_SCORE_DECAY: f64 = 0.9;

#[derive(Debug, Default)]
pub struct Expansion {
    /// Originals first, in their incoming order, then new neighbors.
    pub results: Vec<SearchResult>,
    pub added: usize,
    pub warnings: Vec<RetrievalWarning>,
}

/// Expand every positioned hit by its content type's window. Lookups run
/// concurrently but are consumed in hit order, so the output is stable.
pub async fn expand(
    lexical: &dyn LexicalIndex,
    results: Vec<SearchResult>,
    windows: &AdjacencyWindows,
    decay: f64,
    max_concurrency: usize,
) -> Expansion {
    let lookups: Vec<(usize, String, String, i64, i64)> = results
        .iter()
        .enumerate()
        .filter_map(|(origin, result)| {
            let window = windows.for_content_type(result.chunk.content_type);
            if window.is_empty() {
                return None;
            }
            let (page_id, index) = result.chunk.position()?;
            let (start, end) = window.range(index);
            Some((origin, result.chunk.id.clone(), page_id.to_string(), start, end))
        })
        .collect();

    if lookups.is_empty() {
        return Expansion {
            results,
            ..Default::default()
        };
    }

    let fetched: Vec<(usize, String, Result<Vec<Chunk>, String>)> = stream::iter(lookups)
        .map(|(origin, chunk_id, page_id, start, end)| async move {
            let neighbors = lexical
                .get_adjacent_chunks(&page_id, start, end)
                .await
                .map_err(|e| e.to_string());
            (origin, chunk_id, neighbors)
        })
        .buffered(max_concurrency.max(1))
        .collect()
        .await;

    let mut seen: HashSet<String> = results.iter().map(|r| r.chunk.id.clone()).collect();
    let mut neighbors: Vec<SearchResult> = Vec::new();
    let mut warnings = Vec::new();

    for (origin, chunk_id, fetched) in fetched {
        match fetched {
            Ok(chunks) => {
                let origin = &results[origin];
                for chunk in chunks {
                    if chunk.project != origin.chunk.project || !seen.insert(chunk.id.clone()) {
                        continue;
                    }
                    neighbors.push(SearchResult {
                        chunk,
                        score: origin.score * decay,
                    });
                }
            }
            Err(message) => {
                tracing::warn!("Adjacency lookup failed for chunk {}: {}", chunk_id, message);
                warnings.push(RetrievalWarning::AdjacencyLookupFailure { chunk_id, message });
            }
        }
    }

    let added = neighbors.len();
    let mut results = results;
    results.extend(neighbors);

    Expansion {
        results,
        added,
        warnings,
    }
}
