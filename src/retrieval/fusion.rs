//! Reciprocal Rank Fusion: score = Σ 1/(k + rank), ranks 1-indexed.
//!
//! Chunks missing from a list get nothing from it. Ties keep first-seen
//! order, so callers pass lists in a fixed order (variant, then lexical
//! before vector) and arrival order of concurrent searches never matters.

use std::collections::{HashMap, HashSet};

use crate::models::SearchResult;

pub const DEFAULT_RRF_K: f64 = 60.0;

struct Fused {
    result: SearchResult,
    contributions: Vec<f64>,
}

fn by_score_desc(results: &mut [SearchResult]) {
    // Stable: equal scores keep first-seen order.
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

/// Fuse ranked lists into one list ordered by fused score.
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchResult>], k: f64) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut fused: HashMap<String, Fused> = HashMap::new();

    for list in lists {
        let mut seen_in_list = HashSet::new();
        for (rank, hit) in list.iter().enumerate() {
            if !seen_in_list.insert(hit.chunk.id.as_str()) {
                continue;
            }
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            fused
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| {
                    order.push(hit.chunk.id.clone());
                    Fused {
                        result: hit.clone(),
                        contributions: Vec::new(),
                    }
                })
                .contributions
                .push(contribution);
        }
    }

    let mut out: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| fused.remove(&id))
        .map(|mut entry| {
            // Summing in a fixed order keeps the score identical however the
            // input lists were ordered.
            entry
                .contributions
                .sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
            entry.result.score = entry.contributions.iter().sum();
            entry.result
        })
        .collect();

    by_score_desc(&mut out);
    out
}

/// Merge per-variant fused lists, keeping the max score for chunks that
/// several variants produced.
pub fn merge_variants(per_variant: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, SearchResult> = HashMap::new();

    for list in per_variant {
        for hit in list {
            match best.get_mut(&hit.chunk.id) {
                Some(existing) => {
                    if hit.score > existing.score {
                        existing.score = hit.score;
                    }
                }
                None => {
                    order.push(hit.chunk.id.clone());
                    best.insert(hit.chunk.id.clone(), hit);
                }
            }
        }
    }

    let mut out: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| best.remove(&id))
        .collect();
    by_score_desc(&mut out);
    out
}

/// Append hits whose ids are not already present, then reorder by score.
/// Existing scores are left untouched.
pub fn merge_unique(base: &mut Vec<SearchResult>, extra: Vec<SearchResult>) -> usize {
    let mut seen: HashSet<String> = base.iter().map(|r| r.chunk.id.clone()).collect();
    let before = base.len();
    base.extend(extra.into_iter().filter(|r| seen.insert(r.chunk.id.clone())));
    by_score_desc(base);
    base.len() - before
}
