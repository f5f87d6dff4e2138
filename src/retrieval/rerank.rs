use crate::core::errors::RetrievalError;
use crate::llm::{RerankCandidate, Reranker};
use crate::models::SearchResult;
use crate::query::QueryType;

/// Cut `content` to at most `max_chars` characters without splitting one.
pub fn truncate_chars(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &content[..byte_index],
        None => content,
    }
}

pub fn candidate_preview(result: &SearchResult, preview_chars: usize) -> RerankCandidate {
    RerankCandidate {
        title: result.chunk.title.clone(),
        section: result.chunk.section.clone(),
        content_type: result.chunk.content_type,
        preview: truncate_chars(&result.chunk.content, preview_chars).to_string(),
    }
}

/// Rescore the first `top_k` candidates with the LLM and sort that block by
/// LLM score (ties by incoming score). Candidates past `top_k` keep their
/// order and score after the reranked block. The input is never modified,
/// so on error callers keep the fused order as is.
pub async fn rerank_candidates(
    reranker: &dyn Reranker,
    query: &str,
    query_type: QueryType,
    candidates: &[SearchResult],
    top_k: usize,
    preview_chars: usize,
) -> Result<Vec<SearchResult>, RetrievalError> {
    let split = top_k.min(candidates.len());
    if split == 0 {
        return Ok(candidates.to_vec());
    }

    let (head, tail) = candidates.split_at(split);
    let previews: Vec<RerankCandidate> = head
        .iter()
        .map(|r| candidate_preview(r, preview_chars))
        .collect();

    let outcome = reranker
        .score(query, query_type, &previews)
        .await
        .map_err(|e| match e {
            RetrievalError::RerankFailure(_) => e,
            other => RetrievalError::RerankFailure(other.to_string()),
        })?;

    if outcome.scores.len() != head.len() {
        return Err(RetrievalError::RerankFailure(format!(
            "reranker returned {} scores for {} candidates",
            outcome.scores.len(),
            head.len()
        )));
    }

    let mut scored: Vec<(f64, &SearchResult)> = outcome.scores.into_iter().zip(head).collect();
    scored.sort_by(|(a_llm, a), (b_llm, b)| {
        b_llm
            .partial_cmp(a_llm)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut out: Vec<SearchResult> = scored
        .into_iter()
        .map(|(llm_score, result)| SearchResult {
            chunk: result.chunk.clone(),
            score: llm_score,
        })
        .collect();
    out.extend(tail.iter().cloned());
    Ok(out)
}
