//! Corrective retrieval: judge a pass, and when it looks weak run one more
//! pass with an alternate query and merge what it finds.

use std::future::Future;

use tokio::time::Instant;

use super::fusion::merge_unique;
use crate::core::errors::{RetrievalError, RetrievalWarning};
use crate::models::SearchResult;
use crate::query::{alternate_candidates, ClassifiedQuery, RetrievalPolicy, RetryReason};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectiveSettings {
    /// Rerank-scale threshold (0-1).
    pub confidence_threshold: f64,
    /// Threshold applied to fused RRF scores when no rerank happened.
    pub fused_confidence_threshold: f64,
    pub min_acceptable: usize,
    pub max_retries: usize,
}

impl Default for CorrectiveSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            fused_confidence_threshold: 0.02,
            min_acceptable: 2,
            max_retries: 1,
        }
    }
}

/// Output of one classify-free retrieval pass (fan-out, fusion, rerank).
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    pub results: Vec<SearchResult>,
    pub reranked: bool,
    pub partial: bool,
    pub warnings: Vec<RetrievalWarning>,
    pub variants_executed: usize,
    pub sources_failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CorrectedOutcome {
    pub pass: PassOutcome,
    pub was_retried: bool,
    pub alternate_queries: Vec<String>,
}

/// `None` when the pass is good enough.
pub fn assess(
    pass: &PassOutcome,
    policy: &RetrievalPolicy,
    settings: &CorrectiveSettings,
) -> Option<RetryReason> {
    if pass.results.is_empty() {
        return Some(RetryReason::Empty);
    }

    let threshold = if pass.reranked {
        settings.confidence_threshold
    } else {
        settings.fused_confidence_threshold
    };
    let confident = pass
        .results
        .iter()
        .filter(|r| policy.is_primary(r.chunk.content_type) && r.score >= threshold)
        .count();

    if confident < settings.min_acceptable {
        Some(RetryReason::Insufficient)
    } else {
        None
    }
}

/// Retry at most `settings.max_retries` times. `run_pass` executes one
/// pass for an alternate query; its failure keeps the results gathered so far.
pub async fn correct<F, Fut>(
    initial: PassOutcome,
    classified: &ClassifiedQuery,
    policy: &RetrievalPolicy,
    settings: &CorrectiveSettings,
    deadline: Instant,
    mut run_pass: F,
) -> CorrectedOutcome
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<PassOutcome, RetrievalError>>,
{
    let mut outcome = CorrectedOutcome {
        pass: initial,
        ..Default::default()
    };

    for attempt in 1..=settings.max_retries {
        let Some(reason) = assess(&outcome.pass, policy, settings) else {
            break;
        };
        if Instant::now() >= deadline {
            outcome.pass.warnings.push(RetrievalWarning::deadline("corrective"));
            break;
        }
        let Some(alternate) = alternate_candidates(classified, reason, attempt)
            .into_iter()
            .find(|candidate| !outcome.alternate_queries.contains(candidate))
        else {
            tracing::debug!("No unused alternate query for {:?} retry", reason);
            break;
        };

        tracing::debug!("Corrective retry {} ({:?}): {}", attempt, reason, alternate);
        outcome.was_retried = true;
        outcome.alternate_queries.push(alternate.clone());

        match run_pass(alternate).await {
            Ok(retry) => {
                let added = merge_unique(&mut outcome.pass.results, retry.results);
                tracing::debug!("Corrective retry {} added {} chunks", attempt, added);
                // Reranked only if every kept chunk carries a rerank score.
                outcome.pass.reranked = outcome.pass.reranked && (added == 0 || retry.reranked);
                outcome.pass.partial |= retry.partial;
                outcome.pass.variants_executed += retry.variants_executed;
                outcome.pass.sources_failed += retry.sources_failed;
                outcome.pass.warnings.extend(retry.warnings);
            }
            Err(err) => {
                let failure = RetrievalError::CorrectiveRetryFailure(err.to_string());
                tracing::warn!("{}", failure);
                outcome
                    .pass
                    .warnings
                    .push(RetrievalWarning::CorrectiveRetryFailure {
                        message: failure.to_string(),
                    });
                break;
            }
        }
    }

    outcome
}
