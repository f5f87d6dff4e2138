//! Concurrent (variant × index) searches under one deadline.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::core::errors::{IndexKind, RetrievalError};
use crate::lexical::{LexicalIndex, SearchOptions};
use crate::models::{ContentType, SearchResult};
use crate::vector::{EmbeddingIndex, VectorFilter};

/// What to search for in one pass.
pub struct FanOutPlan<'a> {
    pub variants: &'a [String],
    /// One embedding per variant; `None` skips the vector index entirely.
    pub embeddings: Option<&'a [Vec<f32>]>,
    pub project: &'a str,
    pub content_type: Option<ContentType>,
    pub per_source_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SourceResults {
    pub variant: usize,
    pub source: IndexKind,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Default)]
pub struct FanOutOutcome {
    /// Successful lists sorted by `(variant, source)`.
    pub lists: Vec<SourceResults>,
    pub failures: Vec<(IndexKind, String)>,
    /// The deadline fired before every call returned.
    pub partial: bool,
    pub calls_planned: usize,
}

impl FanOutOutcome {
    pub fn succeeded(&self, source: IndexKind) -> bool {
        self.lists.iter().any(|l| l.source == source)
    }

    pub fn failed(&self, source: IndexKind) -> bool {
        self.failures.iter().any(|(s, _)| *s == source)
    }

    /// Lists grouped per variant, lexical before vector within a variant.
    pub fn per_variant(&self, variant_count: usize) -> Vec<Vec<Vec<SearchResult>>> {
        let mut grouped: Vec<Vec<Vec<SearchResult>>> = vec![Vec::new(); variant_count];
        for list in &self.lists {
            if let Some(group) = grouped.get_mut(list.variant) {
                group.push(list.results.clone());
            }
        }
        grouped
    }
}

type SearchCall<'a> = BoxFuture<'a, (usize, IndexKind, Result<Vec<SearchResult>, RetrievalError>)>;

#[derive(Clone)]
pub struct FanOutExecutor {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn EmbeddingIndex>,
    max_concurrency: usize,
}

impl FanOutExecutor {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn EmbeddingIndex>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            lexical,
            vector,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run(&self, plan: &FanOutPlan<'_>, deadline: Instant) -> FanOutOutcome {
        let mut calls: Vec<SearchCall<'_>> = Vec::new();
        let options = SearchOptions::new(plan.per_source_limit)
            .with_project(plan.project)
            .with_content_type(plan.content_type);
        let filter = VectorFilter::project(plan.project).with_content_type(plan.content_type);

        for (variant, text) in plan.variants.iter().enumerate() {
            let lexical = Arc::clone(&self.lexical);
            let options = options.clone();
            calls.push(
                async move {
                    let results = lexical.search(text, &options).await;
                    (variant, IndexKind::Lexical, results)
                }
                .boxed(),
            );

            if let Some(embedding) = plan.embeddings.and_then(|e| e.get(variant)) {
                let vector = Arc::clone(&self.vector);
                let filter = filter.clone();
                let limit = plan.per_source_limit;
                calls.push(
                    async move {
                        let results = vector.search(embedding, limit, &filter).await;
                        (variant, IndexKind::Vector, results)
                    }
                    .boxed(),
                );
            }
        }

        let mut outcome = FanOutOutcome {
            calls_planned: calls.len(),
            ..Default::default()
        };
        let mut pending = stream::iter(calls).buffer_unordered(self.max_concurrency);

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((variant, source, Ok(results)))) => {
                    outcome.lists.push(SourceResults {
                        variant,
                        source,
                        results,
                    });
                }
                Ok(Some((variant, source, Err(err)))) => {
                    tracing::warn!("{} search failed for variant {}: {}", source, variant, err);
                    outcome.failures.push((source, err.to_string()));
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Fan-out deadline reached with {}/{} calls complete",
                        outcome.lists.len() + outcome.failures.len(),
                        outcome.calls_planned
                    );
                    outcome.partial = true;
                    break;
                }
            }
        }

        outcome.lists.sort_by_key(|l| (l.variant, l.source));
        outcome
    }
}
