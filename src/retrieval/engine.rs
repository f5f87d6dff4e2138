//! The hybrid retrieval pipeline:
//! classify → fan-out → fuse → rerank → corrective loop → adjacency.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::adjacency;
use super::corrective::{self, CorrectedOutcome, CorrectiveSettings, PassOutcome};
use super::fanout::{FanOutExecutor, FanOutPlan};
use super::fusion::{merge_variants, reciprocal_rank_fusion};
use super::rerank::rerank_candidates;
use super::types::{RetrievalResult, RetrieveOptions};
use crate::cache::TtlCache;
use crate::core::config::RetrievalSettings;
use crate::core::errors::{IndexKind, RetrievalError, RetrievalWarning};
use crate::lexical::LexicalIndex;
use crate::llm::parse::MAX_SUB_QUESTIONS;
use crate::llm::{Embedder, QueryDecomposer, Reranker};
use crate::models::{ContentType, SearchResult};
use crate::query::{build_variants, should_decompose, ClassifiedQuery, QueryClassifier, QueryType, RetrievalPolicy};
use crate::vector::EmbeddingIndex;

pub type EmbeddingCache = TtlCache<String, Vec<f32>>;

/// Everything a pass needs that does not change between passes.
struct PassScope<'a> {
    project: &'a str,
    content_type: Option<ContentType>,
    policy: &'a RetrievalPolicy,
    query: &'a str,
    query_type: QueryType,
}

pub struct HybridRetriever {
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    decomposer: Option<Arc<dyn QueryDecomposer>>,
    embedding_cache: Option<Arc<EmbeddingCache>>,
    classifier: QueryClassifier,
    fanout: FanOutExecutor,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            fanout: FanOutExecutor::new(Arc::clone(&lexical), vector, settings.max_concurrency),
            classifier: QueryClassifier::new(settings.known_symbols.iter().cloned()),
            lexical,
            embedder,
            reranker: None,
            decomposer: None,
            embedding_cache: None,
            settings,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_decomposer(mut self, decomposer: Arc<dyn QueryDecomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    pub fn with_embedding_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.embedding_cache = Some(cache);
        self
    }

    pub fn embedding_cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.embedding_cache.as_ref()
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> Result<RetrievalResult, RetrievalError> {
        let project = options.project.trim();
        if project.is_empty() {
            return Err(RetrievalError::InvalidInput("project is required".to_string()));
        }

        if query.trim().is_empty() {
            tracing::debug!("Blank query, nothing to search");
            return Ok(RetrievalResult::no_match(query.trim(), QueryType::General));
        }

        let deadline = Instant::now() + Duration::from_millis(self.settings.deadline_ms);
        let classified = self.classifier.classify(query)?;
        let policy = effective_policy(&classified, &options);
        tracing::debug!(
            "Classified {:?} as {} (keywords: {:?})",
            classified.original,
            classified.query_type,
            classified.keywords
        );

        let mut warnings = Vec::new();
        let mut variants = vec![classified.original.clone()];
        variants.extend(build_variants(&classified, self.settings.max_variants));
        for sub_question in self.decompose(&classified, deadline, &mut warnings).await {
            if !variants.iter().any(|v| v.eq_ignore_ascii_case(&sub_question)) {
                variants.push(sub_question);
            }
        }

        let scope = PassScope {
            project,
            content_type: options.content_type,
            policy: &policy,
            query: &classified.original,
            query_type: classified.query_type,
        };

        let first = self.run_pass(&scope, &variants, deadline).await?;
        tracing::debug!(
            "First pass: {} candidates from {} variants (reranked: {})",
            first.results.len(),
            variants.len(),
            first.reranked
        );

        let CorrectedOutcome {
            pass,
            was_retried,
            alternate_queries,
        } = corrective::correct(
            first,
            &classified,
            &policy,
            &self.corrective_settings(),
            deadline,
            |alternate| {
                let scope = &scope;
                async move {
                    self.run_pass(scope, std::slice::from_ref(&alternate), deadline)
                        .await
                }
            },
        )
        .await;
        warnings.extend(pass.warnings);

        let mut chunks = pass.results;
        chunks.truncate(policy.limit);

        let expansion = adjacency::expand(
            self.lexical.as_ref(),
            chunks,
            &policy.adjacency,
            self.settings.neighbor_score_decay,
            self.settings.max_concurrency,
        )
        .await;
        tracing::debug!("Adjacency added {} neighbor chunks", expansion.added);
        warnings.extend(expansion.warnings);

        let mut chunks = expansion.results;
        let mut reranked = pass.reranked;
        if policy.rerank_after_adjacency && expansion.added > 0 {
            if let Some(reranker) = &self.reranker {
                let total = chunks.len();
                if let Some(rescored) = self
                    .rerank_within_deadline(reranker.as_ref(), &scope, &chunks, total, deadline, &mut warnings)
                    .await
                {
                    chunks = rescored;
                    reranked = true;
                }
            }
        }

        let no_match = chunks.is_empty();
        if no_match {
            warnings.push(RetrievalWarning::NoMatchingContent);
        }

        Ok(RetrievalResult {
            query: classified.original.clone(),
            query_type: classified.query_type,
            chunks,
            was_retried,
            reranked,
            alternate_queries,
            partial: pass.partial,
            no_match,
            warnings,
            variants_executed: pass.variants_executed,
            sources_failed: pass.sources_failed,
        })
    }

    fn corrective_settings(&self) -> CorrectiveSettings {
        CorrectiveSettings {
            confidence_threshold: self.settings.confidence_threshold,
            fused_confidence_threshold: self.settings.fused_confidence_threshold,
            min_acceptable: self.settings.min_acceptable,
            max_retries: self.settings.max_retries,
        }
    }

    async fn decompose(
        &self,
        classified: &ClassifiedQuery,
        deadline: Instant,
        warnings: &mut Vec<RetrievalWarning>,
    ) -> Vec<String> {
        let Some(decomposer) = &self.decomposer else {
            return Vec::new();
        };
        if !should_decompose(classified, self.settings.decompose_min_words) {
            return Vec::new();
        }

        match tokio::time::timeout_at(deadline, decomposer.decompose(&classified.original)).await {
            Ok(Ok(questions)) => questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .take(MAX_SUB_QUESTIONS)
                .collect(),
            Ok(Err(err)) => {
                tracing::warn!("Query decomposition failed: {}", err);
                warnings.push(RetrievalWarning::DecompositionFailed {
                    message: err.to_string(),
                });
                Vec::new()
            }
            Err(_) => {
                warnings.push(RetrievalWarning::deadline("decomposition"));
                Vec::new()
            }
        }
    }

    /// Embeddings for every variant, cached ones reused, the rest fetched in one batch.
    async fn embed_queries(&self, variants: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut slots: Vec<Option<Vec<f32>>> = variants
            .iter()
            .map(|v| self.embedding_cache.as_ref().and_then(|cache| cache.get(v)))
            .collect();

        let missing: Vec<String> = variants
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(v, _)| v.clone())
            .collect();

        if !missing.is_empty() {
            let fresh = self.embedder.embed(&missing).await?;
            if fresh.len() != missing.len() {
                return Err(RetrievalError::MalformedResponse(format!(
                    "embedder returned {} vectors for {} queries",
                    fresh.len(),
                    missing.len()
                )));
            }
            let mut fresh = fresh.into_iter();
            for (variant, slot) in variants.iter().zip(slots.iter_mut()) {
                if slot.is_some() {
                    continue;
                }
                if let Some(embedding) = fresh.next() {
                    if let Some(cache) = &self.embedding_cache {
                        cache.put(variant.clone(), embedding.clone());
                    }
                    *slot = Some(embedding);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    async fn rerank_within_deadline(
        &self,
        reranker: &dyn Reranker,
        scope: &PassScope<'_>,
        candidates: &[SearchResult],
        top_k: usize,
        deadline: Instant,
        warnings: &mut Vec<RetrievalWarning>,
    ) -> Option<Vec<SearchResult>> {
        if Instant::now() >= deadline {
            warnings.push(RetrievalWarning::deadline("rerank"));
            return None;
        }

        let rerank = rerank_candidates(
            reranker,
            scope.query,
            scope.query_type,
            candidates,
            top_k,
            scope.policy.preview_chars,
        );
        match tokio::time::timeout_at(deadline, rerank).await {
            Ok(Ok(rescored)) => Some(rescored),
            Ok(Err(err)) => {
                tracing::warn!("Rerank failed, keeping fused order: {}", err);
                warnings.push(RetrievalWarning::RerankFailure {
                    message: err.to_string(),
                });
                None
            }
            Err(_) => {
                warnings.push(RetrievalWarning::deadline("rerank"));
                None
            }
        }
    }

    /// Fan-out, fusion and rerank for one set of query texts.
    async fn run_pass(
        &self,
        scope: &PassScope<'_>,
        variants: &[String],
        deadline: Instant,
    ) -> Result<PassOutcome, RetrievalError> {
        let mut warnings = Vec::new();

        let embeddings = match tokio::time::timeout_at(deadline, self.embed_queries(variants)).await {
            Ok(Ok(embeddings)) => Some(embeddings),
            Ok(Err(err)) => {
                tracing::warn!("Query embedding failed, searching lexically only: {}", err);
                warnings.push(RetrievalWarning::IndexDegraded {
                    index: IndexKind::Vector,
                    message: err.to_string(),
                });
                None
            }
            Err(_) => {
                warnings.push(RetrievalWarning::deadline("embedding"));
                None
            }
        };

        let plan = FanOutPlan {
            variants,
            embeddings: embeddings.as_deref(),
            project: scope.project,
            content_type: scope.content_type,
            per_source_limit: self.settings.candidates_per_source.max(scope.policy.limit),
        };
        let outcome = self.fanout.run(&plan, deadline).await;

        let lexical_down = !outcome.succeeded(IndexKind::Lexical) && outcome.failed(IndexKind::Lexical);
        let vector_down = !outcome.succeeded(IndexKind::Vector)
            && (embeddings.is_none() || outcome.failed(IndexKind::Vector));
        if lexical_down && vector_down {
            let reason = |kind: IndexKind| {
                outcome
                    .failures
                    .iter()
                    .find(|(k, _)| *k == kind)
                    .map(|(_, m)| m.clone())
                    .unwrap_or_else(|| "query could not be embedded".to_string())
            };
            return Err(RetrievalError::index_unavailable(
                IndexKind::Lexical,
                format!(
                    "both indices failed (lexical: {}; vector: {})",
                    reason(IndexKind::Lexical),
                    reason(IndexKind::Vector)
                ),
            ));
        }

        for kind in [IndexKind::Lexical, IndexKind::Vector] {
            if let Some((_, message)) = outcome.failures.iter().find(|(k, _)| *k == kind) {
                warnings.push(RetrievalWarning::IndexDegraded {
                    index: kind,
                    message: message.clone(),
                });
            }
        }
        if outcome.partial {
            warnings.push(RetrievalWarning::deadline("fan_out"));
        }

        let fused = merge_variants(
            outcome
                .per_variant(variants.len())
                .iter()
                .map(|lists| reciprocal_rank_fusion(lists, self.settings.rrf_k))
                .collect(),
        );
        tracing::debug!(
            "Fused {} candidates from {} lists",
            fused.len(),
            outcome.lists.len()
        );

        let mut results = fused;
        let mut reranked = false;
        if let Some(reranker) = &self.reranker {
            if !results.is_empty() {
                if let Some(rescored) = self
                    .rerank_within_deadline(
                        reranker.as_ref(),
                        scope,
                        &results,
                        scope.policy.rerank_top_k,
                        deadline,
                        &mut warnings,
                    )
                    .await
                {
                    results = rescored;
                    reranked = true;
                }
            }
        }

        let skipped_vector_calls = if embeddings.is_none() { variants.len() } else { 0 };
        Ok(PassOutcome {
            results,
            reranked,
            partial: outcome.partial,
            warnings,
            variants_executed: variants.len(),
            sources_failed: outcome.failures.len() + skipped_vector_calls,
        })
    }
}

fn effective_policy(classified: &ClassifiedQuery, options: &RetrieveOptions) -> RetrievalPolicy {
    let mut policy = classified.policy.clone();
    if let Some(limit) = options.limit.filter(|l| *l > 0) {
        policy.limit = limit;
    }
    if let Some(content_type) = options.content_type {
        policy.content_type_bias = Some(content_type);
    }
    policy
}
