//! Query variants for fan-out and alternate queries for the corrective loop.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde::Serialize;

use super::classifier::{ClassifiedQuery, QueryType};

/// Hard cap on generated variants, independent of configuration.
pub const MAX_VARIANTS: usize = 3;

/// Why the corrective loop is asking for another pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// Nothing came back; narrow towards type-specific vocabulary.
    Empty,
    /// Too few confident hits of the primary type; broaden.
    Insufficient,
}

static SYNONYMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert("auth", &["authentication", "login", "token"]);
    m.insert("authentication", &["auth", "login", "credentials"]);
    m.insert("config", &["configuration", "settings", "options"]);
    m.insert("configure", &["setup", "settings", "options"]);
    m.insert("deploy", &["deployment", "release", "hosting"]);
    m.insert("install", &["installation", "setup", "download"]);
    m.insert("error", &["exception", "failure", "issue"]);
    m.insert("fails", &["error", "broken", "issue"]);
    m.insert("db", &["database", "storage"]);
    m.insert("database", &["storage", "persistence"]);
    m.insert("api", &["endpoint", "interface", "reference"]);
    m.insert("endpoint", &["api", "route", "url"]);
    m.insert("env", &["environment", "variables"]);
    m.insert("perf", &["performance", "latency", "throughput"]);
    m.insert("cache", &["caching", "ttl", "invalidation"]);
    m.insert("log", &["logging", "tracing", "output"]);
    m.insert("test", &["testing", "fixture", "assertion"]);
    m.insert("market", &["exchange", "orderbook", "trading"]);
    m.insert("oracle", &["resolution", "resolver", "data feed"]);
    m
});

fn join_terms<S: AsRef<str>>(base: &[S], extra: &[&str]) -> String {
    base.iter()
        .map(AsRef::as_ref)
        .chain(extra.iter().copied())
        .collect::<Vec<&str>>()
        .join(" ")
}

fn backtick_fragments(query: &str) -> Vec<String> {
    query
        .split('`')
        .skip(1)
        .step_by(2)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn type_terms(query_type: QueryType) -> &'static [&'static str] {
    match query_type {
        QueryType::Error => &["error", "message", "troubleshooting"],
        QueryType::Howto => &["tutorial", "steps"],
        QueryType::Concept => &["overview", "definition"],
        QueryType::CodeLookup => &["function", "definition"],
        QueryType::ApiReference => &["method", "signature", "parameters"],
        QueryType::General => &["documentation"],
    }
}

/// Type-specific keyword augmentations of the original query, at most
/// `max_variants` (never more than [`MAX_VARIANTS`]), none equal to the
/// original or to each other.
pub fn build_variants(classified: &ClassifiedQuery, max_variants: usize) -> Vec<String> {
    let keywords: &[String] = &classified.keywords;
    if keywords.is_empty() {
        return Vec::new();
    }

    let candidates: Vec<String> = match classified.query_type {
        QueryType::Error => vec![
            join_terms(keywords, &["troubleshooting"]),
            join_terms(keywords, &["fix", "solution"]),
        ],
        QueryType::Howto => vec![
            join_terms(keywords, &["guide"]),
            join_terms(keywords, &["example", "tutorial"]),
        ],
        QueryType::Concept => vec![
            join_terms(keywords, &["overview"]),
            join_terms(keywords, &["explanation", "architecture"]),
        ],
        QueryType::CodeLookup => {
            let mut out = backtick_fragments(&classified.original);
            out.push(join_terms(keywords, &["example"]));
            out
        }
        QueryType::ApiReference => {
            let mut out = vec![join_terms(keywords, &["api", "reference"])];
            if !classified.symbols.is_empty() {
                out.push(join_terms(&classified.symbols[..], &["parameters", "returns"]));
            }
            out
        }
        QueryType::General => vec![join_terms(keywords, &[])],
    };

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(classified.original.to_lowercase());

    candidates
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .filter(|v| seen.insert(v.to_lowercase()))
        .take(max_variants.min(MAX_VARIANTS))
        .collect()
}

const BROADENING_TERMS: &[&str] = &["guide", "overview", "documentation"];

/// Alternate query for retry `attempt` (1-based). Broadening drops the
/// `attempt` most specific keywords and adds synonyms; narrowing pins the
/// keywords to type vocabulary. `None` only when the query has no terms.
pub fn alternate_query(
    classified: &ClassifiedQuery,
    reason: RetryReason,
    attempt: usize,
) -> Option<String> {
    alternate_candidates(classified, reason, attempt)
        .into_iter()
        .next()
}

/// Every distinct alternate for a retry, preferred first. The first entry
/// is what [`alternate_query`] returns; later entries fall back to type
/// vocabulary and then to generic broadening terms, so a query that
/// cannot be rewritten any other way still gets a different text.
pub fn alternate_candidates(
    classified: &ClassifiedQuery,
    reason: RetryReason,
    attempt: usize,
) -> Vec<String> {
    let fallback: Vec<String>;
    let keywords: &[String] = if classified.keywords.is_empty() {
        fallback = classified
            .original
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        &fallback
    } else {
        &classified.keywords
    };
    if keywords.is_empty() {
        return Vec::new();
    }

    let preferred = match reason {
        RetryReason::Insufficient => {
            let mut kept: Vec<&str> = keywords.iter().map(String::as_str).collect();
            if kept.len() > 2 {
                // Longest tokens are treated as the most specific ones.
                let mut by_specificity: Vec<&str> = kept.clone();
                by_specificity.sort_by_key(|k| std::cmp::Reverse(k.len()));
                let drop: HashSet<&str> = by_specificity
                    .into_iter()
                    .take(attempt.max(1).min(kept.len() - 2))
                    .collect();
                kept.retain(|k| !drop.contains(k));
            }

            let mut terms: Vec<&str> = kept.clone();
            for keyword in &kept {
                if let Some(synonyms) = SYNONYMS.get(keyword) {
                    for &synonym in synonyms.iter() {
                        if !terms.contains(&synonym) {
                            terms.push(synonym);
                        }
                    }
                }
            }
            terms.truncate(kept.len() + 5);
            terms.join(" ")
        }
        RetryReason::Empty => join_terms(keywords, type_terms(classified.query_type)),
    };

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(normalize_query(&classified.original));
    [
        preferred,
        join_terms(keywords, type_terms(classified.query_type)),
        join_terms(keywords, BROADENING_TERMS),
    ]
    .into_iter()
    .map(|candidate| candidate.trim().to_string())
    .filter(|candidate| !candidate.is_empty())
    .filter(|candidate| seen.insert(normalize_query(candidate)))
    .collect()
}

fn normalize_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decomposition applies to long concept and how-to questions only.
pub fn should_decompose(classified: &ClassifiedQuery, min_words: usize) -> bool {
    classified.policy.decompose && classified.word_count() >= min_words
}
