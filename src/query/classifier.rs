//! Heuristic query classification.
//!
//! Rules are applied in order and the first match wins:
//! error signals, leading how-to verbs, leading concept phrases,
//! code-looking fragments, then `general` (promoted to `api_reference`
//! when a known symbol is mentioned).

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::policy::RetrievalPolicy;
use crate::core::errors::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Error,
    Howto,
    Concept,
    CodeLookup,
    ApiReference,
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Error => "error",
            QueryType::Howto => "howto",
            QueryType::Concept => "concept",
            QueryType::CodeLookup => "code_lookup",
            QueryType::ApiReference => "api_reference",
            QueryType::General => "general",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedQuery {
    pub original: String,
    pub query_type: QueryType,
    /// Lowercased non-stopword tokens, de-duplicated, in query order.
    pub keywords: Vec<String>,
    /// Known symbols mentioned verbatim in the query.
    pub symbols: Vec<String>,
    pub policy: RetrievalPolicy,
}

impl ClassifiedQuery {
    pub fn word_count(&self) -> usize {
        self.original.split_whitespace().count()
    }
}

static STACK_TRACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(Traceback \(most recent call last\)|\bpanicked at\b|\b[A-Z]\w*(Error|Exception)\b|\w+Error:|\bat [\w./\\-]+\.\w+:\d+|\bE\d{4}\b)",
    )
    .unwrap()
});

static ERROR_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(errors?|exceptions?|failed|failure|fails|crash(es|ed)?|traceback)\b").unwrap()
});

static CONCEPT_HOW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^how (does|do|is|are|was|were) .*\bwork").unwrap());

static HOW_EXPLAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^how (does|is|are|was|were)\b").unwrap());

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][\w.:]*\([^()]*\)").unwrap());

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_][A-Za-z0-9_.:]*[A-Za-z0-9_]|[A-Za-z0-9_]").unwrap());

/// "how" covers every "how ..." question that is not asking how something works.
const HOWTO_LEADS: &[&str] = &[
    "how", "create", "deploy", "setup", "set up", "build", "implement", "configure", "install",
];

const CONCEPT_LEADS: &[&str] = &[
    "what is",
    "what are",
    "what's",
    "what does",
    "explain",
    "describe",
    "difference",
    "why",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "could", "do", "does", "for", "from",
    "get", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of", "on", "or",
    "should", "so", "that", "the", "their", "there", "these", "this", "to", "use", "using",
    "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would",
    "you", "your",
];

fn starts_with_phrase(lowered: &str, phrase: &str) -> bool {
    lowered
        .strip_prefix(phrase)
        .is_some_and(|rest| rest.is_empty() || !rest.starts_with(|c: char| c.is_alphanumeric()))
}

/// Lowercased keyword tokens with stopwords and single characters removed.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    TOKEN_RE
        .find_iter(query)
        .map(|m| m.as_str().trim_matches(|c| c == '.' || c == ':').to_lowercase())
        .filter(|token| token.chars().count() >= 2 && !STOPWORDS.contains(&token.as_str()))
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct QueryClassifier {
    known_symbols: HashSet<String>,
}

impl QueryClassifier {
    pub fn new<I, S>(known_symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_symbols: known_symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, query: &str) -> Result<ClassifiedQuery, RetrievalError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(RetrievalError::MalformedQuery("query is empty".to_string()));
        }

        let symbols = self.mentioned_symbols(trimmed);
        let query_type = self.detect_type(trimmed, !symbols.is_empty());

        Ok(ClassifiedQuery {
            original: trimmed.to_string(),
            query_type,
            keywords: extract_keywords(trimmed),
            symbols,
            policy: RetrievalPolicy::for_type(query_type),
        })
    }

    fn detect_type(&self, query: &str, mentions_symbol: bool) -> QueryType {
        if STACK_TRACE_RE.is_match(query) || ERROR_WORD_RE.is_match(query) {
            return QueryType::Error;
        }

        let lowered = query.to_lowercase();
        let explains_mechanism =
            HOW_EXPLAIN_RE.is_match(&lowered) || CONCEPT_HOW_RE.is_match(&lowered);

        if !explains_mechanism && HOWTO_LEADS.iter().any(|lead| starts_with_phrase(&lowered, lead)) {
            return QueryType::Howto;
        }

        if explains_mechanism || CONCEPT_LEADS.iter().any(|lead| starts_with_phrase(&lowered, lead)) {
            return QueryType::Concept;
        }

        if query.contains('`') || CALL_RE.is_match(query) {
            return QueryType::CodeLookup;
        }

        if mentions_symbol {
            QueryType::ApiReference
        } else {
            QueryType::General
        }
    }

    fn mentioned_symbols(&self, query: &str) -> Vec<String> {
        if self.known_symbols.is_empty() {
            return Vec::new();
        }

        let mut found = Vec::new();
        for token in TOKEN_RE.find_iter(query) {
            let token = token.as_str().trim_matches(|c| c == '.' || c == ':');
            if found.iter().any(|f| f == token) {
                continue;
            }
            let head = token
                .split("::")
                .next()
                .and_then(|t| t.split('.').next())
                .unwrap_or(token);
            if self.known_symbols.contains(token) || self.known_symbols.contains(head) {
                found.push(token.to_string());
            }
        }
        found
    }
}
