//! Strict parsing of LLM chat output.
//!
//! Models wrap JSON in prose or code fences, so the outermost array is
//! extracted first; everything inside it is then validated field by field.

use std::collections::HashSet;

use serde::Deserialize;

use super::provider::RerankOutcome;
use crate::core::errors::RetrievalError;

pub const MIN_SUB_QUESTIONS: usize = 2;
pub const MAX_SUB_QUESTIONS: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScoreEntry {
    Bare(f64),
    Indexed { index: usize, score: f64 },
}

fn outer_array(content: &str) -> Result<&str, RetrievalError> {
    match (content.find('['), content.rfind(']')) {
        (Some(start), Some(end)) if start < end => Ok(&content[start..=end]),
        _ => Err(RetrievalError::MalformedResponse(format!(
            "expected a JSON array, got: {}",
            content.chars().take(120).collect::<String>()
        ))),
    }
}

fn check_score(score: f64) -> Result<f64, RetrievalError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(RetrievalError::MalformedResponse(format!(
            "score {score} outside [0, 1]"
        )))
    }
}

/// Parse one score per candidate. Accepts a bare array of numbers or an
/// array of `{"index", "score"}` objects covering every candidate exactly once.
pub fn parse_rerank_scores(content: &str, expected: usize) -> Result<RerankOutcome, RetrievalError> {
    let entries: Vec<ScoreEntry> =
        serde_json::from_str(outer_array(content)?).map_err(RetrievalError::malformed)?;

    if entries.len() != expected {
        return Err(RetrievalError::MalformedResponse(format!(
            "expected {expected} scores, got {}",
            entries.len()
        )));
    }

    let mut scores = vec![f64::NAN; expected];
    let mut seen = HashSet::new();
    for (position, entry) in entries.into_iter().enumerate() {
        let (index, score) = match entry {
            ScoreEntry::Bare(score) => (position, score),
            ScoreEntry::Indexed { index, score } => (index, score),
        };
        if index >= expected {
            return Err(RetrievalError::MalformedResponse(format!(
                "candidate index {index} out of range (0..{expected})"
            )));
        }
        if !seen.insert(index) {
            return Err(RetrievalError::MalformedResponse(format!(
                "candidate index {index} scored twice"
            )));
        }
        scores[index] = check_score(score)?;
    }

    Ok(RerankOutcome { scores })
}

/// Parse 2-4 distinct, non-empty sub-questions.
pub fn parse_sub_questions(content: &str) -> Result<Vec<String>, RetrievalError> {
    let raw: Vec<String> =
        serde_json::from_str(outer_array(content)?).map_err(RetrievalError::malformed)?;

    let mut seen = HashSet::new();
    let questions: Vec<String> = raw
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .collect();

    if !(MIN_SUB_QUESTIONS..=MAX_SUB_QUESTIONS).contains(&questions.len()) {
        return Err(RetrievalError::MalformedResponse(format!(
            "expected {MIN_SUB_QUESTIONS}-{MAX_SUB_QUESTIONS} sub-questions, got {}",
            questions.len()
        )));
    }

    Ok(questions)
}
