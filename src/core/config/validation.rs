use super::{RetrieverConfig, VectorBackend};
use crate::core::errors::RetrievalError;

pub fn validate_config(config: &RetrieverConfig) -> Result<(), RetrievalError> {
    let retrieval = &config.retrieval;
    validate_f64_field("retrieval.rrf_k", retrieval.rrf_k, 1.0, 1_000.0)?;
    validate_u64_field(
        "retrieval.max_concurrency",
        retrieval.max_concurrency as u64,
        1,
        256,
    )?;
    validate_u64_field("retrieval.deadline_ms", retrieval.deadline_ms, 10, 600_000)?;
    validate_u64_field(
        "retrieval.candidates_per_source",
        retrieval.candidates_per_source as u64,
        1,
        1_000,
    )?;
    validate_f64_field(
        "retrieval.confidence_threshold",
        retrieval.confidence_threshold,
        0.0,
        1.0,
    )?;
    validate_f64_field(
        "retrieval.fused_confidence_threshold",
        retrieval.fused_confidence_threshold,
        0.0,
        1.0,
    )?;
    validate_u64_field(
        "retrieval.min_acceptable",
        retrieval.min_acceptable as u64,
        1,
        100,
    )?;
    validate_u64_field("retrieval.max_retries", retrieval.max_retries as u64, 0, 5)?;
    validate_f64_field(
        "retrieval.neighbor_score_decay",
        retrieval.neighbor_score_decay,
        0.0,
        1.0,
    )?;
    validate_u64_field("retrieval.max_variants", retrieval.max_variants as u64, 1, 10)?;
    validate_u64_field(
        "retrieval.decompose_min_words",
        retrieval.decompose_min_words as u64,
        1,
        1_000,
    )?;
    validate_u64_field(
        "retrieval.embedding_cache_ttl_secs",
        retrieval.embedding_cache_ttl_secs,
        0,
        86_400,
    )?;
    validate_u64_field(
        "retrieval.embedding_cache_max_entries",
        retrieval.embedding_cache_max_entries,
        1,
        10_000_000,
    )?;

    validate_url_field("llm.base_url", &config.llm.base_url)?;
    validate_non_empty("llm.embedding_model", &config.llm.embedding_model)?;
    validate_non_empty("llm.rerank_model", &config.llm.rerank_model)?;
    validate_u64_field("llm.timeout_secs", config.llm.timeout_secs, 1, 600)?;
    validate_u64_field(
        "llm.embed_batch_size",
        config.llm.embed_batch_size as u64,
        1,
        2_048,
    )?;

    if config.storage.sqlite_path.as_os_str().is_empty() {
        return Err(config_error("storage.sqlite_path", "must not be empty"));
    }
    match config.storage.vector_backend {
        VectorBackend::Qdrant => {
            validate_url_field("qdrant.url", &config.qdrant.url)?;
            validate_non_empty("qdrant.collection", &config.qdrant.collection)?;
            validate_u64_field("qdrant.dimension", config.qdrant.dimension as u64, 1, 65_536)?;
            validate_u64_field("qdrant.batch_size", config.qdrant.batch_size as u64, 1, 10_000)?;
            validate_u64_field("qdrant.timeout_secs", config.qdrant.timeout_secs, 1, 600)?;
            validate_u64_field("qdrant.max_retries", config.qdrant.max_retries as u64, 1, 10)?;
        }
        VectorBackend::Sqlite => {
            if config.storage.vector_sqlite_path.as_os_str().is_empty() {
                return Err(config_error("storage.vector_sqlite_path", "must not be empty"));
            }
        }
    }

    Ok(())
}

fn validate_u64_field(path: &str, value: u64, min: u64, max: u64) -> Result<(), RetrievalError> {
    if value < min || value > max {
        return Err(config_error(
            path,
            &format!("must be between {min} and {max}, got {value}"),
        ));
    }
    Ok(())
}

fn validate_f64_field(path: &str, value: f64, min: f64, max: f64) -> Result<(), RetrievalError> {
    if !value.is_finite() || value < min || value > max {
        return Err(config_error(
            path,
            &format!("must be between {min} and {max}, got {value}"),
        ));
    }
    Ok(())
}

fn validate_url_field(path: &str, value: &str) -> Result<(), RetrievalError> {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(config_error(path, "must be an http(s) URL"));
    }
    Ok(())
}

fn validate_non_empty(path: &str, value: &str) -> Result<(), RetrievalError> {
    if value.trim().is_empty() {
        return Err(config_error(path, "must not be empty"));
    }
    Ok(())
}

fn config_error(path: &str, message: &str) -> RetrievalError {
    RetrievalError::Config(format!("{path} {message}"))
}
