use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::defaults::{CONFIG_ENV, LLM_API_KEY_ENV, QDRANT_API_KEY_ENV};
use super::validation::validate_config;
use super::RetrieverConfig;
use crate::core::errors::RetrievalError;

const REDACT_PLACEHOLDER: &str = "****";
const SECRETS_FILE: &str = "secrets.yaml";

const SENSITIVE_PATTERNS: [&str; 6] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "credential",
    "bearer",
];

/// Resolves, reads and validates the retriever configuration.
///
/// The config file is located through `DOC_RETRIEVER_CONFIG`, then the
/// explicit path given to [`ConfigService::new`]. With neither, defaults
/// apply. A `secrets.yaml` next to the config file is merged on top, and
/// API keys from the environment win over both.
#[derive(Debug, Clone, Default)]
pub struct ConfigService {
    explicit_path: Option<PathBuf>,
}

impl ConfigService {
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        Self { explicit_path }
    }

    pub fn config_path(&self) -> Option<PathBuf> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        self.explicit_path.clone()
    }

    pub fn secrets_path(&self) -> Option<PathBuf> {
        self.config_path()
            .map(|path| path.with_file_name(SECRETS_FILE))
    }

    pub fn load_config(&self) -> Result<RetrieverConfig, RetrievalError> {
        let mut config = match self.config_path() {
            Some(path) => {
                if !path.exists() {
                    return Err(RetrievalError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                let public_config = load_yaml_file(&path)?;
                let secrets_config = match self.secrets_path() {
                    Some(secrets) if secrets.exists() => load_yaml_file(&secrets)?,
                    _ => Value::Object(Map::new()),
                };
                parse_config(deep_merge(&public_config, &secrets_config))?
            }
            None => {
                tracing::debug!("No config file configured, using defaults");
                RetrieverConfig::default()
            }
        };

        apply_env_secrets(&mut config, |key| env::var(key).ok());
        validate_config(&config)?;
        Ok(config)
    }

    /// Config as JSON with secrets masked, for logging.
    pub fn redacted(&self, config: &RetrieverConfig) -> Value {
        serde_json::to_value(config)
            .map(|value| redact_sensitive_values(&value))
            .unwrap_or(Value::Null)
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, RetrievalError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
    if contents.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_yaml::from_str::<Value>(&contents) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(_) => Err(RetrievalError::Config(format!(
            "{}: top level must be a mapping",
            path.display()
        ))),
        Err(e) => Err(RetrievalError::Config(format!("{}: {e}", path.display()))),
    }
}

fn parse_config(value: Value) -> Result<RetrieverConfig, RetrievalError> {
    serde_json::from_value(value).map_err(|e| RetrievalError::Config(e.to_string()))
}

fn apply_env_secrets(config: &mut RetrieverConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup(QDRANT_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        config.qdrant.api_key = Some(key);
    }
    if let Some(key) = lookup(LLM_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        config.llm.api_key = Some(key);
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let redacted = if is_sensitive_key(key) && !val.is_null() {
                        Value::String(REDACT_PLACEHOLDER.to_string())
                    } else {
                        redact_sensitive_values(val)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
