//! Agent Configuration
//!
//! One explicitly constructed configuration object, built from defaults,
//! the environment (`.env` is loaded by the binary) and CLI overrides, then
//! handed to the orchestrator at startup.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "phi3.5:3.8b-mini-instruct-q4_K_M";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Bearer token for the completion endpoint; empty means no auth header
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,

    pub db_path: PathBuf,
    pub docs_dir: PathBuf,
    /// Saved demonstrations for the primary SQL predictor
    pub sql_module_path: PathBuf,

    /// Passages fetched per question
    pub top_k: usize,
    /// Retry threshold: a failed execution is retried while the failure
    /// count is below `max_sql_attempts - 1`. An all-failure run therefore
    /// makes `max_sql_attempts - 1` generations, and never fewer than one.
    pub max_sql_attempts: u32,
    pub max_result_rows: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            request_timeout_secs: 120,
            db_path: PathBuf::from("data/northwind.sqlite"),
            docs_dir: PathBuf::from("docs"),
            sql_module_path: PathBuf::from("agent/sql_optimized.json"),
            top_k: 3,
            max_sql_attempts: 3,
            max_result_rows: 200,
        }
    }
}

impl AgentConfig {
    /// Build from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("OPENAI_API_KEY") {
            config.api_key = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            config.model = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = lookup("COPILOT_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("COPILOT_DOCS_DIR") {
            config.docs_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("COPILOT_SQL_MODULE") {
            config.sql_module_path = PathBuf::from(v);
        }

        config.temperature = parse_or(&lookup, "COPILOT_TEMPERATURE", config.temperature)?;
        config.max_tokens = parse_or(&lookup, "COPILOT_MAX_TOKENS", config.max_tokens)?;
        config.request_timeout_secs =
            parse_or(&lookup, "COPILOT_REQUEST_TIMEOUT_SECS", config.request_timeout_secs)?;
        config.top_k = parse_or(&lookup, "COPILOT_TOP_K", config.top_k)?;
        config.max_sql_attempts =
            parse_or(&lookup, "COPILOT_MAX_SQL_ATTEMPTS", config.max_sql_attempts)?;
        config.max_result_rows = parse_or(&lookup, "COPILOT_MAX_RESULT_ROWS", config.max_result_rows)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sql_attempts == 0 {
            return Err(CopilotError::Config(
                "max_sql_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(CopilotError::Config("base_url must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            CopilotError::Config(format!("Invalid value '{}' for {}: {}", raw, key, e))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AgentConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.max_sql_attempts, 3);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("COPILOT_TOP_K", "5"),
            ("COPILOT_DB_PATH", "/tmp/nw.sqlite"),
        ]))
        .unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.top_k, 5);
        assert_eq!(config.db_path, PathBuf::from("/tmp/nw.sqlite"));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = AgentConfig::from_lookup(lookup_from(&[("COPILOT_TOP_K", "three")])).unwrap_err();
        assert!(matches!(err, CopilotError::Config(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = AgentConfig::from_lookup(lookup_from(&[("COPILOT_MAX_SQL_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("max_sql_attempts"));
    }
}
