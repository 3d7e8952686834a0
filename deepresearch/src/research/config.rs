//! Research settings read from the environment.
//!
//! `ResearchConfig::load` first exports `.env` and `~/.config/deepresearch/config.toml`
//! values (existing variables win), then reads the `DEEPRESEARCH_*` keys.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::model::Budget;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
    #[error("load config files: {0}")]
    Load(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResearchConfig {
    pub max_iterations: u32,
    pub max_workers: u32,
    pub max_searches_per_worker: u32,
    pub worker_timeout: Duration,
    pub step_limit: usize,
    /// Tool sources used when the brief enables none.
    pub enabled_sources: Vec<String>,
    pub user_id: String,
    pub db_path: PathBuf,
    pub history_limit: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        let budget = Budget::default();
        Self {
            max_iterations: budget.max_iterations,
            max_workers: budget.max_workers,
            max_searches_per_worker: budget.max_searches_per_worker,
            worker_timeout: Duration::from_secs(120),
            step_limit: crate::graph::DEFAULT_STEP_LIMIT,
            enabled_sources: vec!["web".into(), "academic".into()],
            user_id: "default_user".into(),
            db_path: PathBuf::from("deepresearch.db"),
            history_limit: 50,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}

impl ResearchConfig {
    /// Applies `.env` (from `dotenv_dir` or the current directory) and the XDG config file
    /// to the environment, then reads it.
    pub fn load(dotenv_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let applied = env_config::load_and_apply("deepresearch", dotenv_dir)
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        if !applied.is_empty() {
            tracing::debug!(keys = ?applied, "applied config file values");
        }
        Self::from_env()
    }

    /// Reads `DEEPRESEARCH_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let enabled_sources = match lookup("DEEPRESEARCH_ENABLED_SOURCES") {
            Some(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => defaults.enabled_sources,
        };
        let timeout_secs = parse(
            &lookup,
            "DEEPRESEARCH_WORKER_TIMEOUT_SECS",
            defaults.worker_timeout.as_secs(),
        )?;
        Ok(Self {
            max_iterations: parse(&lookup, "DEEPRESEARCH_MAX_ITERATIONS", defaults.max_iterations)?,
            max_workers: parse(&lookup, "DEEPRESEARCH_MAX_WORKERS", defaults.max_workers)?,
            max_searches_per_worker: parse(
                &lookup,
                "DEEPRESEARCH_MAX_SEARCHES_PER_WORKER",
                defaults.max_searches_per_worker,
            )?,
            worker_timeout: Duration::from_secs(timeout_secs),
            step_limit: parse(&lookup, "DEEPRESEARCH_STEP_LIMIT", defaults.step_limit)?,
            enabled_sources,
            user_id: lookup("DEEPRESEARCH_USER_ID")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.user_id),
            db_path: lookup("DEEPRESEARCH_DB")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            history_limit: parse(&lookup, "DEEPRESEARCH_HISTORY_LIMIT", defaults.history_limit)?,
        })
    }

    /// Initial budget of a new conversation.
    pub fn budget(&self) -> Budget {
        Budget {
            iterations: 0,
            max_iterations: self.max_iterations,
            max_workers: self.max_workers,
            searches_used: 0,
            max_searches_per_worker: self.max_searches_per_worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = ResearchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ResearchConfig::default());
        assert_eq!(config.budget(), Budget::default());
    }

    /// **Scenario**: Variables override defaults; the source list is split on commas.
    #[test]
    fn reads_overrides() {
        let config = ResearchConfig::from_lookup(lookup(&[
            ("DEEPRESEARCH_MAX_ITERATIONS", "5"),
            ("DEEPRESEARCH_WORKER_TIMEOUT_SECS", " 9 "),
            ("DEEPRESEARCH_ENABLED_SOURCES", "web, arxiv,"),
            ("DEEPRESEARCH_USER_ID", "alice"),
        ]))
        .unwrap();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.worker_timeout, Duration::from_secs(9));
        assert_eq!(config.enabled_sources, vec!["web", "arxiv"]);
        assert_eq!(config.user_id, "alice");
        assert_eq!(config.budget().max_iterations, 5);
    }

    /// **Scenario**: A non-numeric limit is reported with its key and value.
    #[test]
    fn invalid_number_is_error() {
        let err = ResearchConfig::from_lookup(lookup(&[("DEEPRESEARCH_MAX_WORKERS", "many")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "DEEPRESEARCH_MAX_WORKERS".into(),
                value: "many".into()
            }
        );
    }
}
