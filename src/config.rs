//! Configuration for the builder and enricher binaries.
//!
//! Settings are resolved in order (later wins):
//!
//! 1. Compiled defaults
//! 2. YAML file (`--config`, default `config.yaml`)
//! 3. Environment variables, upper-snake-case of the dotted key
//!    (`NEO4J_URI`, `LLM_MODEL`, `GRAPH_MAX_NODES`, `ENRICHER_BATCH_SIZE`, …)
//!
//! A `.env` file is loaded before the environment pass. A missing config
//! file is only an error when the path was given explicitly.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    #[diagnostic(code(conceptloom::config::file_read))]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config at {path}: {source}")]
    #[diagnostic(code(conceptloom::config::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse environment variable {key}: {message}")]
    #[diagnostic(
        code(conceptloom::config::env_parse),
        help("Unset the variable or give it a value of the expected type.")
    )]
    EnvParse { key: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(conceptloom::config::invalid))]
    Invalid { message: String },
}

/// Graph store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_retries: u32,
    pub retry_interval_seconds: u64,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            max_retries: 5,
            retry_interval_seconds: 3,
        }
    }
}

impl Neo4jSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }
}

/// LLM endpoint, cache, and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub url: String,
    pub model: String,
    pub cache_dir: PathBuf,
    pub max_retries: u32,
    pub retry_interval_seconds: u64,
    pub max_backoff_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            cache_dir: PathBuf::from("llm_cache"),
            max_retries: 3,
            retry_interval_seconds: 2,
            max_backoff_seconds: 15,
            request_timeout_seconds: 120,
        }
    }
}

impl LlmSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_secs(self.retry_interval_seconds),
            max_backoff: Duration::from_secs(self.max_backoff_seconds),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Builder pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphSettings {
    pub seed_concept: String,
    pub max_nodes: usize,
    pub timeout_minutes: u64,
    pub worker_count: usize,
    /// Pairs to sample in the post-expansion mining phase (attempts, not a
    /// created-edge target).
    pub random_relationships: usize,
    pub concurrency: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            seed_concept: "Artificial Intelligence".to_string(),
            max_nodes: 100,
            timeout_minutes: 30,
            worker_count: 5,
            random_relationships: 50,
            concurrency: 5,
        }
    }
}

impl GraphSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

/// Enricher pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnricherSettings {
    pub batch_size: usize,
    pub interval_seconds: u64,
    /// Global created-edge cap per run; 0 means unbounded.
    pub max_relationships: u64,
    pub concurrency: usize,
}

impl Default for EnricherSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            interval_seconds: 60,
            max_relationships: 100,
            concurrency: 5,
        }
    }
}

impl EnricherSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Root settings tree, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub neo4j: Neo4jSettings,
    pub llm: LlmSettings,
    pub graph: GraphSettings,
    pub enricher: EnricherSettings,
}

impl Settings {
    /// Load settings from an optional file path plus the environment.
    ///
    /// `explicit` marks whether the user named the path on the command line;
    /// only then is a missing file fatal.
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut settings = match std::fs::read_to_string(path) {
            Ok(content) => {
                serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound && !explicit => {
                Settings::default()
            }
            Err(source) => {
                return Err(ConfigError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `UPPER_SNAKE` environment overrides for every recognised key.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        override_string("NEO4J_URI", &mut self.neo4j.uri);
        override_string("NEO4J_USER", &mut self.neo4j.user);
        override_string("NEO4J_PASSWORD", &mut self.neo4j.password);
        override_parsed("NEO4J_MAX_RETRIES", &mut self.neo4j.max_retries)?;
        override_parsed(
            "NEO4J_RETRY_INTERVAL_SECONDS",
            &mut self.neo4j.retry_interval_seconds,
        )?;

        override_string("LLM_URL", &mut self.llm.url);
        override_string("LLM_MODEL", &mut self.llm.model);
        if let Ok(dir) = std::env::var("LLM_CACHE_DIR") {
            self.llm.cache_dir = PathBuf::from(dir);
        }
        override_parsed("LLM_MAX_RETRIES", &mut self.llm.max_retries)?;
        override_parsed(
            "LLM_RETRY_INTERVAL_SECONDS",
            &mut self.llm.retry_interval_seconds,
        )?;
        override_parsed("LLM_MAX_BACKOFF_SECONDS", &mut self.llm.max_backoff_seconds)?;
        override_parsed(
            "LLM_REQUEST_TIMEOUT_SECONDS",
            &mut self.llm.request_timeout_seconds,
        )?;

        override_string("GRAPH_SEED_CONCEPT", &mut self.graph.seed_concept);
        override_parsed("GRAPH_MAX_NODES", &mut self.graph.max_nodes)?;
        override_parsed("GRAPH_TIMEOUT_MINUTES", &mut self.graph.timeout_minutes)?;
        override_parsed("GRAPH_WORKER_COUNT", &mut self.graph.worker_count)?;
        override_parsed(
            "GRAPH_RANDOM_RELATIONSHIPS",
            &mut self.graph.random_relationships,
        )?;
        override_parsed("GRAPH_CONCURRENCY", &mut self.graph.concurrency)?;

        override_parsed("ENRICHER_BATCH_SIZE", &mut self.enricher.batch_size)?;
        override_parsed(
            "ENRICHER_INTERVAL_SECONDS",
            &mut self.enricher.interval_seconds,
        )?;
        override_parsed(
            "ENRICHER_MAX_RELATIONSHIPS",
            &mut self.enricher.max_relationships,
        )?;
        override_parsed("ENRICHER_CONCURRENCY", &mut self.enricher.concurrency)?;

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.seed_concept.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "graph.seed_concept must not be empty".to_string(),
            });
        }
        if self.graph.max_nodes == 0 {
            return Err(ConfigError::Invalid {
                message: "graph.max_nodes must be at least 1".to_string(),
            });
        }
        if self.graph.worker_count == 0 || self.graph.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "graph.worker_count and graph.concurrency must be at least 1".to_string(),
            });
        }
        if self.enricher.batch_size == 0 || self.enricher.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "enricher.batch_size and enricher.concurrency must be at least 1"
                    .to_string(),
            });
        }
        Ok(())
    }
}

fn override_string(key: &str, slot: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *slot = value;
    }
}

fn override_parsed<T>(key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(key) {
        *slot = value.parse().map_err(|e: T::Err| ConfigError::EnvParse {
            key: key.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}
