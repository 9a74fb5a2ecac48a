use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use extract::RetryPolicy;
use ingest::ChunkerConfig;
use query::RetrieverConfig;

use crate::pipeline::PipelineSettings;

/// Points at a JSON config file; every field is optional
pub const CONFIG_PATH_VAR: &str = "GRAPHRAG_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub model: ModelConfig,
    pub store: StoreConfig,
    pub chunking: ChunkerConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrieverConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // More parallelism, fewer retries, large cache
    Accurate, // Fresh answers, patient retries
    #[default]
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
    /// Per language-model call
    pub request_timeout_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 5,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            json_logs: false,
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 20,
                request_timeout_secs: 30,
            },
            retry: RetryConfig {
                max_attempts: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 3,
                request_timeout_secs: 120,
            },
            retry: RetryConfig {
                max_attempts: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            ..Self::default()
        }
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Defaults, then the file named by `GRAPHRAG_CONFIG`, then environment
    /// overrides. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match env(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match env("GRAPHRAG_MODE") {
                Some(mode) => Self::for_mode(parse_mode(&mode)?),
                None => Self::default(),
            },
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = env("GRAPHRAG_MODEL_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = env("GRAPHRAG_MODEL") {
            self.model.model = model;
        }
        if let Some(bind) = env("GRAPHRAG_BIND") {
            self.server.bind_addr = bind;
        }
        if let Some(json) = env("GRAPHRAG_LOG_JSON") {
            self.server.json_logs = match json.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => return Err(ConfigError::Invalid(format!("GRAPHRAG_LOG_JSON: {other:?}"))),
            };
        }
        if let Some(n) = env("GRAPHRAG_MAX_CONCURRENCY") {
            self.concurrency.max_concurrent_extractions = parse_number("GRAPHRAG_MAX_CONCURRENCY", &n)?;
        }
        if let Some(secs) = env("GRAPHRAG_REQUEST_TIMEOUT_SECS") {
            self.concurrency.request_timeout_secs = parse_number("GRAPHRAG_REQUEST_TIMEOUT_SECS", &secs)?;
        }

        match env("GRAPHRAG_STORE").as_deref() {
            None => {}
            Some("memory") => self.store = StoreConfig::Memory,
            Some("neo4j") => {
                if self.store == StoreConfig::Memory {
                    self.store = StoreConfig::Neo4j {
                        uri: "bolt://localhost:7687".to_string(),
                        user: "neo4j".to_string(),
                        password: String::new(),
                    };
                }
            }
            Some(other) => return Err(ConfigError::Invalid(format!("unknown store kind {other:?}"))),
        }

        if let StoreConfig::Neo4j { uri, user, password } = &mut self.store {
            if let Some(v) = env("GRAPHRAG_NEO4J_URI") {
                *uri = v;
            }
            if let Some(v) = env("GRAPHRAG_NEO4J_USER") {
                *user = v;
            }
            if let Some(v) = env("GRAPHRAG_NEO4J_PASSWORD") {
                *password = v;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.retrieval
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.concurrency.max_concurrent_extractions == 0 {
            return Err(ConfigError::Invalid("max_concurrent_extractions must be at least 1".into()));
        }
        if self.concurrency.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid("retry.initial_backoff_ms exceeds max_backoff_ms".into()));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid("cache.max_entries must be positive when the cache is enabled".into()));
        }
        if self.model.base_url.is_empty() || self.model.model.is_empty() {
            return Err(ConfigError::Invalid("model.base_url and model.model are required".into()));
        }
        if let StoreConfig::Neo4j { uri, .. } = &self.store {
            if uri.is_empty() {
                return Err(ConfigError::Invalid("store.uri is required for neo4j".into()));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.request_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_concurrent_extractions: self.concurrency.max_concurrent_extractions,
            retry: RetryPolicy::new(
                self.retry.max_attempts,
                Duration::from_millis(self.retry.initial_backoff_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
            ),
            call_timeout: self.request_timeout(),
            chunking: self.chunking,
            retrieval: self.retrieval,
        }
    }
}

fn parse_mode(raw: &str) -> Result<OperationMode, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "fast" => Ok(OperationMode::Fast),
        "accurate" => Ok(OperationMode::Accurate),
        "balanced" => Ok(OperationMode::Balanced),
        other => Err(ConfigError::Invalid(format!("unknown mode {other:?}"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))
}
