// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Parses and validates all recognized server, storage, corpus, and backend options
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! Environment-based configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Default HTTP port
const DEFAULT_HTTP_PORT: u16 = 8081;

/// Default ephemeral session time-to-live, in hours
const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Default admission gate capacity (simultaneous in-flight generations)
const DEFAULT_GATE_CAPACITY: usize = 50;

/// Default wait on the admission gate before reporting overload, in seconds
const DEFAULT_GATE_WAIT_SECS: u64 = 10;

/// Default generation backend request timeout, in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server
    pub http_host: String,
    /// HTTP port
    pub http_port: u16,
    /// SQLite database URL (`sqlite:stretch_coach.db` or `sqlite::memory:`)
    pub database_url: String,
    /// Whether a corpus load failure aborts startup or degrades the service
    pub corpus_required: bool,
    /// Corpus and embedding model configuration
    pub corpus: CorpusConfig,
    /// Generation backend configuration
    pub generation: GenerationConfig,
    /// Ephemeral session configuration
    pub session: SessionConfig,
}

/// Corpus and embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Path to the exercise corpus JSON
    pub data_path: PathBuf,
    /// Path to the precomputed embedding table JSON
    pub embeddings_path: PathBuf,
    /// Directory holding the embedding model files
    /// (`model.safetensors`, `config.json`, `tokenizer.json`)
    pub model_dir: PathBuf,
    /// Embedding model identifier, for logging and response metadata
    pub model_id: String,
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the chat-completions style backend
    pub base_url: String,
    /// API key (optional for local backends)
    pub api_key: Option<String>,
    /// Model to request
    pub model: String,
    /// Admission gate capacity
    pub gate_capacity: usize,
    /// Maximum wait for an admission permit before reporting overload
    pub gate_wait: Duration,
    /// Outbound connection pool capacity
    pub pool_capacity: usize,
    /// Per-request timeout for backend calls
    pub request_timeout: Duration,
}

/// Ephemeral session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time-to-live for unconverted sessions, in hours
    pub ttl_hours: i64,
    /// Interval between expiry sweeps, in seconds
    pub sweep_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a recognized variable is present but unparseable.
    pub fn from_env() -> Result<Self> {
        let http_host = env::var("HTTP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let http_port = parse_env("HTTP_PORT", DEFAULT_HTTP_PORT)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:stretch_coach.db".into());
        let corpus_required = env::var("CORPUS_REQUIRED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let config = Self {
            http_host,
            http_port,
            database_url,
            corpus_required,
            corpus: CorpusConfig::from_env()?,
            generation: GenerationConfig::from_env()?,
            session: SessionConfig::from_env()?,
        };

        info!(
            "Configuration loaded: port={}, gate_capacity={}, session_ttl={}h, backend={}",
            config.http_port,
            config.generation.gate_capacity,
            config.session.ttl_hours,
            config.generation.base_url
        );

        Ok(config)
    }
}

impl CorpusConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            data_path: env::var("CORPUS_DATA_PATH")
                .unwrap_or_else(|_| "data/exercises.json".into())
                .into(),
            embeddings_path: env::var("CORPUS_EMBEDDINGS_PATH")
                .unwrap_or_else(|_| "data/embeddings.json".into())
                .into(),
            model_dir: env::var("EMBEDDING_MODEL_DIR")
                .unwrap_or_else(|_| "models/labse".into())
                .into(),
            model_id: env::var("EMBEDDING_MODEL_ID")
                .unwrap_or_else(|_| "sentence-transformers/LaBSE".into()),
        })
    }
}

impl GenerationConfig {
    fn from_env() -> Result<Self> {
        let gate_capacity = parse_env("GENERATION_GATE_CAPACITY", DEFAULT_GATE_CAPACITY)?;
        // Pool defaults to gate capacity: no point in more connections than permits
        let pool_capacity = parse_env("GENERATION_POOL_CAPACITY", gate_capacity)?;
        let gate_wait_secs = parse_env("GENERATION_GATE_WAIT_SECS", DEFAULT_GATE_WAIT_SECS)?;
        let request_timeout_secs =
            parse_env("GENERATION_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(Self {
            base_url: env::var("GENERATION_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env::var("GENERATION_API_KEY").ok().filter(|k| !k.is_empty()),
            model: env::var("GENERATION_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".into()),
            gate_capacity,
            gate_wait: Duration::from_secs(gate_wait_secs),
            pool_capacity,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

impl SessionConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            ttl_hours: parse_env("SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?,
            sweep_interval_secs: parse_env("SESSION_SWEEP_INTERVAL_SECS", 300)?,
        })
    }
}

/// Parse an environment variable into `T`, falling back to `default` when unset
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {name}: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let generation = GenerationConfig::from_env().unwrap();
        assert_eq!(generation.gate_capacity, DEFAULT_GATE_CAPACITY);
        assert_eq!(generation.pool_capacity, generation.gate_capacity);

        let session = SessionConfig::from_env().unwrap();
        assert_eq!(session.ttl_hours, DEFAULT_SESSION_TTL_HOURS);
    }
}
