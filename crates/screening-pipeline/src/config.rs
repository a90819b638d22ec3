//! Configuration for the screening pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::queue::{MAX_VISIBILITY_TIMEOUT, MAX_WAIT};
use crate::storage::MAX_BATCH_WRITE;

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Queue polling configuration (shared by all three stage queues)
    #[serde(default)]
    pub queues: QueueConfig,
    /// Retry policy around inference calls
    #[serde(default)]
    pub retry: RetryConfig,
    /// Parser stage configuration
    #[serde(default)]
    pub parser: ParserConfig,
    /// Extractor stage configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Ollama/LLM configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Local storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `SCREENING_CONFIG` if set, otherwise defaults, then apply env overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("SCREENING_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SCREENING_HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("SCREENING_PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.llm.model = model;
        }
        if let Ok(dir) = std::env::var("SCREENING_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queues.batch_size == 0 {
            return Err(Error::Config("queues.batch_size must be at least 1".into()));
        }
        if self.queues.wait() > MAX_WAIT {
            return Err(Error::Config(format!(
                "queues.wait_secs must be at most {}",
                MAX_WAIT.as_secs()
            )));
        }
        if self.queues.visibility_timeout_secs == 0
            || self.queues.visibility_timeout() > MAX_VISIBILITY_TIMEOUT
        {
            return Err(Error::Config(format!(
                "queues.visibility_timeout_secs must be between 1 and {}",
                MAX_VISIBILITY_TIMEOUT.as_secs()
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.parser.write_batch_size == 0 || self.parser.write_batch_size > MAX_BATCH_WRITE {
            return Err(Error::Config(format!(
                "parser.write_batch_size must be between 1 and {}",
                MAX_BATCH_WRITE
            )));
        }
        if self.extraction.max_input_chars == 0 {
            return Err(Error::Config("extraction.max_input_chars must be positive".into()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 20MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 20 * 1024 * 1024,
        }
    }
}

/// Queue polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum messages delivered per stage invocation
    pub batch_size: usize,
    /// Long-poll wait in seconds
    pub wait_secs: u64,
    /// Seconds a received message stays hidden before redelivery
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_secs: 20,
            visibility_timeout_secs: 300,
        }
    }
}

impl QueueConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Backoff growth between attempts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// base, 2*base, 3*base, ...
    Linear,
    /// base, 2*base, 4*base, ...
    #[default]
    Exponential,
}

/// Retry configuration for inference calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Base delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff growth
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Per-attempt timeout in seconds
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff: BackoffKind::Exponential,
            attempt_timeout_secs: 60,
        }
    }
}

/// Parser stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Hard limit on text extraction for a single document
    pub timeout_secs: u64,
    /// Parsed-text records grouped per document store write
    pub write_batch_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            write_batch_size: MAX_BATCH_WRITE,
        }
    }
}

/// Extractor stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Resume text is cut to this many characters before prompting
    pub max_input_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 10_000,
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            temperature: 0.1, // Low for structured output
            timeout_secs: 120,
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for raw objects and the database
    pub data_dir: PathBuf,
    /// SQLite file name inside `data_dir`
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("screening-pipeline");

        Self {
            data_dir,
            database: "pipeline.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }
}
