//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chunking and time budgets for a pipeline pass
    #[serde(default)]
    pub ingest: IngestConfig,

    /// HTTP retrieval settings
    #[serde(default)]
    pub http: HttpConfig,

    /// File locations, relative to the storage directory
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.chunk_size == 0 {
            return Err(AppError::config("ingest.chunk_size must be > 0"));
        }
        if self.ingest.max_results == Some(0) {
            return Err(AppError::config("ingest.max_results must be > 0"));
        }
        if self.ingest.retrieval_timeout_secs == 0 {
            return Err(AppError::config("ingest.retrieval_timeout_secs must be > 0"));
        }
        if self.ingest.write_timeout_secs == 0 {
            return Err(AppError::config("ingest.write_timeout_secs must be > 0"));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::config("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::config("http.timeout_secs must be > 0"));
        }
        if self.http.page_cache_trim > self.http.page_cache_size {
            return Err(AppError::config(
                "http.page_cache_trim must not exceed http.page_cache_size",
            ));
        }
        Ok(())
    }
}

/// Pipeline pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of areas per chunk handed to the writer
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,

    /// Stop a pass after this many areas
    #[serde(default)]
    pub max_results: Option<usize>,

    /// Time budget for a single retrieval call
    #[serde(default = "defaults::retrieval_timeout")]
    pub retrieval_timeout_secs: u64,

    /// Time budget for writing a single chunk
    #[serde(default = "defaults::write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::chunk_size(),
            max_results: None,
            retrieval_timeout_secs: defaults::retrieval_timeout(),
            write_timeout_secs: defaults::write_timeout(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Number of pages kept in the per-parser page cache
    #[serde(default = "defaults::page_cache_size")]
    pub page_cache_size: usize,

    /// Number of oldest pages evicted when the cache is full
    #[serde(default = "defaults::page_cache_trim")]
    pub page_cache_trim: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            page_cache_size: defaults::page_cache_size(),
            page_cache_trim: defaults::page_cache_trim(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding parser checkpoints
    #[serde(default = "defaults::state_dir")]
    pub state_dir: PathBuf,

    /// Append-only error log
    #[serde(default = "defaults::error_log")]
    pub error_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: defaults::state_dir(),
            error_log: defaults::error_log(),
        }
    }
}

impl PathsConfig {
    /// Checkpoint directory resolved against the storage directory.
    pub fn state_dir_in(&self, storage_dir: &Path) -> PathBuf {
        storage_dir.join(&self.state_dir)
    }

    /// Error log path resolved against the storage directory.
    pub fn error_log_in(&self, storage_dir: &Path) -> PathBuf {
        storage_dir.join(&self.error_log)
    }
}

mod defaults {
    use std::path::PathBuf;

    // Ingest defaults
    pub fn chunk_size() -> usize {
        10
    }
    pub fn retrieval_timeout() -> u64 {
        60
    }
    pub fn write_timeout() -> u64 {
        30
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; aggregator/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        100
    }
    pub fn page_cache_size() -> usize {
        100
    }
    pub fn page_cache_trim() -> usize {
        30
    }

    // Path defaults
    pub fn state_dir() -> PathBuf {
        PathBuf::from("state")
    }
    pub fn error_log() -> PathBuf {
        PathBuf::from("errorlog.txt")
    }
}
