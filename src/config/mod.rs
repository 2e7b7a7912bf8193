//! Configuration management for ad-job-state
//!
//! This module handles loading, parsing, and managing configuration from:
//! - Configuration files (TOML format)
//! - Command-line arguments (applied by the `cli` module)
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Export configuration
    #[serde(default)]
    pub export: ExportConfig,

    /// Import configuration
    #[serde(default)]
    pub import: ImportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Cluster URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Elastic Cloud deployment id, takes precedence over `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,

    /// Username for basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Accept invalid TLS certificates
    #[serde(default)]
    pub ignore_certs: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Export-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Hits requested per point-in-time page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum record pairs per input file
    #[serde(default = "default_max_docs_per_file")]
    pub max_docs_per_file: usize,

    /// Point-in-time keep alive, renewed on every page
    #[serde(default = "default_pit_keep_alive")]
    pub pit_keep_alive: String,

    /// Size of the single-request annotation and notification searches
    #[serde(default = "default_search_size")]
    pub search_size: usize,

    /// Directory receiving the intermediate files and the archive
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Import-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Actions per `_bulk` request
    #[serde(default = "default_bulk_chunk_size")]
    pub bulk_chunk_size: usize,

    /// Pause between the statistics write and the revert call, in milliseconds
    #[serde(default = "default_revert_delay_ms")]
    pub revert_delay_ms: u64,

    /// Directory the archive is extracted under
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Re-index exported annotations after the job is created
    #[serde(default = "default_import_annotations")]
    pub import_annotations: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Upper bound for documents per intermediate file and per search request
pub const MAX_DOCS_PER_REQUEST: usize = 10_000;

// Default value functions
fn default_url() -> String {
    "https://localhost:9200".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_page_size() -> usize {
    2_000
}

fn default_max_docs_per_file() -> usize {
    10_000
}

fn default_pit_keep_alive() -> String {
    "1m".to_string()
}

fn default_search_size() -> usize {
    10_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_bulk_chunk_size() -> usize {
    1_000
}

fn default_revert_delay_ms() -> u64 {
    2_000
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_import_annotations() -> bool {
    true
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            cloud_id: None,
            username: None,
            ignore_certs: false,
            timeout: default_timeout(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_docs_per_file: default_max_docs_per_file(),
            pit_keep_alive: default_pit_keep_alive(),
            search_size: default_search_size(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            bulk_chunk_size: default_bulk_chunk_size(),
            revert_delay_ms: default_revert_delay_ms(),
            work_dir: default_work_dir(),
            import_annotations: default_import_annotations(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// When no path is given the default location is used, and a missing
    /// default file yields the default configuration. An explicitly requested
    /// file must exist.
    ///
    /// # Arguments
    /// * `path` - Optional path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_config_path(), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigError::FileNotFound(path.display().to_string()).into());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ad-job-state")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.connection.cloud_id.is_none() && self.connection.url.trim().is_empty() {
            return Err(ConfigError::MissingField("connection.url".to_string()).into());
        }
        if self.connection.timeout == 0 {
            return Err(invalid("connection.timeout", self.connection.timeout));
        }
        let bounded = [
            ("export.page_size", self.export.page_size),
            ("export.max_docs_per_file", self.export.max_docs_per_file),
            ("export.search_size", self.export.search_size),
        ];
        for (field, value) in bounded {
            if value == 0 || value > MAX_DOCS_PER_REQUEST {
                return Err(invalid(field, value));
            }
        }
        if !is_time_value(&self.export.pit_keep_alive) {
            return Err(invalid("export.pit_keep_alive", &self.export.pit_keep_alive));
        }
        if self.import.bulk_chunk_size == 0 {
            return Err(invalid("import.bulk_chunk_size", self.import.bulk_chunk_size));
        }
        Ok(())
    }
}

impl ConnectionConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl ImportConfig {
    /// Get the pause before the snapshot revert as Duration
    pub fn revert_delay(&self) -> Duration {
        Duration::from_millis(self.revert_delay_ms)
    }
}

fn invalid(field: &str, value: impl ToString) -> crate::error::JobStateError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Check an Elasticsearch time value such as `1m`, `30s` or `500ms`
fn is_time_value(value: &str) -> bool {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if digits_end == 0 {
        return false;
    }
    matches!(
        &value[digits_end..],
        "d" | "h" | "m" | "s" | "ms" | "micros" | "nanos"
    )
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
