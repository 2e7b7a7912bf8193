use std::{fmt, io};

use crate::error::api::{ErrorInfo, format_api_error};

/// Crate-wide `Result` type using [`JobStateError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, JobStateError>;

/// Top-level error type for job state transfers.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum JobStateError {
    /// Connection-related errors.
    Connection(ConnectionError),

    /// Configuration errors.
    Config(ConfigError),

    /// Export pipeline errors.
    Export(ExportError),

    /// Import pipeline errors.
    Import(ImportError),

    /// Archive packing and unpacking errors.
    Archive(ArchiveError),

    /// Elasticsearch answered with an error status.
    Api(ErrorInfo),

    /// HTTP transport errors.
    Transport(reqwest::Error),

    /// I/O errors.
    Io(io::Error),

    /// JSON encoding or decoding errors.
    Json(serde_json::Error),

    /// Operation interrupted by the operator.
    Cancelled,

    /// Generic error with a free-form message.
    Generic(String),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Invalid cluster URL.
    InvalidUrl(String),

    /// Cloud ID could not be decoded.
    InvalidCloudId(String),

    /// Failed to build the HTTP client.
    ClientBuildFailed(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// Generic configuration error.
    Generic(String),
}

/// Export-specific errors.
#[derive(Debug)]
pub enum ExportError {
    /// No model snapshot matched the requested boundary.
    SnapshotNotFound(String),

    /// The job id did not resolve to a job.
    JobNotFound(String),

    /// The job configuration lacks a field the export depends on.
    InvalidJobConfig(String),

    /// A date argument could not be parsed.
    InvalidDate(String),

    /// A search response could not be interpreted.
    InvalidResponse(String),

    /// An output file could not be produced.
    Output(String),
}

/// Import-specific errors.
#[derive(Debug)]
pub enum ImportError {
    /// A required archive member is missing.
    MissingFile(String),

    /// An intermediate file could not be interpreted.
    MalformedFile { path: String, reason: String },

    /// The job configuration in the archive is unusable.
    InvalidJobConfig(String),

    /// The snapshot statistics document is unusable.
    InvalidSnapshotStats(String),
}

/// Archive-specific errors.
#[derive(Debug)]
pub enum ArchiveError {
    /// Archive file not found.
    NotFound(String),

    /// A member would be extracted outside the target directory.
    PathTraversal(String),

    /// The archive contained no members.
    Empty(String),
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for JobStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStateError::Connection(e) => write!(f, "Connection error: {e}"),
            JobStateError::Config(e) => write!(f, "Configuration error: {e}"),
            JobStateError::Export(e) => write!(f, "Export error: {e}"),
            JobStateError::Import(e) => write!(f, "Import error: {e}"),
            JobStateError::Archive(e) => write!(f, "Archive error: {e}"),
            JobStateError::Api(info) => format_api_error(f, info),
            JobStateError::Transport(e) => write!(f, "Transport error: {e}"),
            JobStateError::Io(e) => write!(f, "I/O error: {e}"),
            JobStateError::Json(e) => write!(f, "JSON error: {e}"),
            JobStateError::Cancelled => write!(f, "Operation cancelled"),
            JobStateError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::InvalidUrl(url) => write!(f, "Invalid cluster URL: {url}"),
            ConnectionError::InvalidCloudId(msg) => write!(f, "Invalid cloud ID: {msg}"),
            ConnectionError::ClientBuildFailed(msg) => {
                write!(f, "Failed to build HTTP client: {msg}")
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::SnapshotNotFound(job) => {
                write!(f, "No model snapshot found for job {job}")
            }
            ExportError::JobNotFound(job) => write!(f, "No job configuration found for {job}"),
            ExportError::InvalidJobConfig(msg) => write!(f, "Invalid job configuration: {msg}"),
            ExportError::InvalidDate(value) => write!(
                f,
                "Invalid date format: '{value}'. Expected format: YYYY-MM-DDTHH:MM:SS"
            ),
            ExportError::InvalidResponse(msg) => write!(f, "Unexpected response: {msg}"),
            ExportError::Output(msg) => write!(f, "Output error: {msg}"),
        }
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::MissingFile(name) => write!(f, "{name} not found in the archive"),
            ImportError::MalformedFile { path, reason } => {
                write!(f, "Malformed file {path}: {reason}")
            }
            ImportError::InvalidJobConfig(msg) => write!(f, "Invalid job configuration: {msg}"),
            ImportError::InvalidSnapshotStats(msg) => {
                write!(f, "Invalid snapshot statistics: {msg}")
            }
        }
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::NotFound(path) => write!(f, "Archive file {path} does not exist"),
            ArchiveError::PathTraversal(member) => {
                write!(f, "Attempted path traversal in tar file: {member}")
            }
            ArchiveError::Empty(path) => write!(f, "No files extracted from {path}"),
        }
    }
}

impl std::error::Error for JobStateError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ExportError {}
impl std::error::Error for ImportError {}
impl std::error::Error for ArchiveError {}

/* ========================= Conversions to JobStateError ========================= */

impl From<io::Error> for JobStateError {
    fn from(err: io::Error) -> Self {
        JobStateError::Io(err)
    }
}

impl From<reqwest::Error> for JobStateError {
    fn from(err: reqwest::Error) -> Self {
        JobStateError::Transport(err)
    }
}

impl From<serde_json::Error> for JobStateError {
    fn from(err: serde_json::Error) -> Self {
        JobStateError::Json(err)
    }
}

impl From<ErrorInfo> for JobStateError {
    fn from(info: ErrorInfo) -> Self {
        JobStateError::Api(info)
    }
}

impl From<ConnectionError> for JobStateError {
    fn from(err: ConnectionError) -> Self {
        JobStateError::Connection(err)
    }
}

impl From<ConfigError> for JobStateError {
    fn from(err: ConfigError) -> Self {
        JobStateError::Config(err)
    }
}

impl From<ExportError> for JobStateError {
    fn from(err: ExportError) -> Self {
        JobStateError::Export(err)
    }
}

impl From<ImportError> for JobStateError {
    fn from(err: ImportError) -> Self {
        JobStateError::Import(err)
    }
}

impl From<ArchiveError> for JobStateError {
    fn from(err: ArchiveError) -> Self {
        JobStateError::Archive(err)
    }
}

impl From<String> for JobStateError {
    fn from(msg: String) -> Self {
        JobStateError::Generic(msg)
    }
}

impl From<&str> for JobStateError {
    fn from(msg: &str) -> Self {
        JobStateError::Generic(msg.to_owned())
    }
}

impl JobStateError {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            JobStateError::Api(info) => info.status,
            JobStateError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the cluster reported the target as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
