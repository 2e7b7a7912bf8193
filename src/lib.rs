//! Anomaly detection job state transfer
//!
//! This library exports the state of an Elasticsearch anomaly detection job
//! (configuration, model snapshot, annotations and optionally datafeed
//! input) into an archive, and recreates the job from such an archive.
//!
//! # Modules
//!
//! - `archive`: gzip tar packing and safe extraction
//! - `backend`: Elasticsearch REST access behind the `SearchBackend` trait
//! - `cli`: Command-line interface and prompts
//! - `config`: Configuration management
//! - `connection`: Cluster URL resolution and client construction
//! - `error`: Error types and handling
//! - `export`: Field resolution, PIT scanning and NDJSON writers
//! - `import`: Bulk loading and the snapshot revert sequence
//! - `job`: Job configuration accessors
//! - `utils`: Utility functions and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ad_job_state::{Config, ConnectionManager};
//! use ad_job_state::export::{ExportOptions, ExportService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let manager = ConnectionManager::new(config.connection, Some("changeme".to_string()));
//!     let client = manager.connect().await?;
//!
//!     let service = ExportService::new(Arc::new(client), config.export);
//!     let options = ExportOptions {
//!         job_id: "web-latency".to_string(),
//!         ..Default::default()
//!     };
//!     println!("{}", service.run(&options).await?.display());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backend;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod import;
pub mod job;
pub mod utils;

// Re-export commonly used types
pub use backend::{EsClient, SearchBackend};
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{JobStateError, Result};
pub use export::{ExportOptions, ExportService};
pub use import::{ImportOptions, ImportService};
pub use job::JobConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
