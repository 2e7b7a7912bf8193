//! Export of anomaly detection job state
//!
//! # Architecture
//!
//! Large result sets are moved by three components:
//!
//! 1. **StreamingQuery**: pages through hits, implemented by [`PitScanner`]
//! 2. **ProgressTracker**: terminal feedback while pages arrive
//! 3. **FormatWriter**: turns hits into the NDJSON files of the archive
//!
//! The **ExportCoordinator** drives one query into one writer and guarantees
//! both are closed on every exit path. [`ExportService`] sequences the
//! individual export steps and packs the results.
//!
//! # Example
//!
//! ```no_run
//! # async fn run(client: ad_job_state::backend::EsClient) -> ad_job_state::error::Result<()> {
//! use std::sync::Arc;
//! use ad_job_state::config::ExportConfig;
//! use ad_job_state::export::{ExportOptions, ExportService};
//!
//! let service = ExportService::new(Arc::new(client), ExportConfig::default());
//! let options = ExportOptions {
//!     job_id: "web-latency".to_string(),
//!     ..Default::default()
//! };
//! let archive = service.run(&options).await?;
//! println!("{}", archive.display());
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod fields;
pub mod progress;
pub mod scanner;
pub mod service;
pub mod writers;

pub use coordinator::{ExportCoordinator, ExportResult};
pub use fields::{FilterNode, extract_field_names, resolve_source_fields};
pub use progress::ProgressTracker;
pub use scanner::{PitScanner, ScanRequest, StreamingQuery};
pub use service::{ExportOptions, ExportService, SnapshotRef};
pub use writers::{BulkPairWriter, FormatWriter, SourceLinesWriter};
