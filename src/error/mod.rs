//! Error handling module for job state transfers.
//!
//! This module provides error handling for the export and import pipelines with:
//! - Structured error information extracted from Elasticsearch error bodies
//! - Consistent JSON error formatting for logging
//! - Application-specific error types
//!
//! # Example
//!
//! ```rust,no_run
//! use ad_job_state::error::{JobStateError, Result};
//! use ad_job_state::error::api::ErrorInfo;
//!
//! fn example_operation() -> Result<()> {
//!     Ok(())
//! }
//!
//! fn handle_error(status: u16, body: &str) {
//!     let err = JobStateError::from(ErrorInfo::from_response(status, body));
//!     eprintln!("{err}");
//! }
//! ```

pub mod api;
pub mod kinds;

// Re-export commonly used types
pub use api::{ErrorInfo, RootCause};
pub use kinds::{
    ArchiveError, ConfigError, ConnectionError, ExportError, ImportError, JobStateError, Result,
};
