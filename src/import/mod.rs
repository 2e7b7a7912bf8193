//! Import of exported job state
//!
//! [`loader`] reads the intermediate NDJSON files back and submits them
//! through `_bulk`; [`service`] sequences the remote writes and the final
//! snapshot revert.

pub mod loader;
pub mod service;

pub use loader::{BulkLoader, read_bulk_pairs, read_source_lines};
pub use service::{ArchiveContents, ImportOptions, ImportReport, ImportService};
