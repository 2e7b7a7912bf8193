//! Output writers for export operations
//!
//! This module provides a unified interface for writing search hits to the
//! NDJSON files that end up in the archive.

use async_trait::async_trait;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::BufWriter;

use crate::backend::Hit;
use crate::error::{ExportError, Result};

pub mod bulk;
pub mod lines;

pub use bulk::BulkPairWriter;
pub use lines::SourceLinesWriter;

/// Trait for writing hits to output files
#[async_trait]
pub trait FormatWriter: Send + Sync {
    /// Write a batch of hits
    ///
    /// # Arguments
    /// * `hits` - Hits to write, in order
    ///
    /// # Returns
    /// * `Result<usize>` - Number of hits written
    async fn write_batch(&mut self, hits: &[Hit]) -> Result<usize>;

    /// Flush and close the open file
    ///
    /// Safe to call more than once.
    async fn finalize(&mut self) -> Result<()>;

    /// Files created so far, in creation order
    fn files(&self) -> &[PathBuf];

    /// Total size in bytes of the created files
    async fn file_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.files() {
            total += tokio::fs::metadata(path).await?.len();
        }
        Ok(total)
    }
}

/// Helper function to create a buffered file writer
///
/// # Arguments
/// * `path` - File path to create
///
/// # Returns
/// * `Result<BufWriter<File>>` - Buffered writer or error
pub(crate) async fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).await?;
    Ok(BufWriter::with_capacity(1024 * 1024, file))
}

/// Helper function to validate the output directory
pub(crate) fn validate_dir(dir: &Path) -> Result<()> {
    if !dir.as_os_str().is_empty() && !dir.is_dir() {
        return Err(ExportError::Output(format!(
            "Directory does not exist: {}",
            dir.display()
        ))
        .into());
    }
    Ok(())
}

/// Collapse a raw JSON document onto one line
///
/// JSON strings cannot hold literal line breaks, so any line break in the
/// text is insignificant whitespace and may be replaced by a space. Every
/// other byte is kept, so a document stored with line breaks comes back
/// with spaces in their place; all single-line documents round trip
/// unchanged.
pub(crate) fn single_line(raw: &str) -> Cow<'_, str> {
    if raw.contains(['\n', '\r']) {
        Cow::Owned(raw.replace(['\n', '\r'], " "))
    } else {
        Cow::Borrowed(raw)
    }
}
