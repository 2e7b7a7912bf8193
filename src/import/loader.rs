//! Reading intermediate files back and bulk loading them
//!
//! The bulk pair format alternates an action line and a document line. Only
//! the action's `_id` is kept; the destination index is chosen by the caller.
//! Reading stops at the first blank line or at a trailing action without its
//! document.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use serde_json::value::RawValue;
use tracing::{debug, info, warn};

use crate::backend::{BulkRecord, BulkSummary, SearchBackend};
use crate::error::{ImportError, Result};
use crate::export::ProgressTracker;

/// Read a bulk pair file
///
/// # Arguments
/// * `path` - File written by the export's bulk pair writer
///
/// # Returns
/// * `Result<Vec<BulkRecord>>` - Records in file order
pub fn read_bulk_pairs(path: &Path) -> Result<Vec<BulkRecord>> {
    let text = read_file(path)?;
    let mut lines = text.lines().enumerate();
    let mut records = Vec::new();

    while let Some((number, action_line)) = lines.next() {
        let action_line = action_line.trim();
        if action_line.is_empty() {
            debug!("Blank line {} in {}, stopping", number + 1, path.display());
            break;
        }
        let document_line = match lines.next() {
            Some((_, line)) if !line.trim().is_empty() => line.trim(),
            _ => {
                warn!(
                    "Action on line {} of {} has no document, stopping",
                    number + 1,
                    path.display()
                );
                break;
            }
        };

        let action: Value = serde_json::from_str(action_line)
            .map_err(|e| malformed(path, format!("line {}: {e}", number + 1)))?;
        let id = action
            .pointer("/index/_id")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(path, format!("line {}: action without index._id", number + 1)))?;
        let source = RawValue::from_string(document_line.to_string())
            .map_err(|e| malformed(path, format!("line {}: {e}", number + 2)))?;

        records.push(BulkRecord {
            id: Some(id.to_string()),
            source,
        });
    }

    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Read a file holding one document per line
///
/// Blank lines are skipped. The cluster assigns ids on re-import.
pub fn read_source_lines(path: &Path) -> Result<Vec<BulkRecord>> {
    let text = read_file(path)?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            RawValue::from_string(line.trim().to_string())
                .map(|source| BulkRecord { id: None, source })
                .map_err(|e| malformed(path, format!("line {}: {e}", number + 1)))
        })
        .collect()
}

fn read_file(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(ImportError::MissingFile(path.display().to_string()).into());
    }
    Ok(std::fs::read_to_string(path)?)
}

fn malformed(path: &Path, reason: String) -> crate::error::JobStateError {
    ImportError::MalformedFile {
        path: path.display().to_string(),
        reason,
    }
    .into()
}

/// Submits records in fixed-size `_bulk` requests
pub struct BulkLoader {
    backend: Arc<dyn SearchBackend>,
    chunk_size: usize,
    show_progress: bool,
}

impl BulkLoader {
    /// Create a loader
    ///
    /// # Arguments
    /// * `backend` - Cluster access
    /// * `chunk_size` - Actions per request
    /// * `show_progress` - Draw a progress bar
    pub fn new(backend: Arc<dyn SearchBackend>, chunk_size: usize, show_progress: bool) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
            show_progress,
        }
    }

    /// Index records into `destination`
    ///
    /// Rejected items are counted, not retried. A failed request aborts the
    /// load; requests already sent stay applied.
    pub async fn load(&self, destination: &str, records: &[BulkRecord]) -> Result<BulkSummary> {
        let tracker = ProgressTracker::new(
            &format!("Loading {destination}"),
            Some(records.len() as u64),
            self.show_progress,
        );
        let mut summary = BulkSummary::default();

        for chunk in records.chunks(self.chunk_size) {
            let result = self.backend.bulk_index(destination, chunk).await;
            let chunk_summary = match result {
                Ok(s) => s,
                Err(e) => {
                    tracker.finish();
                    return Err(e);
                }
            };
            summary.merge(chunk_summary);
            tracker.update(summary.accepted + summary.failed);
        }
        tracker.finish();

        if summary.is_clean() {
            info!("{} documents uploaded to index {}", summary.accepted, destination);
        } else {
            warn!(
                "{} documents uploaded to index {}, {} rejected",
                summary.accepted, destination, summary.failed
            );
            for error in &summary.errors {
                warn!("  {}", error);
            }
        }
        Ok(summary)
    }

    /// Read a bulk pair file and index its records into `destination`
    pub async fn load_pairs_file(&self, destination: &str, path: &Path) -> Result<BulkSummary> {
        info!("Importing {} into {}", path.display(), destination);
        let records = read_bulk_pairs(path)?;
        self.load(destination, &records).await
    }
}
