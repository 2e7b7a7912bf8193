//! Export coordinator for orchestrating scans
//!
//! This module brings together a streaming query, progress tracking and an
//! output writer. Whatever happens during the scan, the writer is finalized
//! and the query is closed before [`ExportCoordinator::execute`] returns.

use std::path::PathBuf;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobStateError, Result};

use super::progress::ProgressTracker;
use super::scanner::StreamingQuery;
use super::writers::FormatWriter;

/// Result of an export operation
#[derive(Debug)]
pub struct ExportResult {
    /// Number of documents exported
    pub documents_exported: u64,
    /// Files written, in order
    pub files: Vec<PathBuf>,
    /// Combined size of the files in bytes
    pub file_size_bytes: u64,
    /// Time taken for export
    pub elapsed_ms: u64,
}

/// Coordinator for one scan-to-file export
pub struct ExportCoordinator {
    /// Streaming query for fetching hits
    query: Box<dyn StreamingQuery>,
    /// Progress tracker for user feedback
    tracker: ProgressTracker,
    /// Writer for output
    writer: Box<dyn FormatWriter>,
    /// Cancellation token for aborting export
    cancel_token: Option<CancellationToken>,
}

impl ExportCoordinator {
    /// Create a new export coordinator
    pub fn new(
        query: Box<dyn StreamingQuery>,
        tracker: ProgressTracker,
        writer: Box<dyn FormatWriter>,
    ) -> Self {
        Self {
            query,
            tracker,
            writer,
            cancel_token: None,
        }
    }

    /// Set cancellation token for this export operation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Files the writer has created so far
    pub fn files(&self) -> &[PathBuf] {
        self.writer.files()
    }

    /// Execute the export operation
    ///
    /// Streams pages from the query into the writer until the query is
    /// exhausted, a step fails, or the token is cancelled. In every case the
    /// writer is finalized and the query closed afterwards; the first error
    /// encountered is the one returned.
    ///
    /// # Returns
    /// * `Result<ExportResult>` - Export statistics or error
    pub async fn execute(&mut self) -> Result<ExportResult> {
        let start_time = Instant::now();
        info!("Starting export operation");

        let pumped = self.pump().await;

        debug!("Finalizing output");
        let finalized = self.writer.finalize().await;
        let closed = self.query.close().await;
        self.tracker.finish();

        let exported = match pumped {
            Ok(exported) => exported,
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!("Failed to release scan after error: {}", close_err);
                }
                return Err(e);
            }
        };
        finalized?;
        closed?;

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        let file_size_bytes = self.writer.file_size().await?;

        info!(
            "Export completed: {} documents, {} bytes, {} ms",
            exported, file_size_bytes, elapsed_ms
        );

        Ok(ExportResult {
            documents_exported: exported,
            files: self.writer.files().to_vec(),
            file_size_bytes,
            elapsed_ms,
        })
    }

    async fn pump(&mut self) -> Result<u64> {
        let mut exported = 0u64;
        let mut batch_count = 0u32;

        loop {
            if self
                .cancel_token
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                info!("Export operation cancelled after {} documents", exported);
                return Err(JobStateError::Cancelled);
            }

            debug!("Fetching batch #{}", batch_count + 1);
            let Some(hits) = self.query.next_batch().await? else {
                debug!("No more documents available");
                return Ok(exported);
            };

            self.writer.write_batch(&hits).await?;
            exported += hits.len() as u64;
            self.tracker.update(exported);
            batch_count += 1;

            if batch_count % 10 == 0 {
                info!(
                    "Progress: {} documents exported ({} batches)",
                    exported, batch_count
                );
            }
        }
    }
}
