//! Bulk pair writer
//!
//! Each hit becomes two lines: a bulk `index` action naming the source index
//! and id, followed by the raw `_source`. Files can be capped at a fixed
//! number of hits, in which case they are numbered `<base>_<n>.ndjson`
//! starting at 1.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::backend::Hit;
use crate::error::{ExportError, Result};

use super::{FormatWriter, create_writer, single_line, validate_dir};

/// Writer for the two-line bulk format
pub struct BulkPairWriter {
    dir: PathBuf,
    base: String,
    /// Maximum hits per file, `None` for a single file
    cap: Option<usize>,
    writer: Option<BufWriter<File>>,
    in_current: usize,
    written: u64,
    files: Vec<PathBuf>,
}

impl BulkPairWriter {
    /// Create a writer that rolls over every `cap` hits
    ///
    /// The first file is created immediately, so even an empty export
    /// produces `<base>_1.ndjson`.
    ///
    /// # Arguments
    /// * `dir` - Output directory
    /// * `base` - File name prefix
    /// * `cap` - Maximum hits per file
    pub async fn chunked(dir: &Path, base: &str, cap: usize) -> Result<Self> {
        Self::create(dir, base, Some(cap.max(1))).await
    }

    /// Create a writer producing exactly one file, `<base>.ndjson`
    pub async fn single(dir: &Path, base: &str) -> Result<Self> {
        Self::create(dir, base, None).await
    }

    async fn create(dir: &Path, base: &str, cap: Option<usize>) -> Result<Self> {
        validate_dir(dir)?;
        let mut writer = Self {
            dir: dir.to_path_buf(),
            base: base.to_string(),
            cap,
            writer: None,
            in_current: 0,
            written: 0,
            files: Vec::new(),
        };
        writer.open_next().await?;
        Ok(writer)
    }

    fn next_path(&self) -> PathBuf {
        match self.cap {
            Some(_) => self
                .dir
                .join(format!("{}_{}.ndjson", self.base, self.files.len() + 1)),
            None => self.dir.join(format!("{}.ndjson", self.base)),
        }
    }

    async fn open_next(&mut self) -> Result<()> {
        self.close_current().await?;
        let path = self.next_path();
        debug!("Writing bulk pairs to {}", path.display());
        self.writer = Some(create_writer(&path).await?);
        self.files.push(path);
        self.in_current = 0;
        Ok(())
    }

    async fn close_current(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }

    /// Number of hits written across all files
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl FormatWriter for BulkPairWriter {
    async fn write_batch(&mut self, hits: &[Hit]) -> Result<usize> {
        for hit in hits {
            if self.cap.is_some_and(|cap| self.in_current >= cap) {
                self.open_next().await?;
            }

            let action = json!({ "index": { "_index": hit.index, "_id": hit.id } });
            let mut record = serde_json::to_string(&action)?;
            record.push('\n');
            record.push_str(&single_line(hit.source.get()));
            record.push('\n');

            let Some(writer) = self.writer.as_mut() else {
                return Err(ExportError::Output(format!("{} already finalized", self.base)).into());
            };
            writer.write_all(record.as_bytes()).await?;
            self.in_current += 1;
            self.written += 1;
        }
        Ok(hits.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.close_current().await?;
            info!(
                "Wrote {} docs across {} files",
                self.written,
                self.files.len()
            );
        }
        Ok(())
    }

    fn files(&self) -> &[PathBuf] {
        &self.files
    }
}
