//! Source lines writer
//!
//! Writes one `_source` document per line, without bulk actions. Used for
//! annotations and notifications.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::backend::Hit;
use crate::error::{ExportError, Result};

use super::{FormatWriter, create_writer, single_line, validate_dir};

/// Writer for one-document-per-line NDJSON
pub struct SourceLinesWriter {
    writer: Option<BufWriter<File>>,
    files: Vec<PathBuf>,
    written: usize,
}

impl SourceLinesWriter {
    /// Create a new writer
    ///
    /// # Arguments
    /// * `path` - Output file path
    ///
    /// # Returns
    /// * `Result<Self>` - New writer instance or error
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            validate_dir(parent)?;
        }
        let writer = create_writer(path).await?;
        debug!("Created source lines writer for: {}", path.display());

        Ok(Self {
            writer: Some(writer),
            files: vec![path.to_path_buf()],
            written: 0,
        })
    }
}

#[async_trait]
impl FormatWriter for SourceLinesWriter {
    async fn write_batch(&mut self, hits: &[Hit]) -> Result<usize> {
        let Some(writer) = self.writer.as_mut() else {
            let path = self.files.first().map(|p| p.display().to_string()).unwrap_or_default();
            return Err(ExportError::Output(format!("{path} already finalized")).into());
        };
        for hit in hits {
            writer.write_all(single_line(hit.source.get()).as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        self.written += hits.len();
        Ok(hits.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
            debug!("Finalized {} lines", self.written);
        }
        Ok(())
    }

    fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;

    #[tokio::test]
    async fn test_writes_sources_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_annotations.ndjson");
        let mut writer = SourceLinesWriter::new(&path).await.unwrap();
        let hits = vec![
            Hit {
                index: ".ml-annotations-6".to_string(),
                id: "a".to_string(),
                source: RawValue::from_string(r#"{"annotation":"restart"}"#.to_string()).unwrap(),
                sort: None,
            },
            Hit {
                index: ".ml-annotations-6".to_string(),
                id: "b".to_string(),
                source: RawValue::from_string(r#"{"annotation":"deploy"}"#.to_string()).unwrap(),
                sort: None,
            },
        ];
        assert_eq!(writer.write_batch(&hits).await.unwrap(), 2);
        writer.finalize().await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "{\"annotation\":\"restart\"}\n{\"annotation\":\"deploy\"}\n");
        assert_eq!(writer.files(), &[path]);
    }

    #[tokio::test]
    async fn test_write_after_finalize_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_notifications.ndjson");
        let mut writer = SourceLinesWriter::new(&path).await.unwrap();
        writer.finalize().await.unwrap();
        writer.finalize().await.unwrap();

        let hit = Hit {
            index: ".ml-notifications-000002".to_string(),
            id: "n".to_string(),
            source: RawValue::from_string(r#"{"message":"opened"}"#.to_string()).unwrap(),
            sort: None,
        };
        let err = writer.write_batch(&[hit]).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::JobStateError::Export(ExportError::Output(_))
        ));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");
    }
}
