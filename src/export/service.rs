//! Export of one job's state into an archive
//!
//! [`ExportService::run`] performs the steps in a fixed order, each awaited
//! before the next starts:
//!
//! 1. Resolve the latest snapshot at or before the boundary (required)
//! 2. Save the snapshot statistics document
//! 3. Save the job configuration (required)
//! 4. Save annotations and notifications
//! 5. Save input documents, when requested
//! 6. Save the snapshot state documents
//! 7. Pack everything into `<job>_state.tar.gz` and remove the loose files
//!
//! Steps other than the two required ones log their failure and leave their
//! file out of the archive. A failing step removes whatever it already
//! wrote, so nothing is left next to the archive.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::backend::{SearchBackend, indices};
use crate::config::ExportConfig;
use crate::error::{ExportError, JobStateError, Result};
use crate::job::JobConfig;
use crate::utils::fs::{ensure_dir_exists, remove_files};
use crate::utils::string::sanitize_filename;
use crate::utils::time::{from_epoch_millis, to_iso};

use super::coordinator::ExportCoordinator;
use super::fields::resolve_source_fields;
use super::progress::ProgressTracker;
use super::scanner::{PitScanner, ScanRequest};
use super::writers::{BulkPairWriter, FormatWriter, SourceLinesWriter};

/// Prefix of the snapshot statistics member
pub const SNAPSHOT_STATS_PREFIX: &str = "ml-anomalies-snapshot_doc_";

/// What to export
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Job to export
    pub job_id: String,
    /// Use the latest snapshot at or before this instant
    pub snapshot_before: Option<DateTime<Utc>>,
    /// Lower bound for annotations and notifications, job creation by default
    pub annotations_after: Option<DateTime<Utc>>,
    /// Lower bound for input documents
    pub inputs_after: Option<DateTime<Utc>>,
    /// Upper bound for input documents
    pub inputs_before: Option<DateTime<Utc>>,
    /// Export the datafeed's input documents too
    pub include_inputs: bool,
}

/// Snapshot selected for export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub snapshot_id: String,
    pub doc_count: u64,
}

/// Export pipeline bound to one cluster
pub struct ExportService {
    backend: Arc<dyn SearchBackend>,
    config: ExportConfig,
    show_progress: bool,
    cancel_token: CancellationToken,
}

impl ExportService {
    /// Create a new export service
    ///
    /// # Arguments
    /// * `backend` - Cluster access
    /// * `config` - Export settings
    pub fn new(backend: Arc<dyn SearchBackend>, config: ExportConfig) -> Self {
        Self {
            backend,
            config,
            show_progress: false,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Enable progress bars
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Set cancellation token for scans
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Run the whole export
    ///
    /// # Returns
    /// * `Result<PathBuf>` - Path of the created archive
    pub async fn run(&self, options: &ExportOptions) -> Result<PathBuf> {
        let job_id = options.job_id.as_str();
        ensure_dir_exists(self.output_dir())?;

        let snapshot = self
            .get_snapshot_info(job_id, options.snapshot_before.as_ref())
            .await?;

        let mut files: Vec<PathBuf> = Vec::new();
        let result = self.collect(options, &snapshot, &mut files).await;

        let archived = match result {
            Ok(()) => self.archive(job_id, &files).await,
            Err(e) => Err(e),
        };
        info!("Removing temporary files");
        remove_files(&files);
        archived
    }

    async fn collect(
        &self,
        options: &ExportOptions,
        snapshot: &SnapshotRef,
        files: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let job_id = options.job_id.as_str();

        files.extend(optional(
            "save snapshot stats",
            self.save_snapshot_stats(job_id, &snapshot.snapshot_id).await,
        )?);

        let (config_file, job) = self.save_job_config(job_id).await?;
        files.push(config_file);

        let annotations_after = match options.annotations_after {
            Some(after) => after,
            None => {
                let created = job.create_time().and_then(from_epoch_millis).ok_or_else(|| {
                    ExportError::InvalidJobConfig(
                        "job creation date not found in job configuration".to_string(),
                    )
                })?;
                info!("Using job creation date {} as annotations lower bound", to_iso(&created));
                created
            }
        };
        let before = options.snapshot_before.as_ref();

        files.extend(optional(
            "save annotations",
            self.save_annotations(job_id, before, &annotations_after).await,
        )?);
        files.extend(optional(
            "save notifications",
            self.save_notifications(job_id, before, &annotations_after).await,
        )?);

        if options.include_inputs {
            let inputs = optional(
                "save inputs",
                self.save_inputs(
                    &job,
                    options.inputs_before.as_ref(),
                    options.inputs_after.as_ref(),
                )
                .await,
            )?;
            files.extend(inputs.into_iter().flatten());
        } else {
            info!("Input data will not be included in the archive");
        }

        files.extend(optional(
            "save snapshots",
            self.save_snapshots(job_id, snapshot).await,
        )?);
        Ok(())
    }

    async fn archive(&self, job_id: &str, files: &[PathBuf]) -> Result<PathBuf> {
        let archive_path = self
            .output_dir()
            .join(format!("{}_state.tar.gz", sanitize_filename(job_id)));
        let members = files.to_vec();
        let target = archive_path.clone();
        tokio::task::spawn_blocking(move || archive::create_archive(&target, &members))
            .await
            .map_err(|e| JobStateError::Generic(format!("archive task failed: {e}")))??;
        Ok(archive_path)
    }

    /// Resolve the latest snapshot ending at or before `before`
    ///
    /// # Returns
    /// * `Result<SnapshotRef>` - Snapshot id and document count, or an error
    ///   when the job has no matching snapshot
    pub async fn get_snapshot_info(
        &self,
        job_id: &str,
        before: Option<&DateTime<Utc>>,
    ) -> Result<SnapshotRef> {
        let end = before.map(to_iso);
        let snapshots = self
            .backend
            .get_model_snapshots(job_id, end.as_deref(), true)
            .await?;

        let latest = snapshots
            .into_iter()
            .next()
            .ok_or_else(|| ExportError::SnapshotNotFound(job_id.to_string()))?;
        info!("Latest snapshot ID for job {}: {}", job_id, latest.snapshot_id);

        Ok(SnapshotRef {
            snapshot_id: latest.snapshot_id,
            doc_count: latest.snapshot_doc_count,
        })
    }

    /// Save the model snapshot document from the shared results index
    ///
    /// # Returns
    /// * `Result<PathBuf>` - `ml-anomalies-snapshot_doc_<id>.json`
    pub async fn save_snapshot_stats(&self, job_id: &str, snapshot_id: &str) -> Result<PathBuf> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "job_id": job_id } },
                        { "term": { "snapshot_id": snapshot_id } }
                    ]
                }
            }
        });
        let hits = self
            .backend
            .search(Some(indices::ANOMALIES_SHARED), &body)
            .await?
            .into_hits();

        let hit = hits.into_iter().next().ok_or_else(|| {
            ExportError::InvalidResponse(format!(
                "no snapshot document found for job {job_id} and snapshot {snapshot_id}"
            ))
        })?;

        let path = self.output_dir().join(format!(
            "{}{}.json",
            SNAPSHOT_STATS_PREFIX,
            sanitize_filename(&hit.id)
        ));
        let document: Value = serde_json::from_str(hit.source.get())?;
        write_pretty_json(&path, &document)?;
        info!("Snapshot document stored in {}", path.display());
        Ok(path)
    }

    /// Save the job configuration
    ///
    /// # Returns
    /// * `Result<(PathBuf, JobConfig)>` - `<job>_config.json` and the
    ///   configuration, or an error when the job does not exist
    pub async fn save_job_config(&self, job_id: &str) -> Result<(PathBuf, JobConfig)> {
        let raw = self
            .backend
            .get_job(job_id)
            .await?
            .ok_or_else(|| ExportError::JobNotFound(job_id.to_string()))?;

        let path = self
            .output_dir()
            .join(format!("{}_config.json", sanitize_filename(job_id)));
        write_pretty_json(&path, &raw)?;
        info!("Job configuration for job {} stored in {}", job_id, path.display());
        Ok((path, JobConfig::new(raw)))
    }

    /// Save annotations created within the range
    pub async fn save_annotations(
        &self,
        job_id: &str,
        before: Option<&DateTime<Utc>>,
        after: &DateTime<Utc>,
    ) -> Result<PathBuf> {
        let path = self
            .output_dir()
            .join(format!("{}_annotations.ndjson", sanitize_filename(job_id)));
        self.save_job_sources(indices::ANNOTATIONS_READ, "create_time", job_id, before, after, &path)
            .await?;
        info!("Annotations for job {} stored in {}", job_id, path.display());
        Ok(path)
    }

    /// Save job notifications within the range
    pub async fn save_notifications(
        &self,
        job_id: &str,
        before: Option<&DateTime<Utc>>,
        after: &DateTime<Utc>,
    ) -> Result<PathBuf> {
        let path = self
            .output_dir()
            .join(format!("{}_notifications.ndjson", sanitize_filename(job_id)));
        self.save_job_sources(indices::NOTIFICATIONS, "timestamp", job_id, before, after, &path)
            .await?;
        info!("Notifications for job {} stored in {}", job_id, path.display());
        Ok(path)
    }

    /// One search for a job's documents in an epoch-millis time range
    async fn save_job_sources(
        &self,
        index: &str,
        time_field: &str,
        job_id: &str,
        before: Option<&DateTime<Utc>>,
        after: &DateTime<Utc>,
        path: &Path,
    ) -> Result<()> {
        let mut range = serde_json::Map::new();
        if let Some(before) = before {
            range.insert("lte".to_string(), json!(before.timestamp_millis()));
        }
        range.insert("gte".to_string(), json!(after.timestamp_millis()));

        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "job_id": job_id } },
                        { "range": { time_field: range } }
                    ]
                }
            },
            "size": self.config.search_size,
        });
        debug!("Searching {} for job {} with query: {}", index, job_id, body);

        let hits = self.backend.search(Some(index), &body).await?.into_hits();
        let mut writer = SourceLinesWriter::new(path).await?;
        let written = writer.write_batch(&hits).await;
        let finalized = writer.finalize().await;
        if let Err(e) = written.and(finalized) {
            remove_files(writer.files());
            return Err(e);
        }
        Ok(())
    }

    /// Save the datafeed's input documents in chunked bulk files
    ///
    /// # Returns
    /// * `Result<Vec<PathBuf>>` - `<job>_input_<n>.ndjson` files in order
    pub async fn save_inputs(
        &self,
        job: &JobConfig,
        before: Option<&DateTime<Utc>>,
        after: Option<&DateTime<Utc>>,
    ) -> Result<Vec<PathBuf>> {
        let job_id = job
            .job_id()
            .ok_or_else(|| ExportError::InvalidJobConfig("job_id is missing".to_string()))?;
        let query = job.datafeed_query();
        let source_fields = resolve_source_fields(job, &query)?;
        let time_field = job.time_field()?;
        debug!("Input fields: {:?}", source_fields);

        let request = ScanRequest::time_ranged(
            job.datafeed_indices()?,
            query,
            &time_field,
            after.map(to_iso),
            before.map(to_iso),
        )
        .with_source(source_fields)
        .with_paging(self.config.page_size, &self.config.pit_keep_alive);

        let base = format!("{}_input", sanitize_filename(job_id));
        let writer =
            BulkPairWriter::chunked(self.output_dir(), &base, self.config.max_docs_per_file).await?;
        let tracker = ProgressTracker::new("Saving inputs", None, self.show_progress);

        let result = self.scan(request, tracker, Box::new(writer)).await?;
        Ok(result.files)
    }

    /// Save the compressed model state documents of a snapshot
    ///
    /// A snapshot without state documents yields an empty file without
    /// searching.
    ///
    /// # Returns
    /// * `Result<PathBuf>` - `<job>_snapshot_docs.ndjson`
    pub async fn save_snapshots(&self, job_id: &str, snapshot: &SnapshotRef) -> Result<PathBuf> {
        let base = format!("{}_snapshot_docs", sanitize_filename(job_id));
        let mut writer = BulkPairWriter::single(self.output_dir(), &base).await?;
        info!("Writing the compressed model state for snapshot {}", snapshot.snapshot_id);

        if snapshot.doc_count == 0 {
            warn!("Snapshot {} has no state documents", snapshot.snapshot_id);
            writer.finalize().await?;
            return first_file(&writer);
        }

        let ids = state_document_ids(job_id, &snapshot.snapshot_id, snapshot.doc_count);
        let request = ScanRequest::by_ids(vec![indices::STATE_READ.to_string()], &ids)
            .with_paging(self.config.page_size, &self.config.pit_keep_alive);
        let tracker =
            ProgressTracker::new("Saving snapshots", Some(snapshot.doc_count), self.show_progress);

        let result = self.scan(request, tracker, Box::new(writer)).await?;
        if result.documents_exported != snapshot.doc_count {
            warn!(
                "Expected {} snapshot documents, found {}",
                snapshot.doc_count, result.documents_exported
            );
        }
        info!(
            "{} snapshot documents for job {} stored",
            result.documents_exported, job_id
        );
        result
            .files
            .into_iter()
            .next()
            .ok_or_else(|| ExportError::Output(format!("{base}.ndjson was not created")).into())
    }

    async fn scan(
        &self,
        request: ScanRequest,
        tracker: ProgressTracker,
        mut writer: Box<dyn FormatWriter>,
    ) -> Result<super::coordinator::ExportResult> {
        let scanner = match PitScanner::open(self.backend.clone(), request).await {
            Ok(scanner) => scanner,
            Err(e) => {
                tracker.finish();
                if let Err(finalize_err) = writer.finalize().await {
                    warn!("Failed to close output after error: {}", finalize_err);
                }
                remove_files(writer.files());
                return Err(e);
            }
        };
        let mut coordinator = ExportCoordinator::new(Box::new(scanner), tracker, writer)
            .with_cancellation(self.cancel_token.clone());
        let result = coordinator.execute().await;
        if result.is_err() {
            remove_files(coordinator.files());
        }
        result
    }
}

/// Ids of the state documents making up a snapshot, `<job>_model_state_<snapshot>#<n>`
pub fn state_document_ids(job_id: &str, snapshot_id: &str, count: u64) -> Vec<String> {
    (1..=count)
        .map(|i| format!("{job_id}_model_state_{snapshot_id}#{i}"))
        .collect()
}

/// Keep a step's output, or log its failure and carry on
///
/// Cancellation is never swallowed.
fn optional<T>(step: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(JobStateError::Cancelled) => Err(JobStateError::Cancelled),
        Err(e) => {
            error!("Failed to {}: {}", step, e);
            Ok(None)
        }
    }
}

fn first_file(writer: &BulkPairWriter) -> Result<PathBuf> {
    writer
        .files()
        .first()
        .cloned()
        .ok_or_else(|| ExportError::Output("no output file created".to_string()).into())
}

/// Write JSON indented by four spaces
///
/// A partially written file is removed.
fn write_pretty_json(path: &Path, value: &Value) -> Result<()> {
    let written: Result<()> = File::create(path).map_err(Into::into).and_then(|file| {
        let mut out = BufWriter::new(file);
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
        value.serialize(&mut serializer)?;
        out.flush()?;
        Ok(())
    });
    if written.is_err() {
        remove_files(&[path]);
    }
    written
}
