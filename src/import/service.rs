//! Import of an exported job state archive
//!
//! The archive is extracted under the work directory, its required members
//! are located and parsed, and only then does anything get written to the
//! cluster:
//!
//! 1. Input documents into a freshly created `<job>-input` index, if present
//! 2. The job, force-deleting an existing job with the same id first
//! 3. Model state documents into the state write alias
//! 4. The snapshot statistics document
//! 5. A short pause, then the revert to the exported snapshot
//! 6. Annotations, when enabled; failures here are only logged
//!
//! A failing step aborts the ones after it. Nothing already written is undone.
//! The extraction directory is removed in every case.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::archive;
use crate::backend::{BulkRecord, BulkSummary, SearchBackend, indices};
use crate::config::ImportConfig;
use crate::error::{ImportError, JobStateError, Result};
use crate::export::service::SNAPSHOT_STATS_PREFIX;
use crate::job::JobConfig;
use crate::utils::fs::file_name;
use crate::utils::string::sanitize_filename;

use super::loader::{BulkLoader, read_bulk_pairs, read_source_lines};

/// What to import
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Job the archive was exported for
    pub job_id: String,
    /// Archive produced by the export
    pub archive: PathBuf,
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Job that was created
    pub job_id: String,
    /// Snapshot the job was reverted to
    pub snapshot_id: String,
    /// Index holding the input documents, if any were imported
    pub input_index: Option<String>,
    /// Input document results
    pub inputs: BulkSummary,
    /// Model state document results
    pub state_documents: BulkSummary,
    /// Annotation results, `None` when skipped or failed
    pub annotations: Option<BulkSummary>,
}

/// Archive members required for an import, located and parsed
#[derive(Debug)]
pub struct ArchiveContents {
    pub job: JobConfig,
    pub state_documents: Vec<BulkRecord>,
    pub stats: Value,
    pub stats_id: String,
    pub snapshot_id: String,
    /// Input files ordered by chunk number
    pub inputs: Vec<PathBuf>,
    pub annotations: Option<PathBuf>,
}

impl ArchiveContents {
    /// Locate and parse the members for `job_id` among extracted files
    ///
    /// Fails without side effects when the configuration, the state
    /// documents or the snapshot statistics are missing or malformed, or
    /// when any input file is malformed. Input files are only checked here
    /// and read again when they are loaded.
    pub fn load(job_id: &str, files: &[PathBuf]) -> Result<Self> {
        let safe_job_id = sanitize_filename(job_id);
        let by_name = |name: &str| files.iter().find(|f| file_name(f) == name).cloned();

        let config_name = format!("{safe_job_id}_config.json");
        let config_path = by_name(&config_name).ok_or(ImportError::MissingFile(config_name))?;

        let docs_name = format!("{safe_job_id}_snapshot_docs.ndjson");
        let docs_path = by_name(&docs_name).ok_or(ImportError::MissingFile(docs_name))?;

        let stats_path = files
            .iter()
            .find(|f| {
                let name = file_name(f);
                name.starts_with(SNAPSHOT_STATS_PREFIX) && name.ends_with(".json")
            })
            .cloned()
            .ok_or_else(|| ImportError::MissingFile(format!("{SNAPSHOT_STATS_PREFIX}*.json")))?;

        let job = JobConfig::new(read_json(&config_path)?);
        job.to_put_body(None)?;

        let stats = read_json(&stats_path)?;
        let snapshot_id = stats
            .get("snapshot_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ImportError::InvalidSnapshotStats("snapshot_id not found".to_string())
            })?;
        let stats_name = file_name(&stats_path);
        let stats_id = stats_name
            .trim_start_matches(SNAPSHOT_STATS_PREFIX)
            .trim_end_matches(".json")
            .to_string();

        let state_documents = read_bulk_pairs(&docs_path)?;

        let mut inputs: Vec<(u64, PathBuf)> = files
            .iter()
            .filter_map(|f| input_chunk_number(&safe_job_id, &file_name(f)).map(|n| (n, f.clone())))
            .collect();
        inputs.sort();
        for (_, path) in &inputs {
            read_bulk_pairs(path)?;
        }

        let annotations = by_name(&format!("{safe_job_id}_annotations.ndjson"));

        Ok(Self {
            job,
            state_documents,
            stats,
            stats_id,
            snapshot_id,
            inputs: inputs.into_iter().map(|(_, path)| path).collect(),
            annotations,
        })
    }
}

/// Chunk number of an `<safe_job>_input_<n>.ndjson` file name
fn input_chunk_number(safe_job_id: &str, name: &str) -> Option<u64> {
    name.strip_prefix(safe_job_id)?
        .strip_prefix("_input_")?
        .strip_suffix(".ndjson")?
        .parse()
        .ok()
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        ImportError::MalformedFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Import pipeline bound to one cluster
pub struct ImportService {
    backend: Arc<dyn SearchBackend>,
    config: ImportConfig,
    show_progress: bool,
}

impl ImportService {
    /// Create a new import service
    pub fn new(backend: Arc<dyn SearchBackend>, config: ImportConfig) -> Self {
        Self {
            backend,
            config,
            show_progress: false,
        }
    }

    /// Enable progress bars
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    fn loader(&self) -> BulkLoader {
        BulkLoader::new(
            self.backend.clone(),
            self.config.bulk_chunk_size,
            self.show_progress,
        )
    }

    /// Extract the archive, import it, and clean up
    ///
    /// # Returns
    /// * `Result<ImportReport>` - What was written
    pub async fn run(&self, options: &ImportOptions) -> Result<ImportReport> {
        let target = self
            .config
            .work_dir
            .join(format!("extracted_{}", sanitize_filename(&options.job_id)));

        let archive_path = options.archive.clone();
        let extract_to = target.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            archive::extract_archive(&archive_path, &extract_to)
        })
        .await
        .map_err(|e| JobStateError::Generic(format!("extraction task failed: {e}")));

        let result = match extracted {
            Ok(Ok(files)) => self.import_files(&options.job_id, &files).await,
            Ok(Err(e)) | Err(e) => Err(e),
        };

        if target.exists()
            && let Err(e) = std::fs::remove_dir_all(&target)
        {
            warn!("Error cleaning up extracted files: {}", e);
        }

        match &result {
            Ok(report) => info!("Import of job {} completed successfully", report.job_id),
            Err(e) => error!("Error importing model state: {}", e),
        }
        result
    }

    /// Import already extracted files
    pub async fn import_files(&self, job_id: &str, files: &[PathBuf]) -> Result<ImportReport> {
        let contents = ArchiveContents::load(job_id, files)?;
        let mut report = ImportReport {
            snapshot_id: contents.snapshot_id.clone(),
            ..Default::default()
        };

        if !contents.inputs.is_empty() {
            let index = format!("{}-input", sanitize_filename(job_id));
            report.inputs = self.load_inputs(&index, &contents.inputs).await?;
            report.input_index = Some(index);
        } else {
            warn!("No input data files found for job {}", job_id);
        }

        report.job_id = self
            .create_job(&contents.job, report.input_index.as_deref())
            .await?;
        if report.job_id != job_id {
            warn!(
                "Archive configuration is for job {}, not {}",
                report.job_id, job_id
            );
        }

        info!("Importing {} model state documents", contents.state_documents.len());
        report.state_documents = self
            .loader()
            .load(indices::STATE_WRITE, &contents.state_documents)
            .await?;

        let stored = self
            .backend
            .index_document(indices::ANOMALIES_SHARED, &contents.stats_id, &contents.stats)
            .await?;
        info!("Snapshot statistics indexed with ID: {}", stored);

        self.revert(&report.job_id, &contents.snapshot_id).await?;

        if self.config.import_annotations
            && let Some(path) = &contents.annotations
        {
            report.annotations = self.load_annotations(path).await;
        }

        Ok(report)
    }

    /// Recreate the input index and load every input file into it
    async fn load_inputs(&self, index: &str, files: &[PathBuf]) -> Result<BulkSummary> {
        if self.backend.index_exists(index).await? {
            info!("Index {} already exists, deleting it", index);
            self.backend.delete_index(index).await?;
        }
        self.backend.create_index(index).await?;
        info!("Created input index {}", index);

        let loader = self.loader();
        let mut total = BulkSummary::default();
        for file in files {
            total.merge(loader.load_pairs_file(index, file).await?);
        }
        Ok(total)
    }

    /// Create the job from its exported configuration
    ///
    /// # Returns
    /// * `Result<String>` - Id of the created job
    async fn create_job(&self, job: &JobConfig, input_index: Option<&str>) -> Result<String> {
        let (job_id, body) = job.to_put_body(input_index)?;

        if self.backend.get_job(&job_id).await?.is_some() {
            warn!("Job {} already exists, deleting it", job_id);
            self.backend.delete_job(&job_id, true).await?;
        }
        self.backend.put_job(&job_id, &body).await?;
        info!("Job {} created", job_id);
        Ok(job_id)
    }

    async fn revert(&self, job_id: &str, snapshot_id: &str) -> Result<()> {
        let delay = self.config.revert_delay();
        if !delay.is_zero() {
            info!("Waiting {:?} for the snapshot to become searchable", delay);
            tokio::time::sleep(delay).await;
        }
        self.backend.revert_model_snapshot(job_id, snapshot_id).await?;
        info!("Reverted job {} to snapshot {}", job_id, snapshot_id);
        Ok(())
    }

    async fn load_annotations(&self, path: &Path) -> Option<BulkSummary> {
        let loaded = match read_source_lines(path) {
            Ok(records) => self.loader().load(indices::ANNOTATIONS_WRITE, &records).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Failed to import annotations: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClusterInfo, ClusterVersion, ModelSnapshot, SearchResponse};
    use crate::error::ErrorInfo;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Backend that records every remote write
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        bodies: Mutex<Vec<(String, Value)>>,
        bulk: Mutex<Vec<(String, Vec<String>)>>,
        existing_job: bool,
        input_index_exists: bool,
        fail_put_job: bool,
        fail_annotations: bool,
    }

    impl RecordingBackend {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchBackend for RecordingBackend {
        async fn info(&self) -> Result<ClusterInfo> {
            Ok(ClusterInfo {
                cluster_name: "rec".to_string(),
                version: ClusterVersion {
                    number: "8.15.0".to_string(),
                },
            })
        }

        async fn get_job(&self, job_id: &str) -> Result<Option<Value>> {
            Ok(self.existing_job.then(|| json!({ "job_id": job_id })))
        }

        async fn put_job(&self, job_id: &str, body: &Value) -> Result<Value> {
            self.log(format!("put_job {job_id}"));
            if self.fail_put_job {
                return Err(ErrorInfo::from_response(400, r#"{"error":{"type":"x","reason":"bad"}}"#).into());
            }
            self.bodies.lock().unwrap().push((job_id.to_string(), body.clone()));
            Ok(json!({ "job_id": job_id }))
        }

        async fn delete_job(&self, job_id: &str, force: bool) -> Result<()> {
            self.log(format!("delete_job {job_id} force={force}"));
            Ok(())
        }

        async fn get_model_snapshots(
            &self,
            _job_id: &str,
            _end: Option<&str>,
            _desc: bool,
        ) -> Result<Vec<ModelSnapshot>> {
            Ok(Vec::new())
        }

        async fn revert_model_snapshot(&self, job_id: &str, snapshot_id: &str) -> Result<()> {
            self.log(format!("revert {job_id} {snapshot_id}"));
            Ok(())
        }

        async fn search(&self, _index: Option<&str>, _body: &Value) -> Result<SearchResponse> {
            Ok(serde_json::from_value(json!({"hits": {"hits": []}}))?)
        }

        async fn open_point_in_time(&self, _indices: &[String], _keep_alive: &str) -> Result<String> {
            Ok("pit".to_string())
        }

        async fn close_point_in_time(&self, _pit_id: &str) -> Result<()> {
            Ok(())
        }

        async fn bulk_index(&self, destination: &str, records: &[BulkRecord]) -> Result<BulkSummary> {
            self.log(format!("bulk {destination} {}", records.len()));
            if self.fail_annotations && destination == indices::ANNOTATIONS_WRITE {
                return Err(ErrorInfo::from_response(403, "forbidden").into());
            }
            self.bulk.lock().unwrap().push((
                destination.to_string(),
                records.iter().map(|r| r.source.get().to_string()).collect(),
            ));
            Ok(BulkSummary {
                accepted: records.len() as u64,
                ..Default::default()
            })
        }

        async fn index_document(&self, index: &str, id: &str, _body: &Value) -> Result<String> {
            self.log(format!("index {index} {id}"));
            Ok(id.to_string())
        }

        async fn index_exists(&self, index: &str) -> Result<bool> {
            self.log(format!("exists {index}"));
            Ok(self.input_index_exists)
        }

        async fn delete_index(&self, index: &str) -> Result<()> {
            self.log(format!("delete_index {index}"));
            Ok(())
        }

        async fn create_index(&self, index: &str) -> Result<()> {
            self.log(format!("create_index {index}"));
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        files: Vec<PathBuf>,
    }

    fn fixture(with_stats: bool, inputs: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        let mut put = |name: &str, content: String| {
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            files.push(path);
        };

        put(
            "web_latency_config.json",
            json!({
                "job_id": "web/latency",
                "create_time": 1,
                "analysis_config": {"detectors": [{"function": "count"}]},
                "data_description": {"time_field": "timestamp"},
                "datafeed_config": {"indices": ["web-*"], "job_id": "web/latency", "authorization": {}}
            })
            .to_string(),
        );
        put(
            "web_latency_snapshot_docs.ndjson",
            (1..=3)
                .map(|i| format!(
                    "{{\"index\":{{\"_index\":\".ml-state-000001\",\"_id\":\"web/latency_model_state_42#{i}\"}}}}\n{{\"state\": \"s{i}\"}}\n"
                ))
                .collect(),
        );
        if with_stats {
            put(
                "ml-anomalies-snapshot_doc_web_latency_model_snapshot_42.json",
                json!({"job_id": "web/latency", "snapshot_id": "42", "snapshot_doc_count": 3}).to_string(),
            );
        }
        // out of order on purpose
        for n in (1..=inputs).rev() {
            put(
                &format!("web_latency_input_{n}.ndjson"),
                format!("{{\"index\":{{\"_index\":\"web-1\",\"_id\":\"in{n}\"}}}}\n{{\"n\":{n}}}\n"),
            );
        }
        put("web_latency_annotations.ndjson", "{\"annotation\":\"deploy\"}\n".to_string());

        Fixture { _dir: dir, files }
    }

    fn service(backend: Arc<RecordingBackend>) -> ImportService {
        let config = ImportConfig {
            revert_delay_ms: 0,
            bulk_chunk_size: 2,
            ..Default::default()
        };
        ImportService::new(backend, config)
    }

    #[tokio::test]
    async fn test_import_sequence() {
        let fx = fixture(true, 2);
        let backend = Arc::new(RecordingBackend {
            existing_job: true,
            input_index_exists: true,
            ..Default::default()
        });

        let report = service(backend.clone())
            .import_files("web/latency", &fx.files)
            .await
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                "exists web_latency-input",
                "delete_index web_latency-input",
                "create_index web_latency-input",
                "bulk web_latency-input 1",
                "bulk web_latency-input 1",
                "delete_job web/latency force=true",
                "put_job web/latency",
                "bulk .ml-state-write 2",
                "bulk .ml-state-write 1",
                "index .ml-anomalies-shared web_latency_model_snapshot_42",
                "revert web/latency 42",
                "bulk .ml-annotations-writable 1",
            ]
        );
        assert_eq!(report.snapshot_id, "42");
        assert_eq!(report.input_index.as_deref(), Some("web_latency-input"));
        assert_eq!(report.inputs.accepted, 2);
        assert_eq!(report.state_documents.accepted, 3);
        assert_eq!(report.annotations.map(|a| a.accepted), Some(1));

        // input chunks are loaded in numeric order
        let bulk = backend.bulk.lock().unwrap();
        assert_eq!(bulk[0].1, vec!["{\"n\":1}"]);
        assert_eq!(bulk[1].1, vec!["{\"n\":2}"]);
        // payloads are forwarded untouched
        assert_eq!(bulk[2].1, vec!["{\"state\": \"s1\"}", "{\"state\": \"s2\"}"]);

        let bodies = backend.bodies.lock().unwrap();
        let datafeed = &bodies[0].1["datafeed_config"];
        assert_eq!(datafeed["indices"], json!(["web_latency-input"]));
        assert!(datafeed.get("authorization").is_none());
        assert!(datafeed.get("job_id").is_none());
        assert!(bodies[0].1.get("create_time").is_none());
    }

    #[tokio::test]
    async fn test_missing_stats_aborts_before_writes() {
        let fx = fixture(false, 1);
        let backend = Arc::new(RecordingBackend::default());

        let err = service(backend.clone())
            .import_files("web/latency", &fx.files)
            .await
            .unwrap_err();

        assert!(matches!(err, JobStateError::Import(ImportError::MissingFile(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_aborts_before_writes() {
        let fx = fixture(true, 2);
        let second = fx
            .files
            .iter()
            .find(|f| f.ends_with("web_latency_input_2.ndjson"))
            .unwrap();
        std::fs::write(second, "{\"index\":{\"_id\":\"in2\"}}\n{not json\n").unwrap();
        let backend = Arc::new(RecordingBackend::default());

        let err = service(backend.clone())
            .import_files("web/latency", &fx.files)
            .await
            .unwrap_err();

        assert!(matches!(err, JobStateError::Import(ImportError::MalformedFile { .. })));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_skips_revert() {
        let fx = fixture(true, 0);
        let backend = Arc::new(RecordingBackend {
            fail_put_job: true,
            ..Default::default()
        });

        assert!(service(backend.clone())
            .import_files("web/latency", &fx.files)
            .await
            .is_err());
        let calls = backend.calls();
        assert_eq!(calls, vec!["put_job web/latency"]);
        assert!(!calls.iter().any(|c| c.starts_with("revert")));
    }

    #[tokio::test]
    async fn test_annotation_failure_is_not_fatal() {
        let fx = fixture(true, 0);
        let backend = Arc::new(RecordingBackend {
            fail_annotations: true,
            ..Default::default()
        });

        let report = service(backend.clone())
            .import_files("web/latency", &fx.files)
            .await
            .unwrap();
        assert!(report.annotations.is_none());
        assert!(report.input_index.is_none());
        assert!(backend.calls().contains(&"revert web/latency 42".to_string()));
    }

    #[test]
    fn test_input_chunk_number() {
        assert_eq!(input_chunk_number("job", "job_input_12.ndjson"), Some(12));
        assert_eq!(input_chunk_number("job", "job_input_x.ndjson"), None);
        assert_eq!(input_chunk_number("job", "other_input_1.ndjson"), None);
        assert_eq!(input_chunk_number("job", "job_input_1.json"), None);
    }

    #[tokio::test]
    async fn test_run_cleans_up_extraction() {
        let fx = fixture(true, 0);
        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("web_latency_state.tar.gz");
        crate::archive::create_archive(&archive_path, &fx.files).unwrap();

        let backend = Arc::new(RecordingBackend::default());
        let config = ImportConfig {
            revert_delay_ms: 0,
            work_dir: work.path().to_path_buf(),
            ..Default::default()
        };
        let report = ImportService::new(backend, config)
            .run(&ImportOptions {
                job_id: "web/latency".to_string(),
                archive: archive_path,
            })
            .await
            .unwrap();

        assert_eq!(report.job_id, "web/latency");
        assert!(!work.path().join("extracted_web_latency").exists());
    }
}
