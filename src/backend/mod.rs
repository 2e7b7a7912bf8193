//! Elasticsearch access layer
//!
//! The export and import pipelines talk to the cluster exclusively through the
//! [`SearchBackend`] trait. [`EsClient`] implements it over the REST API; tests
//! substitute in-memory implementations.
//!
//! Index names used by the anomaly detection internals live in [`indices`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::Result;

pub mod http;

pub use http::EsClient;

/// Internal index names and patterns
pub mod indices {
    /// Model state documents (read pattern)
    pub const STATE_READ: &str = ".ml-state-*";
    /// Model state documents (write alias)
    pub const STATE_WRITE: &str = ".ml-state-write";
    /// Shared results index holding model snapshot documents
    pub const ANOMALIES_SHARED: &str = ".ml-anomalies-shared";
    /// Annotations (read alias)
    pub const ANNOTATIONS_READ: &str = ".ml-annotations-read";
    /// Annotations (write alias)
    pub const ANNOTATIONS_WRITE: &str = ".ml-annotations-writable";
    /// Job notifications
    pub const NOTIFICATIONS: &str = ".ml-notifications-*";
}

/// A single search hit
///
/// The `_source` payload is kept as raw JSON text so that documents travel
/// through export and import byte for byte.
#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: Box<RawValue>,
    #[serde(default)]
    pub sort: Option<Vec<Value>>,
}

/// Search response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub hits: HitsEnvelope,
    /// Refreshed point-in-time id, present on PIT searches
    #[serde(default)]
    pub pit_id: Option<String>,
}

/// The `hits` object of a search response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

impl SearchResponse {
    /// Take the hits out of the response
    pub fn into_hits(self) -> Vec<Hit> {
        self.hits.hits
    }
}

/// Model snapshot metadata as returned by the snapshots API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub snapshot_id: String,
    #[serde(default)]
    pub snapshot_doc_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One document submitted through `_bulk`
#[derive(Debug, Clone)]
pub struct BulkRecord {
    /// Document id; `None` lets the cluster assign one
    pub id: Option<String>,
    /// Raw document payload
    pub source: Box<RawValue>,
}

/// Outcome of a bulk submission
///
/// Per-item failures do not fail the submission; they are counted and the
/// first few reasons are kept for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Items the cluster accepted
    pub accepted: u64,
    /// Items the cluster rejected
    pub failed: u64,
    /// Sample of rejection reasons
    pub errors: Vec<String>,
}

impl BulkSummary {
    /// Maximum number of failure reasons retained
    pub const MAX_REPORTED_ERRORS: usize = 10;

    /// Fold another summary into this one
    pub fn merge(&mut self, other: BulkSummary) {
        self.accepted += other.accepted;
        self.failed += other.failed;
        for err in other.errors {
            if self.errors.len() >= Self::MAX_REPORTED_ERRORS {
                break;
            }
            self.errors.push(err);
        }
    }

    /// Whether every submitted item was accepted
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Cluster identity returned by `GET /`
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub cluster_name: String,
    pub version: ClusterVersion,
}

/// Version block of [`ClusterInfo`]
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterVersion {
    pub number: String,
}

/// Remote operations used by the export and import pipelines
///
/// Every call is awaited to completion before the next one is issued.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Cluster name and version
    async fn info(&self) -> Result<ClusterInfo>;

    /// Fetch a job configuration, `None` when the job does not exist
    async fn get_job(&self, job_id: &str) -> Result<Option<Value>>;

    /// Create a job from a configuration body
    async fn put_job(&self, job_id: &str, body: &Value) -> Result<Value>;

    /// Delete a job
    async fn delete_job(&self, job_id: &str, force: bool) -> Result<()>;

    /// List model snapshots, optionally bounded by an end date
    async fn get_model_snapshots(
        &self,
        job_id: &str,
        end: Option<&str>,
        desc: bool,
    ) -> Result<Vec<ModelSnapshot>>;

    /// Revert a job to one of its snapshots
    async fn revert_model_snapshot(&self, job_id: &str, snapshot_id: &str) -> Result<()>;

    /// Run a search; `index` must be `None` when the body carries a PIT
    async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse>;

    /// Open a point in time over the given indices
    async fn open_point_in_time(&self, indices: &[String], keep_alive: &str) -> Result<String>;

    /// Release a point in time
    async fn close_point_in_time(&self, pit_id: &str) -> Result<()>;

    /// Index a batch of documents into one destination index
    async fn bulk_index(&self, destination: &str, records: &[BulkRecord]) -> Result<BulkSummary>;

    /// Index a single document under a fixed id, returning the stored id
    async fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<String>;

    /// Check whether an index exists
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Delete an index
    async fn delete_index(&self, index: &str) -> Result<()>;

    /// Create an index with default settings
    async fn create_index(&self, index: &str) -> Result<()>;
}
