//! Point-in-time paginated scans
//!
//! This module provides a unified interface for streaming search hits page by
//! page without loading the whole result set into memory. [`PitScanner`] holds
//! a point in time open for the duration of the scan and walks the results
//! with `search_after`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::backend::{Hit, SearchBackend};
use crate::error::{ExportError, Result};

/// Trait for streaming search hits in pages
#[async_trait]
pub trait StreamingQuery: Send {
    /// Fetch the next page of hits
    ///
    /// # Returns
    /// * `Result<Option<Vec<Hit>>>` - Next page, or None once exhausted
    async fn next_batch(&mut self) -> Result<Option<Vec<Hit>>>;

    /// Release server-side resources
    ///
    /// Safe to call more than once; only the first call has an effect.
    async fn close(&mut self) -> Result<()>;
}

/// Parameters of one scan
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Indices or patterns to search
    pub indices: Vec<String>,
    /// Query clause
    pub query: Value,
    /// Sort clause; must give every hit a unique position
    pub sort: Value,
    /// `_source` projection, the full document when `None`
    pub source: Option<Vec<String>>,
    /// Hits per page
    pub page_size: usize,
    /// Point-in-time keep alive, renewed on each page
    pub keep_alive: String,
}

impl ScanRequest {
    /// Scan of documents matching `filter` within a time range
    ///
    /// The query becomes `bool.must = [filter, range(time_field)]`, sorted by
    /// the time field and then `_seq_no`, both ascending.
    ///
    /// # Arguments
    /// * `indices` - Indices or patterns to search
    /// * `filter` - Caller query
    /// * `time_field` - Field the range applies to
    /// * `after` - Inclusive lower bound (`gte`)
    /// * `before` - Inclusive upper bound (`lte`)
    pub fn time_ranged(
        indices: Vec<String>,
        filter: Value,
        time_field: &str,
        after: Option<String>,
        before: Option<String>,
    ) -> Self {
        let mut range = Map::new();
        if let Some(before) = before {
            range.insert("lte".to_string(), Value::String(before));
        }
        if let Some(after) = after {
            range.insert("gte".to_string(), Value::String(after));
        }

        Self {
            indices,
            query: json!({
                "bool": {
                    "must": [filter, { "range": { time_field: range } }]
                }
            }),
            sort: json!([{ time_field: "asc" }, { "_seq_no": "asc" }]),
            source: None,
            page_size: 2000,
            keep_alive: "1m".to_string(),
        }
    }

    /// Scan of documents by id, in shard order
    pub fn by_ids(indices: Vec<String>, ids: &[String]) -> Self {
        Self {
            indices,
            query: json!({ "terms": { "_id": ids } }),
            sort: json!(["_shard_doc"]),
            source: None,
            page_size: 2000,
            keep_alive: "1m".to_string(),
        }
    }

    /// Set the `_source` projection
    pub fn with_source(mut self, fields: Vec<String>) -> Self {
        self.source = Some(fields);
        self
    }

    /// Set page size and keep alive
    pub fn with_paging(mut self, page_size: usize, keep_alive: &str) -> Self {
        self.page_size = page_size;
        self.keep_alive = keep_alive.to_string();
        self
    }
}

/// Scan backed by a point in time and `search_after`
///
/// Forward-only and not restartable. Once a page comes back empty or a fetch
/// fails, every later call to [`StreamingQuery::next_batch`] returns `None`.
pub struct PitScanner {
    backend: Arc<dyn SearchBackend>,
    request: ScanRequest,
    pit_id: Option<String>,
    search_after: Option<Vec<Value>>,
    total_fetched: u64,
    exhausted: bool,
    closed: bool,
}

impl PitScanner {
    /// Open a point in time and prepare the scan
    ///
    /// # Arguments
    /// * `backend` - Cluster access
    /// * `request` - Scan parameters
    ///
    /// # Returns
    /// * `Result<Self>` - Scanner holding an open point in time
    pub async fn open(backend: Arc<dyn SearchBackend>, request: ScanRequest) -> Result<Self> {
        let pit_id = backend
            .open_point_in_time(&request.indices, &request.keep_alive)
            .await?;
        debug!(
            "Opened point in time over {} (keep_alive {})",
            request.indices.join(","),
            request.keep_alive
        );

        Ok(Self {
            backend,
            request,
            pit_id: Some(pit_id),
            search_after: None,
            total_fetched: 0,
            exhausted: false,
            closed: false,
        })
    }

    /// Number of hits returned so far
    pub fn total_fetched(&self) -> u64 {
        self.total_fetched
    }

    fn page_body(&self) -> Value {
        let mut body = json!({
            "size": self.request.page_size,
            "query": self.request.query,
            "sort": self.request.sort,
            "pit": {
                "id": self.pit_id,
                "keep_alive": self.request.keep_alive,
            },
        });
        if let Some(fields) = &self.request.source {
            body["_source"] = json!(fields);
        }
        if let Some(after) = &self.search_after {
            body["search_after"] = json!(after);
        }
        body
    }

    async fn fetch(&mut self) -> Result<Vec<Hit>> {
        let response = self.backend.search(None, &self.page_body()).await?;
        if let Some(id) = response.pit_id.clone() {
            self.pit_id = Some(id);
        }

        let hits = response.into_hits();
        if let Some(last) = hits.last() {
            match &last.sort {
                Some(sort) => self.search_after = Some(sort.clone()),
                None => {
                    return Err(ExportError::InvalidResponse(
                        "search hit without sort values".to_string(),
                    )
                    .into());
                }
            }
        }
        Ok(hits)
    }
}

#[async_trait]
impl StreamingQuery for PitScanner {
    async fn next_batch(&mut self) -> Result<Option<Vec<Hit>>> {
        if self.closed || self.exhausted {
            return Ok(None);
        }

        let hits = match self.fetch().await {
            Ok(hits) => hits,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };

        if hits.is_empty() {
            debug!("Scan exhausted after {} hits", self.total_fetched);
            self.exhausted = true;
            return Ok(None);
        }

        self.total_fetched += hits.len() as u64;
        debug!(
            "Fetched page of {} hits (total: {})",
            hits.len(),
            self.total_fetched
        );
        Ok(Some(hits))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(pit_id) = self.pit_id.take() {
            self.backend.close_point_in_time(&pit_id).await?;
            info!(
                "Closed point in time after fetching {} hits",
                self.total_fetched
            );
        }
        Ok(())
    }
}

impl Drop for PitScanner {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Point in time scanner dropped without explicit close");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{
        BulkRecord, BulkSummary, ClusterInfo, ClusterVersion, ModelSnapshot, SearchResponse,
    };
    use crate::error::ErrorInfo;
    use std::sync::Mutex;

    /// Backend serving a fixed list of documents through PIT searches
    #[derive(Default)]
    pub(crate) struct PagedBackend {
        pub docs: Vec<(String, u64)>,
        pub fail_on_page: Option<usize>,
        pub opened: Mutex<u32>,
        pub closed: Mutex<Vec<String>>,
        pub bodies: Mutex<Vec<Value>>,
        pub bulk_sizes: Mutex<Vec<usize>>,
    }

    impl PagedBackend {
        pub fn with_docs(count: u64) -> Self {
            Self {
                docs: (0..count).map(|i| (format!("doc-{i}"), i)).collect(),
                ..Default::default()
            }
        }

        pub fn close_count(&self) -> usize {
            self.closed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SearchBackend for PagedBackend {
        async fn info(&self) -> Result<ClusterInfo> {
            Ok(ClusterInfo {
                cluster_name: "test".to_string(),
                version: ClusterVersion {
                    number: "8.15.0".to_string(),
                },
            })
        }

        async fn get_job(&self, _job_id: &str) -> Result<Option<Value>> {
            Ok(None)
        }

        async fn put_job(&self, _job_id: &str, body: &Value) -> Result<Value> {
            Ok(body.clone())
        }

        async fn delete_job(&self, _job_id: &str, _force: bool) -> Result<()> {
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

        async fn revert_model_snapshot(&self, _job_id: &str, _snapshot_id: &str) -> Result<()> {
            Ok(())
        }

        async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse> {
            assert!(index.is_none(), "PIT searches must not name an index");
            let page = {
                let mut bodies = self.bodies.lock().unwrap();
                bodies.push(body.clone());
                bodies.len() - 1
            };
            if self.fail_on_page == Some(page) {
                return Err(ErrorInfo::from_response(503, "unavailable").into());
            }

            let size = body["size"].as_u64().unwrap() as usize;
            let after = body
                .get("search_after")
                .and_then(|s| s[0].as_u64());
            let hits: Vec<Value> = self
                .docs
                .iter()
                .filter(|(_, key)| after.is_none_or(|a| *key > a))
                .take(size)
                .map(|(id, key)| {
                    json!({
                        "_index": "source-1",
                        "_id": id,
                        "_source": {"seq": key},
                        "sort": [key]
                    })
                })
                .collect();

            let response = json!({
                "pit_id": format!("pit-{page}"),
                "hits": {"hits": hits}
            });
            Ok(serde_json::from_value(response)?)
        }

        async fn open_point_in_time(&self, _indices: &[String], _keep_alive: &str) -> Result<String> {
            *self.opened.lock().unwrap() += 1;
            Ok("pit-initial".to_string())
        }

        async fn close_point_in_time(&self, pit_id: &str) -> Result<()> {
            self.closed.lock().unwrap().push(pit_id.to_string());
            Ok(())
        }

        async fn bulk_index(&self, _destination: &str, records: &[BulkRecord]) -> Result<BulkSummary> {
            self.bulk_sizes.lock().unwrap().push(records.len());
            Ok(BulkSummary {
                accepted: records.len() as u64,
                ..Default::default()
            })
        }

        async fn index_document(&self, _index: &str, id: &str, _body: &Value) -> Result<String> {
            Ok(id.to_string())
        }

        async fn index_exists(&self, _index: &str) -> Result<bool> {
            Ok(false)
        }

        async fn delete_index(&self, _index: &str) -> Result<()> {
            Ok(())
        }

        async fn create_index(&self, _index: &str) -> Result<()> {
            Ok(())
        }
    }

    fn request(page_size: usize) -> ScanRequest {
        ScanRequest::time_ranged(
            vec!["source-*".to_string()],
            json!({"match_all": {}}),
            "@timestamp",
            Some("2024-01-01T00:00:00".to_string()),
            Some("2024-02-01T00:00:00".to_string()),
        )
        .with_paging(page_size, "1m")
    }

    async fn drain(scanner: &mut PitScanner) -> Result<Vec<u64>> {
        let mut seen = Vec::new();
        while let Some(page) = scanner.next_batch().await? {
            for hit in page {
                let source: Value = serde_json::from_str(hit.source.get()).unwrap();
                seen.push(source["seq"].as_u64().unwrap());
            }
        }
        Ok(seen)
    }

    #[test]
    fn test_time_ranged_query_shape() {
        let req = request(10);
        assert_eq!(
            req.query,
            json!({"bool": {"must": [
                {"match_all": {}},
                {"range": {"@timestamp": {"lte": "2024-02-01T00:00:00", "gte": "2024-01-01T00:00:00"}}}
            ]}})
        );
        assert_eq!(req.sort, json!([{"@timestamp": "asc"}, {"_seq_no": "asc"}]));
    }

    #[tokio::test]
    async fn test_scan_yields_all_in_order() {
        for (count, page_size) in [(0u64, 3usize), (2, 3), (3, 3), (10, 3), (7, 1)] {
            let backend = Arc::new(PagedBackend::with_docs(count));
            let mut scanner = PitScanner::open(backend.clone(), request(page_size))
                .await
                .unwrap();
            let seen = drain(&mut scanner).await.unwrap();
            scanner.close().await.unwrap();
            scanner.close().await.unwrap();

            assert_eq!(seen, (0..count).collect::<Vec<_>>());
            assert_eq!(scanner.total_fetched(), count);
            assert_eq!(backend.close_count(), 1, "count={count} page={page_size}");
        }
    }

    #[tokio::test]
    async fn test_scan_renews_keep_alive_and_pit_id() {
        let backend = Arc::new(PagedBackend::with_docs(4));
        let mut scanner = PitScanner::open(backend.clone(), request(2)).await.unwrap();
        drain(&mut scanner).await.unwrap();
        scanner.close().await.unwrap();

        let bodies = backend.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["pit"]["id"], "pit-initial");
        assert!(bodies[0].get("search_after").is_none());
        assert_eq!(bodies[1]["pit"]["id"], "pit-0");
        assert_eq!(bodies[1]["search_after"], json!([1]));
        assert!(bodies.iter().all(|b| b["pit"]["keep_alive"] == "1m"));
        // closes the most recent id
        assert_eq!(backend.closed.lock().unwrap()[0], "pit-2");
    }

    #[tokio::test]
    async fn test_scan_failure_still_closes_once() {
        let backend = Arc::new(PagedBackend {
            fail_on_page: Some(1),
            ..PagedBackend::with_docs(10)
        });
        let mut scanner = PitScanner::open(backend.clone(), request(3)).await.unwrap();
        assert!(drain(&mut scanner).await.is_err());
        assert!(scanner.next_batch().await.unwrap().is_none());
        scanner.close().await.unwrap();
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test]
    async fn test_source_projection_is_sent() {
        let backend = Arc::new(PagedBackend::with_docs(1));
        let req = request(5).with_source(vec!["@timestamp".to_string(), "host".to_string()]);
        let mut scanner = PitScanner::open(backend.clone(), req).await.unwrap();
        drain(&mut scanner).await.unwrap();
        scanner.close().await.unwrap();
        assert_eq!(
            backend.bodies.lock().unwrap()[0]["_source"],
            json!(["@timestamp", "host"])
        );
    }
}
