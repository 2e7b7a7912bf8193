//! REST implementation of [`SearchBackend`]
//!
//! Thin translation of each backend operation into one HTTP request against
//! the cluster. Non-success statuses are turned into structured
//! [`ErrorInfo`] errors carrying the cluster's own reason.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::error::{ConnectionError, ErrorInfo, ExportError, Result};

use super::{
    BulkRecord, BulkSummary, ClusterInfo, ModelSnapshot, SearchBackend, SearchResponse,
};

/// Basic authentication credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Elasticsearch REST client
#[derive(Debug, Clone)]
pub struct EsClient {
    http: Client,
    base: Url,
    credentials: Option<Credentials>,
}

impl EsClient {
    /// Create a client for the cluster at `base`
    ///
    /// # Arguments
    /// * `http` - Configured HTTP client (timeouts, TLS settings)
    /// * `base` - Cluster base URL
    /// * `credentials` - Optional basic authentication
    pub fn new(http: Client, base: Url, credentials: Option<Credentials>) -> Self {
        Self {
            http,
            base,
            credentials,
        }
    }

    /// Cluster base URL
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build an endpoint URL from path segments
    ///
    /// Segments are percent-encoded individually, so ids containing `#` or
    /// `/` stay inside their segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectionError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        trace!("{} {}", method, url);
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some(c) => builder.basic_auth(&c.username, Some(&c.password)),
            None => builder,
        }
    }

    /// Send a request and fail on non-success statuses
    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("Request failed with status {}: {}", status, body);
        Err(ErrorInfo::from_response(status.as_u16(), &body).into())
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SearchBackend for EsClient {
    async fn info(&self) -> Result<ClusterInfo> {
        let url = self.endpoint(&[])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Value>> {
        let url = self.endpoint(&["_ml", "anomaly_detectors", job_id])?;
        let response: Value = match self.send_json(self.request(Method::GET, url)).await {
            Ok(v) => v,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if response.get("count").and_then(Value::as_u64).unwrap_or(0) == 0 {
            return Ok(None);
        }
        Ok(response
            .get("jobs")
            .and_then(Value::as_array)
            .and_then(|jobs| jobs.first())
            .cloned())
    }

    async fn put_job(&self, job_id: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint(&["_ml", "anomaly_detectors", job_id])?;
        self.send_json(self.request(Method::PUT, url).json(body)).await
    }

    async fn delete_job(&self, job_id: &str, force: bool) -> Result<()> {
        let mut url = self.endpoint(&["_ml", "anomaly_detectors", job_id])?;
        if force {
            url.query_pairs_mut().append_pair("force", "true");
        }
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn get_model_snapshots(
        &self,
        job_id: &str,
        end: Option<&str>,
        desc: bool,
    ) -> Result<Vec<ModelSnapshot>> {
        let mut url = self.endpoint(&["_ml", "anomaly_detectors", job_id, "model_snapshots"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("desc", if desc { "true" } else { "false" });
            if let Some(end) = end {
                query.append_pair("end", end);
            }
        }
        let response: Value = self.send_json(self.request(Method::GET, url)).await?;
        match response.get("model_snapshots") {
            Some(snapshots) => Ok(serde_json::from_value(snapshots.clone())?),
            None => Ok(Vec::new()),
        }
    }

    async fn revert_model_snapshot(&self, job_id: &str, snapshot_id: &str) -> Result<()> {
        let url = self.endpoint(&[
            "_ml",
            "anomaly_detectors",
            job_id,
            "model_snapshots",
            snapshot_id,
            "_revert",
        ])?;
        self.send(self.request(Method::POST, url)).await?;
        Ok(())
    }

    async fn search(&self, index: Option<&str>, body: &Value) -> Result<SearchResponse> {
        let url = match index {
            Some(index) => self.endpoint(&[index, "_search"])?,
            None => self.endpoint(&["_search"])?,
        };
        self.send_json(self.request(Method::POST, url).json(body)).await
    }

    async fn open_point_in_time(&self, indices: &[String], keep_alive: &str) -> Result<String> {
        let target = indices.join(",");
        let mut url = self.endpoint(&[target.as_str(), "_pit"])?;
        url.query_pairs_mut().append_pair("keep_alive", keep_alive);
        let response: Value = self.send_json(self.request(Method::POST, url)).await?;
        response
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ExportError::InvalidResponse("point in time response without id".to_string())
                    .into()
            })
    }

    async fn close_point_in_time(&self, pit_id: &str) -> Result<()> {
        let url = self.endpoint(&["_pit"])?;
        self.send(self.request(Method::DELETE, url).json(&json!({ "id": pit_id })))
            .await?;
        Ok(())
    }

    async fn bulk_index(&self, destination: &str, records: &[BulkRecord]) -> Result<BulkSummary> {
        if records.is_empty() {
            return Ok(BulkSummary::default());
        }

        let body = bulk_body(destination, records)?;
        let url = self.endpoint(&["_bulk"])?;
        let builder = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response: Value = self.send_json(builder).await?;
        Ok(summarize_bulk_response(&response))
    }

    async fn index_document(&self, index: &str, id: &str, body: &Value) -> Result<String> {
        let url = self.endpoint(&[index, "_doc", id])?;
        let response: Value = self.send_json(self.request(Method::PUT, url).json(body)).await?;
        Ok(response
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or(id)
            .to_string())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = self.endpoint(&[index])?;
        let response = self.request(Method::HEAD, url).send().await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(ErrorInfo::from_response(status, "").into()),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let url = self.endpoint(&[index])?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        let url = self.endpoint(&[index])?;
        self.send(self.request(Method::PUT, url)).await?;
        Ok(())
    }
}

/// Render bulk `index` actions as NDJSON, one action line and one source line per record
pub(crate) fn bulk_body(destination: &str, records: &[BulkRecord]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        let action = match &record.id {
            Some(id) => json!({ "index": { "_index": destination, "_id": id } }),
            None => json!({ "index": { "_index": destination } }),
        };
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(record.source.get());
        body.push('\n');
    }
    Ok(body)
}

/// Count accepted and rejected items of a `_bulk` response
pub(crate) fn summarize_bulk_response(response: &Value) -> BulkSummary {
    let mut summary = BulkSummary::default();
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        match result.get("error") {
            Some(error) => {
                summary.failed += 1;
                if summary.errors.len() < BulkSummary::MAX_REPORTED_ERRORS {
                    let id = result.get("_id").and_then(Value::as_str).unwrap_or("?");
                    let reason = error
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    summary.errors.push(format!("{id}: {reason}"));
                }
            }
            None => summary.accepted += 1,
        }
    }
    summary
}
