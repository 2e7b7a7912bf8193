//! Anomaly detection job configuration
//!
//! [`JobConfig`] wraps the configuration document returned by the jobs API.
//! The document is kept verbatim so it can be archived as-is; typed accessors
//! pull out the handful of fields the export and import steps depend on.

use serde_json::{Map, Value, json};

use crate::error::{ExportError, ImportError, Result};

/// Top-level keys accepted by the put-job API
const PUT_JOB_FIELDS: &[&str] = &[
    "job_id",
    "description",
    "analysis_config",
    "data_description",
    "model_snapshot_retention_days",
    "results_index_name",
    "analysis_limits",
    "custom_settings",
    "allow_lazy_open",
    "datafeed_config",
];

/// Datafeed keys that identify the original owner and must not be replayed
const DATAFEED_STRIPPED_FIELDS: &[&str] = &["authorization", "job_id"];

/// Per-detector keys naming fields of the input documents
pub const DETECTOR_FIELD_KEYS: &[&str] = &[
    "field_name",
    "partition_field_name",
    "categorization_field_name",
    "by_field_name",
    "over_field_name",
    "summary_count_field_name",
];

/// Job configuration document
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    raw: Value,
}

impl JobConfig {
    /// Wrap a configuration document
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    /// Job id, if present
    pub fn job_id(&self) -> Option<&str> {
        self.raw.get("job_id").and_then(Value::as_str)
    }

    /// Creation time in epoch milliseconds
    pub fn create_time(&self) -> Option<i64> {
        self.raw.get("create_time").and_then(Value::as_i64)
    }

    /// Time field of the input documents
    ///
    /// The internal default name `timestamp` maps to the conventional
    /// `@timestamp` field of the source indices.
    pub fn time_field(&self) -> Result<String> {
        let field = self
            .raw
            .pointer("/data_description/time_field")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ExportError::InvalidJobConfig("data_description.time_field is missing".to_string())
            })?;
        Ok(match field {
            "timestamp" => "@timestamp".to_string(),
            other => other.to_string(),
        })
    }

    /// Detector definitions
    pub fn detectors(&self) -> Result<&[Value]> {
        self.raw
            .pointer("/analysis_config/detectors")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                ExportError::InvalidJobConfig("analysis_config.detectors is missing".to_string())
                    .into()
            })
    }

    /// Influencer field names
    pub fn influencers(&self) -> Vec<&str> {
        self.raw
            .pointer("/analysis_config/influencers")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Source indices of the datafeed
    pub fn datafeed_indices(&self) -> Result<Vec<String>> {
        let indices = self
            .raw
            .pointer("/datafeed_config/indices")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ExportError::InvalidJobConfig("datafeed_config.indices is missing".to_string())
            })?;
        Ok(indices
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    /// Datafeed query, `match_all` when none is configured
    pub fn datafeed_query(&self) -> Value {
        self.raw
            .pointer("/datafeed_config/query")
            .cloned()
            .unwrap_or_else(|| json!({ "match_all": {} }))
    }

    /// Body for re-creating the job through the put-job API
    ///
    /// Keeps only the keys the API accepts, strips the datafeed's
    /// authorization and owner, and points the datafeed at `input_index`
    /// when one is given.
    ///
    /// # Returns
    /// * `Result<(String, Value)>` - Job id and request body
    pub fn to_put_body(&self, input_index: Option<&str>) -> Result<(String, Value)> {
        let source = self.raw.as_object().ok_or_else(|| {
            ImportError::InvalidJobConfig("configuration is not an object".to_string())
        })?;

        let mut filtered = Map::new();
        for key in PUT_JOB_FIELDS {
            if let Some(value) = source.get(*key) {
                filtered.insert((*key).to_string(), value.clone());
            }
        }

        let job_id = filtered
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ImportError::InvalidJobConfig("job_id not found".to_string()))?;

        let mut datafeed = match filtered.remove("datafeed_config") {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for key in DATAFEED_STRIPPED_FIELDS {
            datafeed.remove(*key);
        }
        if let Some(index) = input_index {
            datafeed.insert("indices".to_string(), json!([index]));
        }
        filtered.insert("datafeed_config".to_string(), Value::Object(datafeed));

        Ok((job_id, Value::Object(filtered)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobConfig {
        JobConfig::new(json!({
            "job_id": "web-latency",
            "job_type": "anomaly_detector",
            "create_time": 1_700_000_000_000_i64,
            "description": "latency",
            "analysis_config": {
                "bucket_span": "15m",
                "detectors": [{"function": "mean", "field_name": "latency", "by_field_name": "host.keyword"}],
                "influencers": ["host", "region"]
            },
            "data_description": {"time_field": "timestamp"},
            "datafeed_config": {
                "datafeed_id": "datafeed-web-latency",
                "job_id": "web-latency",
                "indices": ["web-*"],
                "authorization": {"roles": ["superuser"]},
                "query": {"term": {"service": "api"}}
            }
        }))
    }

    #[test]
    fn test_accessors() {
        let job = sample();
        assert_eq!(job.job_id(), Some("web-latency"));
        assert_eq!(job.create_time(), Some(1_700_000_000_000));
        assert_eq!(job.time_field().unwrap(), "@timestamp");
        assert_eq!(job.influencers(), vec!["host", "region"]);
        assert_eq!(job.datafeed_indices().unwrap(), vec!["web-*".to_string()]);
        assert_eq!(job.datafeed_query(), json!({"term": {"service": "api"}}));
        assert_eq!(job.detectors().unwrap().len(), 1);
    }

    #[test]
    fn test_default_query_is_match_all() {
        let job = JobConfig::new(json!({"job_id": "j", "datafeed_config": {"indices": ["a"]}}));
        assert_eq!(job.datafeed_query(), json!({"match_all": {}}));
    }

    #[test]
    fn test_custom_time_field_is_kept() {
        let job = JobConfig::new(json!({"data_description": {"time_field": "event_time"}}));
        assert_eq!(job.time_field().unwrap(), "event_time");
        let job = JobConfig::new(json!({}));
        assert!(job.time_field().is_err());
    }

    #[test]
    fn test_put_body_strips_and_redirects() {
        let (job_id, body) = sample().to_put_body(Some("web-latency-input")).unwrap();
        assert_eq!(job_id, "web-latency");
        assert!(body.get("job_type").is_none());
        assert!(body.get("create_time").is_none());
        let datafeed = &body["datafeed_config"];
        assert!(datafeed.get("authorization").is_none());
        assert!(datafeed.get("job_id").is_none());
        assert_eq!(datafeed["indices"], json!(["web-latency-input"]));
        assert_eq!(datafeed["query"], json!({"term": {"service": "api"}}));
    }

    #[test]
    fn test_put_body_keeps_indices_without_input() {
        let (_, body) = sample().to_put_body(None).unwrap();
        assert_eq!(body["datafeed_config"]["indices"], json!(["web-*"]));
    }

    #[test]
    fn test_put_body_requires_job_id() {
        let job = JobConfig::new(json!({"description": "no id"}));
        assert!(job.to_put_body(None).is_err());
    }
}
