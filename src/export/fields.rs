//! Field projection for input document export
//!
//! Input documents are fetched with a `_source` filter limited to the fields
//! the job actually reads. Those fields come from the detector definitions,
//! the influencers, the time field, and whatever the datafeed query filters on.
//! The last group is recovered by walking the query tree and keeping every
//! object key that is not a query DSL keyword.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use serde_json::Value;

use crate::error::Result;
use crate::job::{DETECTOR_FIELD_KEYS, JobConfig};

/// Query DSL keywords that never name a document field
pub const KNOWN_OPERATORS: &[&str] = &[
    "query",
    "bool",
    "must",
    "should",
    "filter",
    "must_not",
    "match",
    "term",
    "terms",
    "range",
    "exists",
    "missing",
    "wildcard",
    "regexp",
    "fuzzy",
    "prefix",
    "multi_match",
    "match_all",
    "match_phrase",
    "match_phrase_prefix",
    "simple_query_string",
    "common",
    "ids",
    "constant_score",
    "dis_max",
    "function_score",
    "nested",
    "has_child",
    "has_parent",
    "more_like_this",
    "script",
    "percolate",
    "geo_shape",
    "geo_bounding_box",
    "geo_distance",
    "geo_polygon",
    "shape",
    "parent_id",
    "boosting",
    "indices",
    "span_term",
    "span_multi",
    "span_first",
    "span_near",
    "span_or",
    "span_not",
    "span_containing",
    "span_within",
    "span_field_masking",
];

static OPERATOR_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| KNOWN_OPERATORS.iter().copied().collect());

const KEYWORD_SUFFIX: &str = ".keyword";

/// A filter expression tree
///
/// Only the shape matters for field extraction, so scalar leaves carry no
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Object: keys in document order with their subtrees
    Map(Vec<(String, FilterNode)>),
    /// Array
    Sequence(Vec<FilterNode>),
    /// String, number, boolean or null
    Scalar,
}

impl From<&Value> for FilterNode {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => FilterNode::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), FilterNode::from(v)))
                    .collect(),
            ),
            Value::Array(items) => FilterNode::Sequence(items.iter().map(FilterNode::from).collect()),
            _ => FilterNode::Scalar,
        }
    }
}

impl FilterNode {
    /// Collect every object key that is not in `operators`
    ///
    /// Keys are returned with any `.keyword` suffix removed. String values
    /// are never inspected, so a field named only inside a value (for
    /// example the `field` of an `exists` clause) is not reported.
    pub fn field_names(&self, operators: &HashSet<&str>) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(operators, &mut names);
        names
    }

    fn visit(&self, operators: &HashSet<&str>, names: &mut BTreeSet<String>) {
        match self {
            FilterNode::Map(entries) => {
                for (key, child) in entries {
                    if !operators.contains(key.as_str()) {
                        let name = strip_keyword_suffix(key);
                        if !name.is_empty() {
                            names.insert(name.to_string());
                        }
                    }
                    child.visit(operators, names);
                }
            }
            FilterNode::Sequence(items) => {
                for item in items {
                    item.visit(operators, names);
                }
            }
            FilterNode::Scalar => {}
        }
    }
}

/// Drop everything from the first `.keyword` onward
pub fn strip_keyword_suffix(name: &str) -> &str {
    match name.find(KEYWORD_SUFFIX) {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// Field names referenced by a query, using the standard operator list
pub fn extract_field_names(query: &Value) -> BTreeSet<String> {
    FilterNode::from(query).field_names(&OPERATOR_SET)
}

/// Resolve the `_source` projection for exporting input documents
///
/// # Arguments
/// * `job` - Job configuration
/// * `query` - Datafeed query
///
/// # Returns
/// * `Result<Vec<String>>` - Sorted, unique field names
pub fn resolve_source_fields(job: &JobConfig, query: &Value) -> Result<Vec<String>> {
    let mut fields = BTreeSet::new();

    for detector in job.detectors()? {
        for key in DETECTOR_FIELD_KEYS {
            if let Some(name) = detector.get(*key).and_then(Value::as_str) {
                fields.insert(strip_keyword_suffix(name).to_string());
            }
        }
    }

    for influencer in job.influencers() {
        fields.insert(strip_keyword_suffix(influencer).to_string());
    }

    fields.insert(job.time_field()?);
    fields.extend(extract_field_names(query));
    fields.remove("");

    Ok(fields.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_skips_operators_and_values() {
        let query = json!({
            "bool": {
                "must": [
                    {"term": {"service.keyword": "checkout"}},
                    {"range": {"latency": {"gte": 10}}}
                ],
                "must_not": [{"exists": {"field": "debug_flag"}}]
            }
        });
        let names = extract_field_names(&query);
        // "field" is a key, "debug_flag" is only a value
        let expected: BTreeSet<String> = ["field", "gte", "latency", "service"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, expected);
        for op in KNOWN_OPERATORS {
            assert!(!names.contains(*op));
        }
    }

    #[test]
    fn test_extract_match_all_is_empty() {
        assert!(extract_field_names(&json!({"match_all": {}})).is_empty());
        assert!(extract_field_names(&json!("status")).is_empty());
        assert!(extract_field_names(&json!([])).is_empty());
    }

    #[test]
    fn test_extract_deep_nesting() {
        let mut query = json!({"region": "eu"});
        for _ in 0..50 {
            query = json!({"bool": {"filter": [query]}});
        }
        let names = extract_field_names(&query);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["region".to_string()]);
    }

    #[test]
    fn test_strip_keyword_suffix() {
        assert_eq!(strip_keyword_suffix("host.keyword"), "host");
        assert_eq!(strip_keyword_suffix("host"), "host");
        assert_eq!(strip_keyword_suffix("a.keyword.raw"), "a");
    }

    #[test]
    fn test_filter_node_shape() {
        let node = FilterNode::from(&json!({"a": [1, {"b": null}]}));
        assert_eq!(
            node,
            FilterNode::Map(vec![(
                "a".to_string(),
                FilterNode::Sequence(vec![
                    FilterNode::Scalar,
                    FilterNode::Map(vec![("b".to_string(), FilterNode::Scalar)])
                ])
            )])
        );
    }

    fn job(detector: Value, influencers: Value) -> JobConfig {
        JobConfig::new(json!({
            "job_id": "j",
            "analysis_config": {"detectors": [detector], "influencers": influencers},
            "data_description": {"time_field": "timestamp"}
        }))
    }

    #[test]
    fn test_resolve_source_fields() {
        let job = job(
            json!({"function": "count", "by_field_name": "host.keyword", "over_field_name": "user"}),
            json!(["host", "region"]),
        );
        let query = json!({"bool": {"filter": [{"term": {"region.keyword": "eu"}}, {"term": {"env": "prod"}}]}});
        let fields = resolve_source_fields(&job, &query).unwrap();
        assert_eq!(fields, vec!["@timestamp", "env", "host", "region", "user"]);
    }

    #[test]
    fn test_resolve_keyword_duplicate_is_invariant() {
        let base = job(json!({"field_name": "bytes"}), json!(["client"]));
        let dup = job(json!({"field_name": "bytes"}), json!(["client", "client.keyword"]));
        let query = json!({"match_all": {}});
        assert_eq!(
            resolve_source_fields(&base, &query).unwrap(),
            resolve_source_fields(&dup, &query).unwrap()
        );
    }

    #[test]
    fn test_resolve_without_optional_keys() {
        let job = job(json!({"function": "count"}), json!(null));
        let fields = resolve_source_fields(&job, &json!({"match_all": {}})).unwrap();
        assert_eq!(fields, vec!["@timestamp"]);
    }

    #[test]
    fn test_resolve_requires_time_field() {
        let job = JobConfig::new(json!({"analysis_config": {"detectors": []}}));
        assert!(resolve_source_fields(&job, &json!({})).is_err());
    }
}
