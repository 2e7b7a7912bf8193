use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error information extracted from Elasticsearch error bodies.
///
/// Serialized into the `Display` output of [`crate::error::JobStateError::Api`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) root_cause: Option<RootCause>,
}

/// First root cause reported by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) index: Option<String>,
}

impl ErrorInfo {
    /// Build error info from an HTTP status and the raw response body.
    ///
    /// Elasticsearch reports errors either as
    /// `{"error": {"type": .., "reason": .., "root_cause": [..]}, "status": ..}`
    /// or, for a few endpoints, as `{"error": "text"}`. Bodies that are not
    /// JSON at all are kept verbatim as the reason.
    pub fn from_response(status: u16, body: &str) -> Self {
        let mut info = ErrorInfo {
            status: Some(status),
            ..Default::default()
        };

        let parsed: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => {
                let trimmed = body.trim();
                if !trimmed.is_empty() {
                    info.reason = Some(trimmed.to_string());
                }
                return info;
            }
        };

        match parsed.get("error") {
            Some(Value::Object(err)) => {
                info.error_type = err.get("type").and_then(Value::as_str).map(str::to_string);
                info.reason = err.get("reason").and_then(Value::as_str).map(str::to_string);
                info.root_cause = err
                    .get("root_cause")
                    .and_then(Value::as_array)
                    .and_then(|causes| causes.first())
                    .map(extract_root_cause);
            }
            Some(Value::String(msg)) => info.reason = Some(msg.clone()),
            _ => info.reason = Some(parsed.to_string()),
        }

        info
    }

    /// HTTP status code, when known.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Human-readable reason, when known.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

fn extract_root_cause(cause: &Value) -> RootCause {
    RootCause {
        error_type: cause.get("type").and_then(Value::as_str).map(str::to_string),
        reason: cause.get("reason").and_then(Value::as_str).map(str::to_string),
        index: cause.get("index").and_then(Value::as_str).map(str::to_string),
    }
}

/// Format API errors as pretty JSON wrapped in an `error` field.
///
/// Intended to be used by the parent module's `Display` implementation for
/// `JobStateError::Api`.
pub fn format_api_error(f: &mut fmt::Formatter<'_>, info: &ErrorInfo) -> fmt::Result {
    let wrapper = serde_json::json!({ "error": info });
    let json_output = serde_json::to_string_pretty(&wrapper).map_err(|_| fmt::Error)?;
    write!(f, "\n{json_output}")
}
