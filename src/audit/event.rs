//! Audit event schema
//!
//! One JSON object per line: `{"timestamp": ..., "event": "<kind>", ...}`.
//! Egress and blocked events carry metadata only: never response bodies and
//! never unsanitized query text.

use crate::policy::SecurityMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum characters of local query text kept in `rag_query` events
///
/// Independent of the sanitizer's `max_query_length`.
pub const QUERY_LOG_MAX_CHARS: usize = 200;

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event was recorded (UTC, ISO-8601)
    pub timestamp: DateTime<Utc>,

    /// Kind-specific payload, tagged by `event`
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

/// Kind-specific audit fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// An allowed request completed (successfully or not)
    NetworkEgress {
        request_id: String,
        method: String,
        /// Post-sanitization URL
        url: String,
        /// `None` when the transport failed before a response
        status_code: Option<u16>,
        response_size_bytes: u64,
        execution_time_ms: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A request was denied by policy
    NetworkBlocked {
        request_id: String,
        host: String,
        mode: SecurityMode,
    },

    /// A local retrieval query was executed
    #[serde(rename = "rag_query")]
    QueryIssued {
        query: String,
        num_results: usize,
        execution_time_ms: f64,
    },

    /// A local model produced output
    ModelInference {
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        inference_time_ms: f64,
    },

    /// Outcome of one self-test check
    SelfTestResult {
        name: String,
        passed: bool,
        message: String,
    },

    /// A document was ingested into the local index
    DocumentIngestion {
        source_path: String,
        doc_type: String,
        num_chunks: usize,
    },

    /// A collaborator reported a system error
    Error {
        error_type: String,
        message: String,
    },
}

impl AuditEventKind {
    /// The `event` tag as written to the log
    pub fn name(&self) -> &'static str {
        match self {
            Self::NetworkEgress { .. } => "network_egress",
            Self::NetworkBlocked { .. } => "network_blocked",
            Self::QueryIssued { .. } => "rag_query",
            Self::ModelInference { .. } => "model_inference",
            Self::SelfTestResult { .. } => "self_test_result",
            Self::DocumentIngestion { .. } => "document_ingestion",
            Self::Error { .. } => "error",
        }
    }
}

pub(crate) fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

impl AuditEvent {
    /// Stamp a kind with the current time
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The `event` tag as written to the log
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub(crate) fn network_egress(
        request_id: &str,
        method: &str,
        url: &str,
        status_code: Option<u16>,
        response_size_bytes: u64,
        elapsed: Duration,
        error: Option<&str>,
    ) -> Self {
        Self::new(AuditEventKind::NetworkEgress {
            request_id: request_id.to_string(),
            method: method.to_string(),
            url: url.to_string(),
            status_code,
            response_size_bytes,
            execution_time_ms: duration_ms(elapsed),
            error: error.map(str::to_string),
        })
    }

    pub(crate) fn network_blocked(request_id: &str, host: &str, mode: SecurityMode) -> Self {
        Self::new(AuditEventKind::NetworkBlocked {
            request_id: request_id.to_string(),
            host: host.to_string(),
            mode,
        })
    }

    /// Local query event; the query is truncated to [`QUERY_LOG_MAX_CHARS`]
    pub fn query_issued(query: &str, num_results: usize, elapsed: Duration) -> Self {
        Self::new(AuditEventKind::QueryIssued {
            query: query.chars().take(QUERY_LOG_MAX_CHARS).collect(),
            num_results,
            execution_time_ms: duration_ms(elapsed),
        })
    }

    pub fn model_inference(
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        elapsed: Duration,
    ) -> Self {
        Self::new(AuditEventKind::ModelInference {
            model: model.into(),
            input_tokens,
            output_tokens,
            inference_time_ms: duration_ms(elapsed),
        })
    }

    pub fn self_test_result(
        name: impl Into<String>,
        passed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self::new(AuditEventKind::SelfTestResult {
            name: name.into(),
            passed,
            message: message.into(),
        })
    }

    pub fn document_ingestion(
        source_path: impl Into<String>,
        doc_type: impl Into<String>,
        num_chunks: usize,
    ) -> Self {
        Self::new(AuditEventKind::DocumentIngestion {
            source_path: source_path.into(),
            doc_type: doc_type.into(),
            num_chunks,
        })
    }

    pub fn error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AuditEventKind::Error {
            error_type: error_type.into(),
            message: message.into(),
        })
    }

    /// Serialize as a single log line (no trailing newline)
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one log line
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_egress_line_fields() {
        let event = AuditEvent::network_egress(
            "req-1",
            "GET",
            "https://arxiv.org/x?q=rag",
            Some(200),
            1234,
            Duration::from_millis(42),
            None,
        );
        let value: serde_json::Value = serde_json::from_str(&event.to_line().unwrap()).unwrap();
        assert_eq!(value["event"], "network_egress");
        assert_eq!(value["method"], "GET");
        assert_eq!(value["url"], "https://arxiv.org/x?q=rag");
        assert_eq!(value["status_code"], 200);
        assert_eq!(value["response_size_bytes"], 1234);
        assert_eq!(value["execution_time_ms"], 42.0);
        assert!(value.get("error").is_none());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_failed_egress_has_null_status() {
        let event = AuditEvent::network_egress(
            "req-2",
            "GET",
            "https://arxiv.org/",
            None,
            0,
            Duration::from_secs(10),
            Some("timeout"),
        );
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert!(value["status_code"].is_null());
        assert_eq!(value["error"], "timeout");
    }

    #[test]
    fn test_blocked_line_fields() {
        let event = AuditEvent::network_blocked("req-3", "example.com", SecurityMode::Offline);
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "network_blocked");
        assert_eq!(value["host"], "example.com");
        assert_eq!(value["mode"], "offline");
    }

    #[test]
    fn test_query_issued_truncates_to_200() {
        let event = AuditEvent::query_issued(&"q".repeat(500), 3, Duration::from_millis(5));
        let AuditEventKind::QueryIssued { query, .. } = &event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(query.chars().count(), QUERY_LOG_MAX_CHARS);
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "rag_query");
    }

    #[test]
    fn test_line_parse_back() {
        let event = AuditEvent::self_test_result("query_sanitization", true, "ok");
        let parsed = AuditEvent::from_line(&format!("{}\n", event.to_line().unwrap())).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.name(), "self_test_result");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let line = r#"{"timestamp":"2024-01-01T00:00:00Z","event":"mystery"}"#;
        assert!(AuditEvent::from_line(line).is_err());
    }
}
