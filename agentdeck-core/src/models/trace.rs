use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Error => "error",
        }
    }
}

/// Span type. Unrecognised values from newer backends land in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Generation,
    ToolCall,
    Event,
    #[default]
    #[serde(other)]
    Other,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Generation => "generation",
            SpanKind::ToolCall => "tool_call",
            SpanKind::Event => "event",
            SpanKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanError {
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SpanError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub name: String,
    pub status: TraceStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub spans: Vec<TraceSpan>,
}

impl Trace {
    pub fn is_running(&self) -> bool {
        self.status == TraceStatus::Running
    }

    /// Number of spans carrying an error.
    pub fn error_count(&self) -> usize {
        self.spans.iter().filter(|s| s.error.is_some()).count()
    }

    /// Span counts per type, in first-seen order.
    pub fn kind_counts(&self) -> Vec<(SpanKind, usize)> {
        let mut counts: Vec<(SpanKind, usize)> = Vec::new();
        for span in &self.spans {
            match counts.iter_mut().find(|(k, _)| *k == span.kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((span.kind, 1)),
            }
        }
        counts
    }
}

impl crate::pagination::Identified for Trace {
    fn item_id(&self) -> &str {
        &self.id
    }
}

/// `GET /api/traces` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceList {
    #[serde(default)]
    pub traces: Vec<Trace>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub total_traces: u64,
    pub running_traces: u64,
    /// Fraction of traces that ended in error, 0.0 to 1.0.
    pub error_rate: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTraceResponse {
    pub status: String,
    pub id: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // TEST 1: Span with only required fields
    // ========================================================================
    #[test]
    fn test_span_deserializes_minimal_shape() {
        let span: TraceSpan = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "parent_id": null,
            "name": "llm.call",
            "type": "generation",
            "start_time": "2026-03-01T10:00:00Z",
            "duration_ms": 120
        }))
        .unwrap();

        assert_eq!(span.kind, SpanKind::Generation);
        assert!(span.parent_id.is_none());
        assert!(span.events.is_empty());
        assert!(span.attributes.is_empty());
    }

    // ========================================================================
    // TEST 2: Unknown span type maps to other
    // ========================================================================
    #[test]
    fn test_unknown_span_type_maps_to_other() {
        let span: TraceSpan = serde_json::from_value(serde_json::json!({
            "id": "s1",
            "name": "retriever",
            "type": "retrieval",
            "start_time": "2026-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(span.kind, SpanKind::Other);
        assert_eq!(span.duration_ms, 0);
    }

    // ========================================================================
    // TEST 3: Span error reads the type field
    // ========================================================================
    #[test]
    fn test_span_error_type_field() {
        let span: TraceSpan = serde_json::from_value(serde_json::json!({
            "id": "s2",
            "parent_id": "s1",
            "name": "search",
            "type": "tool_call",
            "start_time": "2026-03-01T10:00:00Z",
            "duration_ms": 5,
            "error": {"message": "timeout", "type": "TimeoutError"},
            "events": [{"name": "retry", "timestamp": "2026-03-01T10:00:01Z"}]
        }))
        .unwrap();
        let error = span.error.unwrap();
        assert_eq!(error.message, "timeout");
        assert_eq!(error.kind.as_deref(), Some("TimeoutError"));
        assert_eq!(span.events.len(), 1);
    }

    // ========================================================================
    // TEST 4: Kind counts and error count
    // ========================================================================
    #[test]
    fn test_trace_kind_counts_and_errors() {
        let trace: Trace = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "run",
            "status": "error",
            "start_time": "2026-03-01T10:00:00Z",
            "duration_ms": 900,
            "spans": [
                {"id": "a", "name": "a", "type": "generation", "start_time": "2026-03-01T10:00:00Z"},
                {"id": "b", "name": "b", "type": "tool_call", "start_time": "2026-03-01T10:00:00Z",
                 "error": {"message": "boom"}},
                {"id": "c", "name": "c", "type": "generation", "start_time": "2026-03-01T10:00:00Z"}
            ]
        }))
        .unwrap();

        assert!(!trace.is_running());
        assert_eq!(trace.error_count(), 1);
        assert_eq!(
            trace.kind_counts(),
            vec![(SpanKind::Generation, 2), (SpanKind::ToolCall, 1)]
        );
    }
}
