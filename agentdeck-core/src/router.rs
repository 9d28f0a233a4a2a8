//! Classifies decoded stream records into agent events and folds them into
//! consumer state, strictly in arrival order.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures::Stream;
use serde_json::Value;

use crate::sse::SseRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MessageDelta,
    ToolInvocation,
    Completion,
    Error,
    StreamEnd,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    MessageDelta { content: String },
    ToolInvocation(ToolInvocation),
    Completion { response: Option<String>, payload: Value },
    Error { message: String, payload: Value },
    StreamEnd,
    /// A record whose kind or shape the client does not model.
    Unknown { event: Option<String>, payload: Value },
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::MessageDelta { .. } => EventKind::MessageDelta,
            AgentEvent::ToolInvocation(_) => EventKind::ToolInvocation,
            AgentEvent::Completion { .. } => EventKind::Completion,
            AgentEvent::Error { .. } => EventKind::Error,
            AgentEvent::StreamEnd => EventKind::StreamEnd,
            AgentEvent::Unknown { .. } => EventKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub id: Option<String>,
    pub payload: AgentEvent,
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    fn end() -> Self {
        Self {
            id: None,
            payload: AgentEvent::StreamEnd,
        }
    }
}

/// Lowercase, with `-` and `.` folded to `_`.
fn normalize_kind(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { '_' } else { c })
        .collect()
}

fn first_str(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn first_value(data: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|k| data.get(*k)).cloned()
}

fn delta_text(data: &Value) -> Option<String> {
    match data {
        Value::String(s) => Some(s.clone()),
        _ => first_str(data, &["content", "delta", "text", "token"]),
    }
}

fn error_message(data: &Value) -> String {
    if let Some(s) = data.as_str() {
        return s.to_string();
    }
    if let Some(m) = first_str(data, &["message", "error", "detail"]) {
        return m;
    }
    data.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

fn unknown(event: Option<String>, data: Value) -> AgentEvent {
    AgentEvent::Unknown {
        event,
        payload: data,
    }
}

/// Classify one record. The kind comes from the `event:` field, falling back
/// to the payload's `type`; records with neither are inferred from shape.
pub fn route(record: SseRecord) -> StreamEvent {
    let SseRecord { event, id, data } = record;
    let name = event
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .map(str::to_string)
        .or_else(|| first_str(&data, &["type"]));

    let payload = match name.as_deref().map(normalize_kind).as_deref() {
        Some("message_delta" | "delta" | "message" | "token" | "content" | "text_delta") => {
            match delta_text(&data) {
                Some(content) => AgentEvent::MessageDelta { content },
                None => unknown(event, data),
            }
        }
        Some(
            "tool_call" | "tool_invocation" | "tool" | "tool_use" | "tool_result",
        ) => match first_str(&data, &["name", "tool", "tool_name"]) {
            Some(tool_name) => AgentEvent::ToolInvocation(ToolInvocation {
                id: first_str(&data, &["id", "call_id", "tool_call_id"]),
                name: tool_name,
                arguments: first_value(&data, &["arguments", "args", "input"])
                    .unwrap_or(Value::Null),
                result: first_value(&data, &["result", "output"]),
            }),
            None => unknown(event, data),
        },
        Some("complete" | "completion" | "completed" | "done" | "final" | "message_complete") => {
            AgentEvent::Completion {
                response: first_str(&data, &["response", "content", "output"]),
                payload: data,
            }
        }
        Some("error") => AgentEvent::Error {
            message: error_message(&data),
            payload: data,
        },
        Some("end" | "stream_end") => AgentEvent::StreamEnd,
        Some(_) => unknown(event, data),
        None => {
            if data.get("error").is_some() {
                AgentEvent::Error {
                    message: error_message(&data),
                    payload: data,
                }
            } else if let Some(content) = delta_text(&data) {
                AgentEvent::MessageDelta { content }
            } else {
                unknown(event, data)
            }
        }
    };

    StreamEvent { id, payload }
}

/// Stream adapter routing every decoded record, in order.
///
/// A clean end of the underlying sequence produces a single trailing
/// [`AgentEvent::StreamEnd`] unless the backend already sent one. After an
/// error nothing further is produced.
pub struct EventRouter<S> {
    inner: S,
    end_sent: bool,
    done: bool,
}

impl<S> EventRouter<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            end_sent: false,
            done: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, E> Stream for EventRouter<S>
where
    S: Stream<Item = Result<SseRecord, E>> + Unpin,
{
    type Item = Result<StreamEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
            Some(Ok(record)) => {
                let event = route(record);
                if event.kind() == EventKind::StreamEnd {
                    self.end_sent = true;
                }
                Poll::Ready(Some(Ok(event)))
            }
            Some(Err(e)) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.done = true;
                if self.end_sent {
                    Poll::Ready(None)
                } else {
                    self.end_sent = true;
                    Poll::Ready(Some(Ok(StreamEvent::end())))
                }
            }
        }
    }
}

/// Consumer-side fold of routed events, applied in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub completion: Option<Value>,
    pub error: Option<String>,
    pub finished: bool,
    pub last_event_id: Option<String>,
    pub unknown_events: usize,
    pub applied: usize,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        self.applied += 1;
        if let Some(id) = &event.id {
            self.last_event_id = Some(id.clone());
        }

        match &event.payload {
            AgentEvent::MessageDelta { content } => self.text.push_str(content),
            AgentEvent::ToolInvocation(call) => {
                // a result for an already-announced call updates it in place
                let existing = call.id.as_ref().and_then(|id| {
                    self.tool_calls
                        .iter_mut()
                        .find(|c| c.id.as_ref() == Some(id))
                });
                match existing {
                    Some(prev) => {
                        if call.result.is_some() {
                            prev.result = call.result.clone();
                        }
                        if !call.arguments.is_null() {
                            prev.arguments = call.arguments.clone();
                        }
                    }
                    None => self.tool_calls.push(call.clone()),
                }
            }
            AgentEvent::Completion { response, payload } => {
                if self.text.is_empty() {
                    if let Some(r) = response {
                        self.text = r.clone();
                    }
                }
                self.completion = Some(payload.clone());
            }
            AgentEvent::Error { message, .. } => self.error = Some(message.clone()),
            AgentEvent::StreamEnd => self.finished = true,
            AgentEvent::Unknown { event, .. } => {
                tracing::debug!(event = ?event, "Unrecognised stream event");
                self.unknown_events += 1;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseStream;
    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::json;

    fn record(event: Option<&str>, data: Value) -> SseRecord {
        SseRecord {
            event: event.map(str::to_string),
            id: None,
            data,
        }
    }

    // ========================================================================
    // TEST 1: event field selects the kind
    // ========================================================================
    #[test]
    fn test_event_field_selects_kind() {
        let e = route(record(Some("message_delta"), json!({"content": "Hel"})));
        assert_eq!(
            e.payload,
            AgentEvent::MessageDelta {
                content: "Hel".to_string()
            }
        );
    }

    // ========================================================================
    // TEST 2: Payload type is used without an event field
    // ========================================================================
    #[test]
    fn test_payload_type_used_when_event_missing() {
        let e = route(record(
            None,
            json!({"type": "tool_call", "id": "c1", "name": "search", "arguments": {"q": "rust"}}),
        ));
        match e.payload {
            AgentEvent::ToolInvocation(call) => {
                assert_eq!(call.id.as_deref(), Some("c1"));
                assert_eq!(call.name, "search");
                assert_eq!(call.arguments, json!({"q": "rust"}));
                assert!(call.result.is_none());
            }
            other => panic!("expected tool invocation, got {other:?}"),
        }
    }

    // ========================================================================
    // TEST 3: Kind names are normalized
    // ========================================================================
    #[test]
    fn test_kind_names_are_normalized() {
        let e = route(record(Some("Tool-Call"), json!({"tool": "calc"})));
        assert_eq!(e.kind(), EventKind::ToolInvocation);
    }

    // ========================================================================
    // TEST 4: Error message extraction
    // ========================================================================
    #[test]
    fn test_error_message_extraction() {
        let nested = route(record(Some("error"), json!({"error": {"message": "rate limited"}})));
        assert_eq!(
            nested.payload,
            AgentEvent::Error {
                message: "rate limited".to_string(),
                payload: json!({"error": {"message": "rate limited"}}),
            }
        );

        let flat = route(record(None, json!({"error": "backend down"})));
        match flat.payload {
            AgentEvent::Error { message, .. } => assert_eq!(message, "backend down"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    // ========================================================================
    // TEST 5: Unknown kind keeps the payload
    // ========================================================================
    #[test]
    fn test_unknown_kind_keeps_payload() {
        let e = route(record(Some("heartbeat"), json!({"seq": 3})));
        assert_eq!(
            e.payload,
            AgentEvent::Unknown {
                event: Some("heartbeat".to_string()),
                payload: json!({"seq": 3}),
            }
        );
    }

    // ========================================================================
    // TEST 6: Known kind with the wrong shape is unknown
    // ========================================================================
    #[test]
    fn test_known_kind_with_wrong_shape_is_unknown() {
        let e = route(record(Some("tool_call"), json!({"arguments": {}})));
        assert_eq!(e.kind(), EventKind::Unknown);
    }

    // ========================================================================
    // TEST 7: Shape inference without a kind
    // ========================================================================
    #[test]
    fn test_shape_inference_without_kind() {
        assert_eq!(
            route(record(None, json!({"content": "hi"}))).kind(),
            EventKind::MessageDelta
        );
        assert_eq!(
            route(record(None, json!({"foo": 1}))).kind(),
            EventKind::Unknown
        );
        assert_eq!(
            route(record(None, json!("plain text"))).kind(),
            EventKind::MessageDelta
        );
    }

    // ========================================================================
    // TEST 8: State fold applies events in order
    // ========================================================================
    #[test]
    fn test_fold_applies_events_in_order() {
        let mut state = StreamState::new();
        let events = vec![
            route(record(Some("message_delta"), json!({"content": "Hello"}))),
            route(record(Some("tool_call"), json!({"id": "c1", "name": "search"}))),
            route(record(Some("message_delta"), json!({"content": ", world"}))),
            route(record(
                Some("tool_result"),
                json!({"id": "c1", "name": "search", "result": ["hit"]}),
            )),
            route(record(Some("completion"), json!({"response": "ignored", "tokens": 9}))),
            route(record(Some("end"), json!({}))),
        ];
        for e in &events {
            state.apply(e);
        }

        assert_eq!(state.text, "Hello, world");
        assert_eq!(state.tool_calls.len(), 1);
        assert_eq!(state.tool_calls[0].result, Some(json!(["hit"])));
        assert_eq!(state.completion, Some(json!({"response": "ignored", "tokens": 9})));
        assert!(state.finished);
        assert_eq!(state.applied, 6);
    }

    // ========================================================================
    // TEST 9: Completion fills text when no deltas arrived
    // ========================================================================
    #[test]
    fn test_completion_fills_text_when_no_deltas() {
        let mut state = StreamState::new();
        state.apply(&route(record(Some("completion"), json!({"response": "Final answer"}))));
        assert_eq!(state.text, "Final answer");
    }

    // ========================================================================
    // TEST 10: Router appends one stream end
    // ========================================================================
    #[tokio::test]
    async fn test_router_appends_single_stream_end() {
        let body = "event: message_delta\ndata: {\"content\":\"a\"}\n\nid: 9\ndata: {\"content\":\"b\"}\n\ndata: [DONE]\n\n";
        let sse = SseStream::from_chunks(futures::stream::iter(vec![Ok::<_, std::io::Error>(
            Bytes::from_static(body.as_bytes()),
        )]));
        let events: Vec<StreamEvent> = EventRouter::new(sse).map(|e| e.unwrap()).collect().await;

        let kinds: Vec<EventKind> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::MessageDelta,
                EventKind::MessageDelta,
                EventKind::StreamEnd
            ]
        );
        assert_eq!(events[1].id.as_deref(), Some("9"));
    }

    // ========================================================================
    // TEST 11: Router keeps the backend's own end
    // ========================================================================
    #[tokio::test]
    async fn test_router_does_not_duplicate_backend_end() {
        let records = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(record(Some("end"), json!({}))),
        ]);
        let events: Vec<_> = EventRouter::new(records).collect().await;
        assert_eq!(events.len(), 1);
    }

    // ========================================================================
    // TEST 12: Router stops after an error
    // ========================================================================
    #[tokio::test]
    async fn test_router_stops_after_error() {
        let records = futures::stream::iter(vec![
            Ok(record(Some("message_delta"), json!({"content": "a"}))),
            Err("connection reset"),
        ]);
        let events: Vec<_> = EventRouter::new(records).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }
}
