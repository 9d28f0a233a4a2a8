//! HTTP client for the agent backend.
//!
//! One `AgentClient` is built from [`ApiConfig`] and shared (it is cheap to
//! clone). Request/response calls are never retried here; a non-2xx status
//! fails the whole call with [`ClientError::Api`].

use std::io;

use agentdeck_core::config::ApiConfig;
use agentdeck_core::memory::MemoryListResponse;
use agentdeck_core::models::{
    AgentRequest, AgentResponse, DelegateRequest, DelegateResponse, DeleteTraceResponse,
    HealthStatus, MemorySearchResponse, SubAgentList, Trace, TraceList, TraceStats,
};
use agentdeck_core::router::EventRouter;
use agentdeck_core::sse::SseStream;
use futures::TryStreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ClientError;

/// Routed events of one `POST /api/agent/stream` call. Dropping it closes
/// the connection.
pub type AgentEventStream = EventRouter<SseStream>;

#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    stream_client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        let text = |v: serde_json::Value| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        };
        self.detail
            .and_then(text)
            .or_else(|| self.error.and_then(text))
            .or(self.message)
    }
}

impl AgentClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ClientError> {
        Self::with_base_url(config, &config.base_url)
    }

    /// Create a client against an explicit base URL (tests, `--server`).
    pub fn with_base_url(config: &ApiConfig, base_url: &str) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url.trim()).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(config.timeout()).build()?;

        // Streaming responses can legitimately outlive the request timeout.
        let mut stream_builder = Client::builder().connect_timeout(config.timeout());
        if let Some(timeout) = config.stream_timeout() {
            stream_builder = stream_builder.timeout(timeout);
        }
        let stream_client = stream_builder.build()?;

        Ok(Self {
            client,
            stream_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
        let response = Self::check(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Turn a non-2xx response into [`ClientError::Api`].
    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(ErrorBody::into_message)
            .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown status").to_string());

        tracing::warn!(status = status.as_u16(), message = %message, "Agent API error");
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    // ========================================================================
    // Memory
    // ========================================================================

    pub async fn list_memory(
        &self,
        limit: u64,
        offset: u64,
        conversation_id: Option<&str>,
    ) -> Result<MemoryListResponse, ClientError> {
        let mut query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(id) = conversation_id {
            query.push(("conversation_id", id.to_string()));
        }
        let url = self.endpoint(&["api", "memory"])?;
        Self::send_json(self.client.get(url).query(&query)).await
    }

    pub async fn search_memory(&self, query: &str) -> Result<MemorySearchResponse, ClientError> {
        let url = self.endpoint(&["api", "memory", "search"])?;
        Self::send_json(self.client.get(url).query(&[("query", query)])).await
    }

    // ========================================================================
    // Sub-agents
    // ========================================================================

    pub async fn list_sub_agents(&self) -> Result<SubAgentList, ClientError> {
        let url = self.endpoint(&["api", "subagents"])?;
        Self::send_json(self.client.get(url)).await
    }

    pub async fn delegate(&self, request: &DelegateRequest) -> Result<DelegateResponse, ClientError> {
        let url = self.endpoint(&["api", "subagents", "delegate"])?;
        tracing::info!(sub_agent = %request.sub_agent_id, "Delegating task");
        Self::send_json(self.client.post(url).json(request)).await
    }

    // ========================================================================
    // Traces
    // ========================================================================

    pub async fn list_traces(&self, limit: u64, offset: u64) -> Result<TraceList, ClientError> {
        let url = self.endpoint(&["api", "traces"])?;
        Self::send_json(self.client.get(url).query(&[("limit", limit), ("offset", offset)])).await
    }

    pub async fn get_trace(&self, id: &str) -> Result<Trace, ClientError> {
        let url = self.endpoint(&["api", "traces", id])?;
        Self::send_json(self.client.get(url)).await
    }

    pub async fn trace_stats(&self) -> Result<TraceStats, ClientError> {
        let url = self.endpoint(&["api", "traces", "stats"])?;
        Self::send_json(self.client.get(url)).await
    }

    pub async fn delete_trace(&self, id: &str) -> Result<DeleteTraceResponse, ClientError> {
        let url = self.endpoint(&["api", "traces", id])?;
        let deleted: DeleteTraceResponse = Self::send_json(self.client.delete(url)).await?;
        tracing::info!(trace_id = %deleted.id, status = %deleted.status, "Trace deleted");
        Ok(deleted)
    }

    // ========================================================================
    // Agent
    // ========================================================================

    pub async fn run_agent(&self, request: &AgentRequest) -> Result<AgentResponse, ClientError> {
        let url = self.endpoint(&["api", "agent", "run"])?;
        Self::send_json(self.client.post(url).json(request)).await
    }

    /// Open a streaming run. Records are decoded lazily as bytes arrive;
    /// the status code is checked before any decoding starts.
    pub async fn stream_agent(&self, request: &AgentRequest) -> Result<AgentEventStream, ClientError> {
        let url = self.endpoint(&["api", "agent", "stream"])?;
        let response = self
            .stream_client
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        tracing::debug!(status = response.status().as_u16(), "Agent stream opened");
        let chunks = response.bytes_stream().map_err(io::Error::other);
        Ok(EventRouter::new(SseStream::from_chunks(chunks)))
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let url = self.endpoint(&["health"])?;
        Self::send_json(self.client.get(url)).await
    }
}
