//! [`PageSource`] adapters binding the paginated listings to the backend.

use agentdeck_core::memory::MemoryRecord;
use agentdeck_core::models::{DeleteTraceResponse, Trace};
use agentdeck_core::pagination::{Page, PageSource, PaginatedCollection};
use async_trait::async_trait;

use crate::client::AgentClient;
use crate::error::ClientError;

/// `GET /api/traces`, one page at a time.
#[derive(Debug, Clone)]
pub struct TraceSource {
    client: AgentClient,
}

impl TraceSource {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }
}

#[async_trait]
impl PageSource for TraceSource {
    type Item = Trace;
    type Error = ClientError;

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<Page<Trace>, ClientError> {
        let list = self.client.list_traces(limit, offset).await?;
        Ok(Page {
            items: list.traces,
            total: list.total,
        })
    }
}

/// `GET /api/memory`, optionally narrowed to one conversation. Rows are
/// conversation summaries or messages depending on the backend's `mode`.
#[derive(Debug, Clone)]
pub struct MemorySource {
    client: AgentClient,
    conversation_id: Option<String>,
}

impl MemorySource {
    pub fn new(client: AgentClient) -> Self {
        Self {
            client,
            conversation_id: None,
        }
    }

    pub fn for_conversation(client: AgentClient, conversation_id: impl Into<String>) -> Self {
        Self {
            client,
            conversation_id: Some(conversation_id.into()),
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }
}

#[async_trait]
impl PageSource for MemorySource {
    type Item = MemoryRecord;
    type Error = ClientError;

    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<Page<MemoryRecord>, ClientError> {
        let resp = self
            .client
            .list_memory(limit, offset, self.conversation_id.as_deref())
            .await?;
        let total = resp.total;
        Ok(Page {
            items: resp.listing().into_records(),
            total,
        })
    }
}

pub type TraceCollection = PaginatedCollection<TraceSource>;
pub type MemoryCollection = PaginatedCollection<MemorySource>;

/// Delete a trace, then re-fetch the loaded pages so the removed row and the
/// new `total` are reflected immediately.
pub async fn delete_trace_and_refresh(
    traces: &mut TraceCollection,
    id: &str,
) -> Result<DeleteTraceResponse, ClientError> {
    let deleted = traces.source().client().delete_trace(id).await?;
    traces.refresh().await?;
    Ok(deleted)
}
