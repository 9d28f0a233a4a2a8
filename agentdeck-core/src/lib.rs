pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod pagination;
pub mod router;
pub mod sse;
pub mod trace_tree;

pub use config::AgentDeckConfig;
pub use error::{DeckError, StreamError};
pub use memory::{MemoryListResponse, MemoryListing, MemoryMode, MemoryRecord};
pub use pagination::{
    FetchMode, FetchTicket, Identified, Page, PageSource, PaginatedCollection, PaginationState,
};
pub use router::{AgentEvent, EventKind, EventRouter, StreamEvent, StreamState, ToolInvocation};
pub use sse::{SseCodec, SseRecord, SseStream, DONE_SENTINEL};
pub use trace_tree::{SpanForest, SpanNode};
