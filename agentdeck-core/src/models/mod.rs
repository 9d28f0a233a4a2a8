pub mod agent;
pub mod memory;
pub mod trace;

pub use agent::{
    AgentRequest, AgentResponse, DelegateRequest, DelegateResponse, HealthStatus, SubAgentInfo,
    SubAgentList,
};
pub use memory::{ConversationInfo, MemoryEntry, MemorySearchResponse, Role};
pub use trace::{
    DeleteTraceResponse, SpanError, SpanEvent, SpanKind, Trace, TraceList, TraceSpan, TraceStats,
    TraceStatus,
};
