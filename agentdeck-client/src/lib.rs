pub mod client;
pub mod error;
pub mod monitor;
pub mod sources;

pub use client::{AgentClient, AgentEventStream};
pub use error::ClientError;
pub use monitor::{check_health, HealthMonitor, HealthState, TaskHandle, TraceAutoRefresh};
pub use sources::{
    delete_trace_and_refresh, MemoryCollection, MemorySource, TraceCollection, TraceSource,
};
