//! Plain-text rendering for the `agentdeck` commands.

use std::fmt::Write;

use agentdeck_core::memory::MemoryRecord;
use agentdeck_core::models::{SubAgentInfo, Trace, TraceSpan, TraceStats};
use agentdeck_core::pagination::PaginationState;
use agentdeck_core::router::ToolInvocation;
use agentdeck_core::trace_tree::SpanForest;
use agentdeck_client::HealthState;

const ERROR_MARKER: &str = "✗";

pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.2}s", ms as f64 / 1000.0)
    }
}

/// First `max` chars of `s`, with an ellipsis when cut.
pub fn truncate(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Span counts per type plus errors, e.g. `generation×2 tool_call×1, 1 error`.
pub fn trace_summary(trace: &Trace) -> String {
    let mut out = trace
        .kind_counts()
        .iter()
        .map(|(kind, n)| format!("{}×{n}", kind.as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    if out.is_empty() {
        out.push_str("no spans");
    }
    match trace.error_count() {
        0 => {}
        1 => out.push_str(", 1 error"),
        n => {
            let _ = write!(out, ", {n} errors");
        }
    }
    out
}

pub fn trace_row(trace: &Trace) -> String {
    format!(
        "{:<36}  {:<9}  {:>8}  {}  ({})",
        trace.id,
        trace.status.as_str(),
        format_duration(trace.duration_ms),
        trace.name,
        trace_summary(trace)
    )
}

fn span_line(depth: usize, span: &TraceSpan) -> String {
    let marker = if span.error.is_some() { ERROR_MARKER } else { "•" };
    let mut line = format!(
        "{}{marker} {} [{}] {}",
        "  ".repeat(depth),
        span.name,
        span.kind.as_str(),
        format_duration(span.duration_ms)
    );
    if let Some(err) = &span.error {
        let _ = write!(line, "  {}", truncate(&err.message, 80));
    }
    line
}

/// Header plus the indented span tree, depth-first.
pub fn trace_tree(trace: &Trace) -> String {
    let mut out = format!(
        "{} {} [{}] {}\n",
        trace.id,
        trace.name,
        trace.status.as_str(),
        format_duration(trace.duration_ms)
    );
    if let Some(conv) = &trace.conversation_id {
        let _ = writeln!(out, "conversation: {conv}");
    }

    let forest = SpanForest::build(&trace.spans);
    if forest.is_empty() {
        out.push_str("(no spans)\n");
        return out;
    }
    for (depth, span) in forest.walk() {
        out.push_str(&span_line(depth, span));
        out.push('\n');
    }

    let detached = forest.detached();
    if !detached.is_empty() {
        let _ = writeln!(out, "({} spans unreachable: parent cycle)", detached.len());
        for span in detached {
            out.push_str(&span_line(1, span));
            out.push('\n');
        }
    }
    out
}

pub fn page_footer(state: &PaginationState) -> String {
    format!(
        "Page {}/{} ({} total)",
        state.current_page(),
        state.total_pages().max(1),
        state.total()
    )
}

pub fn stats(stats: &TraceStats) -> String {
    format!(
        "Total traces:   {}\nRunning:        {}\nError rate:     {:.1}%\nAvg duration:   {}",
        stats.total_traces,
        stats.running_traces,
        stats.error_rate * 100.0,
        format_duration(stats.avg_duration_ms.round().max(0.0) as u64)
    )
}

pub fn memory_record(record: &MemoryRecord) -> String {
    match record {
        MemoryRecord::Conversation(c) => {
            let mut line = format!(
                "{}  {} messages  {}",
                c.id,
                c.message_count,
                c.last_activity.format("%Y-%m-%d %H:%M")
            );
            if let Some(last) = &c.last_message {
                let _ = write!(line, "  \"{}\"", truncate(last, 60));
            }
            line
        }
        MemoryRecord::Message(m) => format!(
            "[{}] {}: {}",
            m.timestamp.format("%Y-%m-%d %H:%M:%S"),
            m.role.as_str(),
            truncate(&m.content, 200)
        ),
    }
}

pub fn sub_agent(agent: &SubAgentInfo) -> String {
    let mut line = format!("{}  {}", agent.id, agent.name);
    if let Some(status) = &agent.status {
        let _ = write!(line, "  [{status}]");
    }
    if let Some(desc) = &agent.description {
        let _ = write!(line, "\n    {}", truncate(desc, 100));
    }
    if !agent.capabilities.is_empty() {
        let _ = write!(line, "\n    capabilities: {}", agent.capabilities.join(", "));
    }
    line
}

pub fn tool_call(call: &ToolInvocation) -> String {
    let mut line = format!("[tool] {}({})", call.name, truncate(&call.arguments.to_string(), 120));
    if let Some(result) = &call.result {
        let _ = write!(line, " -> {}", truncate(&result.to_string(), 120));
    }
    line
}

pub fn health(state: &HealthState) -> String {
    match state {
        HealthState::Unknown => "Backend: checking…".to_string(),
        HealthState::Healthy(s) => format!("Backend: {} ({})", s.status, s.timestamp.to_rfc3339()),
        HealthState::Degraded(s) => {
            format!("Backend: {} {ERROR_MARKER} ({})", s.status, s.timestamp.to_rfc3339())
        }
        HealthState::Unreachable {
            error,
            attempts,
            checked_at,
        } => format!(
            "Backend: unreachable after {attempts} attempts at {}: {error}",
            checked_at.to_rfc3339()
        ),
    }
}
