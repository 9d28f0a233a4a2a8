//! agentdeck: terminal console for an agent backend
//!
//! # Subcommands
//! - `health [--watch]`: backend health, optionally polled
//! - `traces list|show|delete|stats`: browse and manage execution traces
//! - `memory list|search`: conversation memory
//! - `agents list|delegate`: sub-agents
//! - `run <message>` / `stream <message>`: run the agent, whole or streamed

mod render;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use agentdeck_client::{
    check_health, delete_trace_and_refresh, AgentClient, HealthMonitor, HealthState, MemorySource,
    TraceAutoRefresh, TraceSource,
};
use agentdeck_core::models::{AgentRequest, DelegateRequest};
use agentdeck_core::pagination::PaginatedCollection;
use agentdeck_core::router::{AgentEvent, StreamState};
use agentdeck_core::AgentDeckConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG: &str = "agentdeck.toml";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "agentdeck", version, about = "Inspect agent traces, memory and live runs")]
struct Cli {
    /// Config file (TOML); missing file means defaults
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Backend URL (overrides api.base_url)
    #[arg(long, env = "AGENTDECK_SERVER")]
    server: Option<String>,

    /// Print raw JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show backend health
    Health {
        /// Keep polling and print every change
        #[arg(long)]
        watch: bool,
    },

    /// Execution traces
    Traces {
        #[command(subcommand)]
        command: TraceCommand,
    },

    /// Conversation memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },

    /// Sub-agents
    Agents {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Run the agent and print the full response
    Run {
        message: String,
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Run the agent, printing output as it streams
    Stream {
        message: String,
        #[arg(long)]
        conversation: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum TraceCommand {
    /// List one page of traces
    List {
        /// 1-based page number
        #[arg(short, long, default_value_t = 1)]
        page: u64,
        #[arg(short = 'n', long)]
        limit: Option<u64>,
        /// Re-fetch while any trace on the page is running
        #[arg(long)]
        follow: bool,
    },
    /// Show one trace as a span tree
    Show { id: String },
    /// Delete a trace and re-list its page
    Delete {
        id: String,
        #[arg(short, long, default_value_t = 1)]
        page: u64,
        #[arg(short = 'n', long)]
        limit: Option<u64>,
    },
    /// Aggregate trace statistics
    Stats,
}

#[derive(Debug, Subcommand)]
enum MemoryCommand {
    /// List conversations, or messages of one conversation
    List {
        #[arg(long)]
        conversation: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        page: u64,
        #[arg(short = 'n', long)]
        limit: Option<u64>,
    },
    /// Search memory contents
    Search { query: String },
}

#[derive(Debug, Subcommand)]
enum AgentCommand {
    /// List available sub-agents
    List,
    /// Delegate a task to a sub-agent
    Delegate {
        sub_agent_id: String,
        task: String,
        /// Extra context as a JSON value
        #[arg(long)]
        context: Option<String>,
    },
}

fn page_offset(page: u64, limit: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(limit)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn do_health(client: &AgentClient, config: &AgentDeckConfig, watch: bool) -> anyhow::Result<()> {
    if !watch {
        let state = check_health(client, &config.polling).await;
        println!("{}", render::health(&state));
        if !state.is_healthy() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let monitor = HealthMonitor::spawn(client.clone(), config.polling.clone());
    let mut updates = monitor.subscribe();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                if state != HealthState::Unknown {
                    println!("{}", render::health(&state));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }
    monitor.stop().await;
    Ok(())
}

fn print_traces(traces: &PaginatedCollection<TraceSource>, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&traces.items());
    }
    if traces.items().is_empty() {
        println!("No traces.");
    }
    for trace in traces.items() {
        println!("{}", render::trace_row(trace));
    }
    println!("{}", render::page_footer(&traces.state()));
    Ok(())
}

async fn do_traces(
    client: &AgentClient,
    config: &AgentDeckConfig,
    command: TraceCommand,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        TraceCommand::List {
            page,
            limit,
            follow,
        } => {
            let limit = limit.unwrap_or(config.pagination.default_limit);
            let mut traces = PaginatedCollection::new(TraceSource::new(client.clone()), limit)?;
            traces.load_page(page_offset(page, limit)).await?;
            print_traces(&traces, json)?;

            if !follow || !traces.items().iter().any(|t| t.is_running()) {
                return Ok(());
            }

            let traces = Arc::new(Mutex::new(traces));
            let period = Duration::from_secs(config.polling.trace_refresh_seconds);
            let refresher = TraceAutoRefresh::spawn(traces.clone(), period);
            let mut refreshes = refresher.refreshes();
            loop {
                tokio::select! {
                    changed = refreshes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!();
                        print_traces(&*traces.lock().await, json)?;
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            refresher.stop().await;
        }
        TraceCommand::Show { id } => {
            let trace = client.get_trace(&id).await?;
            if json {
                let forest = agentdeck_core::SpanForest::build(&trace.spans);
                print_json(&serde_json::json!({
                    "trace": &trace,
                    "tree": forest.tree(),
                }))?;
            } else {
                print!("{}", render::trace_tree(&trace));
                println!("{}", render::trace_summary(&trace));
            }
        }
        TraceCommand::Delete { id, page, limit } => {
            let limit = limit.unwrap_or(config.pagination.default_limit);
            let mut traces = PaginatedCollection::new(TraceSource::new(client.clone()), limit)?;
            traces.load_page(page_offset(page, limit)).await?;
            let deleted = delete_trace_and_refresh(&mut traces, &id).await?;
            if json {
                print_json(&deleted)?;
            } else {
                println!("Deleted {} ({})", deleted.id, deleted.status);
                print_traces(&traces, false)?;
            }
        }
        TraceCommand::Stats => {
            let stats = client.trace_stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("{}", render::stats(&stats));
            }
        }
    }
    Ok(())
}

async fn do_memory(
    client: &AgentClient,
    config: &AgentDeckConfig,
    command: MemoryCommand,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        MemoryCommand::List {
            conversation,
            page,
            limit,
        } => {
            let limit = limit.unwrap_or(config.pagination.default_limit);
            let offset = page_offset(page, limit);
            if json {
                let raw = client
                    .list_memory(limit, offset, conversation.as_deref())
                    .await?;
                return print_json(&raw);
            }

            let source = match conversation {
                Some(id) => MemorySource::for_conversation(client.clone(), id),
                None => MemorySource::new(client.clone()),
            };
            let mut memory = PaginatedCollection::new(source, limit)?;
            memory.load_page(offset).await?;
            if memory.items().is_empty() {
                println!("No memory entries.");
            }
            for record in memory.items() {
                println!("{}", render::memory_record(record));
            }
            println!("{}", render::page_footer(&memory.state()));
        }
        MemoryCommand::Search { query } => {
            let resp = client.search_memory(&query).await?;
            if json {
                return print_json(&resp);
            }
            if resp.results.is_empty() {
                eprintln!("No results found for: {}", query);
                return Ok(());
            }
            for entry in &resp.results {
                println!(
                    "{}",
                    render::memory_record(&agentdeck_core::MemoryRecord::Message(entry.clone()))
                );
            }
        }
    }
    Ok(())
}

async fn do_agents(client: &AgentClient, command: AgentCommand, json: bool) -> anyhow::Result<()> {
    match command {
        AgentCommand::List => {
            let list = client.list_sub_agents().await?;
            if json {
                return print_json(&list);
            }
            if list.sub_agents.is_empty() {
                println!("No sub-agents registered.");
            }
            for agent in &list.sub_agents {
                println!("{}", render::sub_agent(agent));
            }
        }
        AgentCommand::Delegate {
            sub_agent_id,
            task,
            context,
        } => {
            let context = context
                .map(|c| serde_json::from_str::<serde_json::Value>(&c))
                .transpose()
                .context("--context must be valid JSON")?;
            let resp = client
                .delegate(&DelegateRequest {
                    sub_agent_id,
                    task,
                    context,
                })
                .await?;
            if json {
                return print_json(&resp);
            }
            println!("{} → {}", resp.sub_agent_id, resp.status);
            println!("{}", serde_json::to_string_pretty(&resp.result)?);
        }
    }
    Ok(())
}

fn agent_request(message: String, conversation: Option<String>) -> AgentRequest {
    let request = AgentRequest::new(message);
    match conversation {
        Some(id) => request.with_conversation(id),
        None => request,
    }
}

async fn do_run(client: &AgentClient, request: AgentRequest, json: bool) -> anyhow::Result<()> {
    let resp = client.run_agent(&request).await?;
    if json {
        return print_json(&resp);
    }
    println!("{}", resp.response.as_deref().unwrap_or(""));
    if let Some(trace_id) = &resp.trace_id {
        eprintln!("trace: {trace_id}");
    }
    Ok(())
}

async fn do_stream(client: &AgentClient, request: AgentRequest) -> anyhow::Result<()> {
    let mut events = client.stream_agent(&request).await?;
    let mut state = StreamState::new();
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            next = events.next() => match next {
                Some(event) => event?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stream cancelled");
                break;
            }
        };

        match &event.payload {
            AgentEvent::MessageDelta { content } => {
                print!("{content}");
                stdout.flush()?;
            }
            AgentEvent::ToolInvocation(call) => eprintln!("\n{}", render::tool_call(call)),
            AgentEvent::Completion { response: Some(r), .. } if state.text.is_empty() => {
                print!("{r}");
            }
            AgentEvent::Error { message, .. } => eprintln!("\nagentdeck: agent error: {message}"),
            _ => {}
        }
        state.apply(&event);
    }
    // dropping the stream closes the connection
    drop(events);
    println!();

    if state.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = AgentDeckConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let client = match &cli.server {
        Some(server) => AgentClient::with_base_url(&config.api, server)?,
        None => AgentClient::new(&config.api)?,
    };
    tracing::debug!(base_url = %client.base_url(), "Client ready");

    let result = match cli.command {
        Commands::Health { watch } => do_health(&client, &config, watch).await,
        Commands::Traces { command } => do_traces(&client, &config, command, cli.json).await,
        Commands::Memory { command } => do_memory(&client, &config, command, cli.json).await,
        Commands::Agents { command } => do_agents(&client, command, cli.json).await,
        Commands::Run {
            message,
            conversation,
        } => do_run(&client, agent_request(message, conversation), cli.json).await,
        Commands::Stream {
            message,
            conversation,
        } => do_stream(&client, agent_request(message, conversation)).await,
    };

    if let Err(e) = result {
        eprintln!("agentdeck: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
