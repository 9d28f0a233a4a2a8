//! Background polling tasks: the health monitor and trace auto-refresh.
//!
//! Each task is owned by a [`TaskHandle`]. Cancelling the handle, or
//! dropping it, stops the task.

use std::sync::Arc;
use std::time::Duration;

use agentdeck_core::config::PollingConfig;
use agentdeck_core::models::HealthStatus;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::client::AgentClient;
use crate::sources::TraceCollection;

/// Cancellation handle for a spawned polling loop.
pub struct TaskHandle {
    shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(run(rx));
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Ask the loop to stop after its current iteration.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(());
    }

    /// Cancel and wait for the loop to exit.
    pub async fn stop(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Polling task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Health monitor
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum HealthState {
    /// No check has completed yet.
    Unknown,
    Healthy(HealthStatus),
    /// The backend answered, but with a non-healthy status.
    Degraded(HealthStatus),
    Unreachable {
        error: String,
        attempts: usize,
        checked_at: DateTime<Utc>,
    },
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy(_))
    }
}

/// One health check, retried with jittered exponential backoff.
pub async fn check_health(client: &AgentClient, polling: &PollingConfig) -> HealthState {
    let retry_strategy = ExponentialBackoff::from_millis(polling.retry_delay_ms)
        .max_delay(Duration::from_secs(10))
        .map(jitter)
        .take(polling.max_retries);

    match Retry::spawn(retry_strategy, || client.health()).await {
        Ok(status) if status.is_healthy() => HealthState::Healthy(status),
        Ok(status) => {
            tracing::warn!(status = %status.status, "Backend reports degraded health");
            HealthState::Degraded(status)
        }
        Err(e) => {
            let attempts = polling.max_retries + 1;
            tracing::warn!(attempts, error = %e, "Health check failed");
            HealthState::Unreachable {
                error: e.to_string(),
                attempts,
                checked_at: Utc::now(),
            }
        }
    }
}

/// Periodic `GET /health`, publishing the latest result.
pub struct HealthMonitor {
    state: watch::Receiver<HealthState>,
    handle: TaskHandle,
}

impl HealthMonitor {
    /// Start polling immediately, then every `health_interval_seconds`.
    pub fn spawn(client: AgentClient, polling: PollingConfig) -> Self {
        let (tx, state) = watch::channel(HealthState::Unknown);
        let handle =
            TaskHandle::spawn(move |shutdown| run_health_loop(client, polling, tx, shutdown));
        Self { state, handle }
    }

    pub fn latest(&self) -> HealthState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

async fn run_health_loop(
    client: AgentClient,
    polling: PollingConfig,
    tx: watch::Sender<HealthState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_secs(polling.health_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = polling.health_interval_seconds,
        base_url = %client.base_url(),
        "Health monitor started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = check_health(&client, &polling).await;
                tracing::debug!(healthy = state.is_healthy(), "Health check complete");
                tx.send_replace(state);
            }
            _ = shutdown.recv() => {
                tracing::info!("Health monitor shutting down");
                break;
            }
        }
    }
}

// ============================================================================
// Trace auto-refresh
// ============================================================================

/// Re-fetches the current trace page every `period` while any trace on it is
/// still running. Stops by itself once none are.
pub struct TraceAutoRefresh {
    refreshes: watch::Receiver<u64>,
    handle: TaskHandle,
}

impl TraceAutoRefresh {
    /// The first refresh happens one `period` after spawning.
    pub fn spawn(traces: Arc<Mutex<TraceCollection>>, period: Duration) -> Self {
        let (tx, refreshes) = watch::channel(0);
        let handle =
            TaskHandle::spawn(move |shutdown| run_trace_refresh(traces, period, tx, shutdown));
        Self { refreshes, handle }
    }

    /// Count of refreshes applied so far.
    pub fn refreshes(&self) -> watch::Receiver<u64> {
        self.refreshes.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run_trace_refresh(
    traces: Arc<Mutex<TraceCollection>>,
    period: Duration,
    tx: watch::Sender<u64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut traces = traces.lock().await;
                if !traces.items().iter().any(|t| t.is_running()) {
                    tracing::debug!("No running traces, auto-refresh stopped");
                    break;
                }
                match traces.refresh().await {
                    Ok(true) => {
                        tx.send_modify(|n| *n += 1);
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "Trace refresh failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Trace auto-refresh cancelled");
                break;
            }
        }
    }
}
