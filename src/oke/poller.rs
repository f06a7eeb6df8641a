//! Poll engine: wait for a work request to reach a terminal state.
//!
//! Distinguishes "the status query failed" (retried with bounded backoff)
//! from "the upgrade failed" (terminal). Every wait is a plain sleep; the
//! per-target deadline bounds the whole loop.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::OkupError;
use crate::oke::client::{ClusterLifecycleState, ControlPlane, WorkRequestStatus};

/// Polling knobs. Durations throughout so tests can drive
/// millisecond-scale polls without real delays.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Pause between status queries.
    pub interval: Duration,
    /// Per-target budget from issuance to terminal state.
    pub deadline: Duration,
    /// Consecutive transient query failures tolerated before giving up.
    pub max_transient_retries: u32,
    /// First backoff pause; doubles per consecutive failure.
    pub backoff_base: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: Duration::from_secs(45 * 60),
            max_transient_retries: 5,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Terminal state of one polled target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    Failed(String),
    TimedOut,
}

/// Poll-loop bookkeeping for a single tracking handle. Owned by the poll
/// engine call and dropped once the target is terminal.
#[derive(Debug)]
struct PollState {
    work_request_id: String,
    started: Instant,
    deadline: Instant,
    last_status: Option<WorkRequestStatus>,
    retry_count: u32,
}

impl PollState {
    fn new(work_request_id: &str, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            work_request_id: work_request_id.to_string(),
            started,
            deadline: started + budget,
            last_status: None,
            retry_count: 0,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Wait until the work request is terminal.
///
/// For cluster targets (`cluster_id` set) the work request succeeding is
/// not enough — the cluster can still be transitioning, so the engine
/// keeps polling until the lifecycle state is ACTIVE as well. Never hangs:
/// the deadline converts an eternally pending status into `TimedOut`.
pub async fn await_terminal(
    client: &dyn ControlPlane,
    work_request_id: &str,
    cluster_id: Option<&str>,
    config: &PollConfig,
) -> TerminalStatus {
    let mut state = PollState::new(work_request_id, config.deadline);

    loop {
        if state.expired() {
            warn!(
                "Work request {} still not terminal after {:?}; giving up",
                state.work_request_id,
                state.started.elapsed()
            );
            return TerminalStatus::TimedOut;
        }

        match client.get_work_request_status(&state.work_request_id).await {
            Ok(status) => {
                state.retry_count = 0;
                if state.last_status != Some(status) {
                    debug!(
                        "Work request {} status: {:?}",
                        state.work_request_id, status
                    );
                }
                state.last_status = Some(status);

                match status {
                    WorkRequestStatus::Pending => {}
                    WorkRequestStatus::Failed => {
                        return TerminalStatus::Failed(format!(
                            "work request {} failed",
                            state.work_request_id
                        ));
                    }
                    WorkRequestStatus::Succeeded => match cluster_id {
                        None => return TerminalStatus::Succeeded,
                        Some(cluster_id) => {
                            match poll_lifecycle(client, cluster_id, &mut state, config).await {
                                Some(terminal) => return terminal,
                                // Still transitioning; keep consuming the
                                // same deadline.
                                None => {}
                            }
                        }
                    },
                }
            }
            Err(e) if e.is_transient() && state.retry_count < config.max_transient_retries => {
                state.retry_count += 1;
                let pause = backoff(config.backoff_base, state.retry_count);
                warn!(
                    "Status query for {} failed (attempt {}/{}), retrying in {:?}: {}",
                    state.work_request_id, state.retry_count, config.max_transient_retries, pause, e
                );
                tokio::time::sleep(pause).await;
                continue;
            }
            Err(e) => {
                return TerminalStatus::Failed(format!(
                    "status query for {} gave up: {}",
                    state.work_request_id, e
                ));
            }
        }

        tokio::time::sleep(config.interval).await;
    }
}

/// One lifecycle check after the work request succeeded. `Some` is a
/// terminal answer; `None` means "check again after the interval".
async fn poll_lifecycle(
    client: &dyn ControlPlane,
    cluster_id: &str,
    state: &mut PollState,
    config: &PollConfig,
) -> Option<TerminalStatus> {
    match client.get_cluster_lifecycle_state(cluster_id).await {
        Ok(ClusterLifecycleState::Active) => Some(TerminalStatus::Succeeded),
        Ok(lifecycle) if lifecycle.is_terminal_failure() => Some(TerminalStatus::Failed(format!(
            "cluster {} entered lifecycle state {:?} after upgrade",
            cluster_id, lifecycle
        ))),
        Ok(lifecycle) => {
            debug!(
                "Cluster {} lifecycle state {:?}, waiting for ACTIVE",
                cluster_id, lifecycle
            );
            None
        }
        Err(e) if e.is_transient() && state.retry_count < config.max_transient_retries => {
            state.retry_count += 1;
            None
        }
        Err(e) => Some(TerminalStatus::Failed(format!(
            "lifecycle query for {} gave up: {}",
            cluster_id, e
        ))),
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << (attempt.saturating_sub(1)).min(6))
}

/// Run `op`, retrying transient failures with the poll engine's backoff.
///
/// Used on the issuance path: the executor itself never retries, its
/// caller does. Fatal errors and retry exhaustion propagate to be recorded
/// as a per-target failure.
pub async fn retry_transient<T, F, Fut>(config: &PollConfig, mut op: F) -> Result<T, OkupError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OkupError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_transient_retries => {
                attempt += 1;
                let pause = backoff(config.backoff_base, attempt);
                warn!(
                    "Transient cloud error (attempt {}/{}), retrying in {:?}: {}",
                    attempt, config.max_transient_retries, pause, e
                );
                tokio::time::sleep(pause).await;
            }
            Err(e) => return Err(e),
        }
    }
}
