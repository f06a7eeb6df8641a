//! Cascade scheduler.
//!
//! Clusters upgrade concurrently under a bounded worker pool; a cluster's
//! node pools are dispatched only once its own outcome is recorded, and
//! never when it failed or timed out. Sibling node pools are independent
//! of each other. Dry runs walk the exact same plan without touching the
//! control plane.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::OkupError;
use crate::oke::client::ControlPlane;
use crate::oke::executor;
use crate::oke::outcome::{Aggregator, OutcomeKind, RunSummary, TargetKey, UpgradeOutcome};
use crate::oke::poller::{self, PollConfig, TerminalStatus};
use crate::oke::resolver::{ClusterAction, ClusterTarget, NodePoolTarget, ResolvedPlan};

/// Scheduler knobs.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Upper bound on concurrent upgrade+poll sequences.
    pub max_parallel: usize,
    pub poll: PollConfig,
    /// Optional budget for the whole cascade. On expiry, unfinished
    /// targets are marked timed out and no further requests are issued.
    pub run_deadline: Option<Duration>,
    pub dry_run: bool,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            poll: PollConfig::default(),
            run_deadline: None,
            dry_run: false,
        }
    }
}

/// Drive every target in the plan to a terminal outcome.
pub async fn run_cascade(
    client: Arc<dyn ControlPlane>,
    mut plan: ResolvedPlan,
    config: &CascadeConfig,
) -> Result<RunSummary, OkupError> {
    if config.max_parallel == 0 {
        return Err(OkupError::Validation(
            "--max-parallel must be at least 1".to_string(),
        ));
    }

    let aggregator = Arc::new(Aggregator::new());

    // Register every target up front so run-deadline expiry can account
    // for work that never started.
    for ct in &plan.clusters {
        aggregator.register(TargetKey::cluster(&ct.record.cluster_id));
        for np in &ct.node_pools {
            aggregator.register(TargetKey::node_pool(
                &np.record.parent_cluster_id,
                &np.record.node_pool_id,
            ));
        }
    }
    for outcome in std::mem::take(&mut plan.pre_resolved) {
        aggregator.register(outcome.key.clone());
        aggregator.record(outcome)?;
    }

    if config.dry_run {
        record_dry_run(&aggregator, &plan)?;
        return Ok(aggregator.finalize());
    }

    let progress = progress_bar(plan.dispatch_count() as u64);
    let semaphore = Arc::new(Semaphore::new(config.max_parallel));

    let mut handles: Vec<JoinHandle<Result<(), OkupError>>> = Vec::new();
    for ct in plan.clusters {
        handles.push(tokio::spawn(cluster_worker(
            Arc::clone(&client),
            Arc::clone(&aggregator),
            Arc::clone(&semaphore),
            config.poll.clone(),
            progress.clone(),
            ct,
        )));
    }

    let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let drive = async move {
        for result in join_all(handles).await {
            result.map_err(|e| OkupError::Internal(format!("worker task failed: {}", e)))??;
        }
        Ok::<(), OkupError>(())
    };

    match config.run_deadline {
        None => drive.await?,
        Some(deadline) => match tokio::time::timeout(deadline, drive).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Run deadline elapsed; abandoning unfinished targets");
                for handle in &abort_handles {
                    handle.abort();
                }
            }
        },
    }

    progress.finish_and_clear();
    Ok(aggregator.finalize())
}

/// Dry run: same outcome set a live run would attempt, no mutating calls.
fn record_dry_run(aggregator: &Aggregator, plan: &ResolvedPlan) -> Result<(), OkupError> {
    for ct in &plan.clusters {
        let kind = match ct.action {
            ClusterAction::AlreadyAtTarget => OutcomeKind::SkippedUpToDate,
            ClusterAction::Upgrade => OutcomeKind::SkippedDryRun,
        };
        println!(
            "{} {} cluster {} ({} -> {})",
            "DRY RUN".yellow(),
            match kind {
                OutcomeKind::SkippedUpToDate => "would skip",
                _ => "would upgrade",
            },
            ct.record.cluster_name.cyan(),
            ct.record.current_version,
            ct.target_version.green()
        );
        aggregator.record(UpgradeOutcome::resolved(
            TargetKey::cluster(&ct.record.cluster_id),
            &ct.record.cluster_name,
            &ct.record.current_version,
            Some(ct.target_version.clone()),
            kind,
        ))?;

        for np in &ct.node_pools {
            println!(
                "{} would upgrade node pool {} ({} -> {})",
                "DRY RUN".yellow(),
                np.record.node_pool_name.cyan(),
                np.record.current_version,
                np.target_version.green()
            );
            aggregator.record(UpgradeOutcome::resolved(
                TargetKey::node_pool(&np.record.parent_cluster_id, &np.record.node_pool_id),
                &np.record.node_pool_name,
                &np.record.current_version,
                Some(np.target_version.clone()),
                OutcomeKind::SkippedDryRun,
            ))?;
        }
    }
    Ok(())
}

/// Drive one cluster to a terminal outcome, then release or cascade its
/// node pools.
async fn cluster_worker(
    client: Arc<dyn ControlPlane>,
    aggregator: Arc<Aggregator>,
    semaphore: Arc<Semaphore>,
    poll: PollConfig,
    progress: ProgressBar,
    target: ClusterTarget,
) -> Result<(), OkupError> {
    let key = TargetKey::cluster(&target.record.cluster_id);

    let outcome = match target.action {
        ClusterAction::AlreadyAtTarget => {
            debug!(
                "Cluster {} already at {}",
                target.record.cluster_name, target.target_version
            );
            UpgradeOutcome::resolved(
                key.clone(),
                &target.record.cluster_name,
                &target.record.current_version,
                Some(target.target_version.clone()),
                OutcomeKind::SkippedUpToDate,
            )
        }
        ClusterAction::Upgrade => {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| OkupError::Internal(e.to_string()))?;
            aggregator.mark_in_progress(&key);
            let outcome = upgrade_cluster(client.as_ref(), &target, &poll).await;
            drop(permit);
            outcome
        }
    };

    let parent_ready = !outcome.kind.is_failure();
    aggregator.record(outcome)?;
    progress.inc(1);

    if parent_ready {
        dispatch_node_pools(client, aggregator, semaphore, poll, progress, target).await
    } else {
        for np in &target.node_pools {
            aggregator.record(UpgradeOutcome::resolved(
                TargetKey::node_pool(&np.record.parent_cluster_id, &np.record.node_pool_id),
                &np.record.node_pool_name,
                &np.record.current_version,
                Some(np.target_version.clone()),
                OutcomeKind::SkippedDependencyNotReady,
            ))?;
            progress.inc(1);
        }
        println!(
            "  {} Cluster {} did not reach a healthy state; skipping {} node pool(s)",
            "⚠".yellow(),
            target.record.cluster_name.cyan(),
            target.node_pools.len()
        );
        Ok(())
    }
}

/// Upgrade one cluster control plane: freshness check, issue, poll.
async fn upgrade_cluster(
    client: &dyn ControlPlane,
    target: &ClusterTarget,
    poll: &PollConfig,
) -> UpgradeOutcome {
    use crate::oke::resolver::same_version;

    let cluster_id = &target.record.cluster_id;
    let key = TargetKey::cluster(cluster_id);

    // The report may be stale; re-read the cluster before mutating it.
    let fresh = match poller::retry_transient(poll, || client.get_cluster(cluster_id)).await {
        Ok(fresh) => fresh,
        Err(e) => {
            return UpgradeOutcome::resolved(
                key,
                &target.record.cluster_name,
                &target.record.current_version,
                Some(target.target_version.clone()),
                OutcomeKind::Failed(format!("failed to fetch cluster details: {}", e)),
            );
        }
    };

    if same_version(&fresh.kubernetes_version, &target.target_version) {
        debug!(
            "Cluster {} already at {} on the control plane; report was stale",
            target.record.cluster_name, fresh.kubernetes_version
        );
        return UpgradeOutcome::resolved(
            key,
            &target.record.cluster_name,
            &fresh.kubernetes_version,
            Some(target.target_version.clone()),
            OutcomeKind::SkippedUpToDate,
        );
    }

    let still_offered = fresh
        .available_upgrades
        .iter()
        .any(|v| same_version(v, &target.target_version));
    if !still_offered {
        return UpgradeOutcome::resolved(
            key,
            &target.record.cluster_name,
            &fresh.kubernetes_version,
            Some(target.target_version.clone()),
            OutcomeKind::Failed(format!(
                "target {} is no longer offered (available: {})",
                target.target_version,
                if fresh.available_upgrades.is_empty() {
                    "none".to_string()
                } else {
                    fresh.available_upgrades.join(", ")
                }
            )),
        );
    }

    let issued_at = Utc::now();
    let issued = poller::retry_transient(poll, || {
        executor::execute_cluster(
            client,
            cluster_id,
            &target.record.cluster_name,
            &target.target_version,
        )
    })
    .await;

    let work_request_id = match issued {
        Ok(id) => id,
        Err(e) => {
            return UpgradeOutcome {
                key,
                display_name: target.record.cluster_name.clone(),
                current_version: target.record.current_version.clone(),
                target_version: Some(target.target_version.clone()),
                kind: OutcomeKind::Failed(e.to_string()),
                work_request_id: None,
                issued_at: Some(issued_at),
                completed_at: Utc::now(),
            };
        }
    };

    let kind = match poller::await_terminal(client, &work_request_id, Some(cluster_id), poll).await
    {
        TerminalStatus::Succeeded => OutcomeKind::Succeeded,
        TerminalStatus::Failed(reason) => OutcomeKind::Failed(reason),
        TerminalStatus::TimedOut => OutcomeKind::TimedOut,
    };

    UpgradeOutcome {
        key,
        display_name: target.record.cluster_name.clone(),
        current_version: target.record.current_version.clone(),
        target_version: Some(target.target_version.clone()),
        kind,
        work_request_id: Some(work_request_id),
        issued_at: Some(issued_at),
        completed_at: Utc::now(),
    }
}

/// Fan the node pools of a (healthy) cluster out over the shared pool.
async fn dispatch_node_pools(
    client: Arc<dyn ControlPlane>,
    aggregator: Arc<Aggregator>,
    semaphore: Arc<Semaphore>,
    poll: PollConfig,
    progress: ProgressBar,
    target: ClusterTarget,
) -> Result<(), OkupError> {
    if target.node_pools.is_empty() {
        return Ok(());
    }

    // One fresh listing for the whole cluster; stale report rows for pools
    // that were upgraded out-of-band become up-to-date skips below.
    let fresh_versions: std::collections::HashMap<String, Option<String>> =
        match poller::retry_transient(&poll, || {
            client.list_node_pools(&target.record.cluster_id)
        })
        .await
        {
            Ok(pools) => pools
                .into_iter()
                .map(|p| (p.id, p.kubernetes_version))
                .collect(),
            Err(e) => {
                warn!(
                    "Could not refresh node pools for cluster {}; using report snapshot: {}",
                    target.record.cluster_id, e
                );
                Default::default()
            }
        };

    // Siblings run concurrently inside this worker (still bounded by the
    // shared semaphore); keeping them off the spawner means a run-deadline
    // abort cancels them along with their parent.
    let mut workers = Vec::new();
    for np in target.node_pools {
        let fresh = fresh_versions.get(&np.record.node_pool_id).cloned().flatten();
        workers.push(node_pool_worker(
            Arc::clone(&client),
            Arc::clone(&aggregator),
            Arc::clone(&semaphore),
            poll.clone(),
            progress.clone(),
            np,
            fresh,
        ));
    }

    for result in join_all(workers).await {
        result?;
    }
    Ok(())
}

async fn node_pool_worker(
    client: Arc<dyn ControlPlane>,
    aggregator: Arc<Aggregator>,
    semaphore: Arc<Semaphore>,
    poll: PollConfig,
    progress: ProgressBar,
    target: NodePoolTarget,
    fresh_version: Option<String>,
) -> Result<(), OkupError> {
    use crate::oke::resolver::same_version;

    let key = TargetKey::node_pool(&target.record.parent_cluster_id, &target.record.node_pool_id);

    if let Some(fresh) = &fresh_version {
        if same_version(fresh, &target.target_version) {
            aggregator.record(UpgradeOutcome::resolved(
                key,
                &target.record.node_pool_name,
                fresh,
                Some(target.target_version.clone()),
                OutcomeKind::SkippedUpToDate,
            ))?;
            progress.inc(1);
            return Ok(());
        }
    }

    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| OkupError::Internal(e.to_string()))?;
    aggregator.mark_in_progress(&key);

    let issued_at = Utc::now();
    let issued = poller::retry_transient(&poll, || {
        executor::execute_node_pool(
            client.as_ref(),
            &target.record.node_pool_id,
            &target.record.node_pool_name,
            &target.target_version,
        )
    })
    .await;

    let outcome = match issued {
        Err(e) => UpgradeOutcome {
            key,
            display_name: target.record.node_pool_name.clone(),
            current_version: target.record.current_version.clone(),
            target_version: Some(target.target_version.clone()),
            kind: OutcomeKind::Failed(e.to_string()),
            work_request_id: None,
            issued_at: Some(issued_at),
            completed_at: Utc::now(),
        },
        Ok(work_request_id) => {
            let kind = match poller::await_terminal(client.as_ref(), &work_request_id, None, &poll)
                .await
            {
                TerminalStatus::Succeeded => OutcomeKind::Succeeded,
                TerminalStatus::Failed(reason) => OutcomeKind::Failed(reason),
                TerminalStatus::TimedOut => OutcomeKind::TimedOut,
            };
            UpgradeOutcome {
                key,
                display_name: target.record.node_pool_name.clone(),
                current_version: target.record.current_version.clone(),
                target_version: Some(target.target_version.clone()),
                kind,
                work_request_id: Some(work_request_id),
                issued_at: Some(issued_at),
                completed_at: Utc::now(),
            }
        }
    };

    drop(permit);
    aggregator.record(outcome)?;
    progress.inc(1);
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_message("Driving upgrades");
    pb
}
