//! Upgrade outcomes and their aggregation.
//!
//! The aggregator is the only state shared between workers. It tracks each
//! target through `Pending -> InProgress -> Terminal` and enforces the
//! at-most-one-outcome-per-target contract; the summary is read only after
//! every worker has joined.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::OkupError;

/// Identity of an upgrade target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetKey {
    Cluster(String),
    NodePool {
        cluster_id: String,
        node_pool_id: String,
    },
}

impl TargetKey {
    pub fn cluster(cluster_id: impl Into<String>) -> Self {
        TargetKey::Cluster(cluster_id.into())
    }

    pub fn node_pool(cluster_id: impl Into<String>, node_pool_id: impl Into<String>) -> Self {
        TargetKey::NodePool {
            cluster_id: cluster_id.into(),
            node_pool_id: node_pool_id.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKey::Cluster(id) => write!(f, "cluster {}", id),
            TargetKey::NodePool {
                cluster_id,
                node_pool_id,
            } => write!(f, "node pool {} (cluster {})", node_pool_id, cluster_id),
        }
    }
}

/// Final status of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    Succeeded,
    Failed(String),
    TimedOut,
    SkippedDependencyNotReady,
    SkippedDryRun,
    SkippedUpToDate,
}

impl OutcomeKind {
    /// Failures and timeouts make the run exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeKind::Failed(_) | OutcomeKind::TimedOut)
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Succeeded => "succeeded",
            OutcomeKind::Failed(_) => "failed",
            OutcomeKind::TimedOut => "timed out",
            OutcomeKind::SkippedDependencyNotReady => "skipped (dependency not ready)",
            OutcomeKind::SkippedDryRun => "skipped (dry run)",
            OutcomeKind::SkippedUpToDate => "skipped (up to date)",
        }
    }
}

/// One record per target; never mutated after it is appended.
#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub key: TargetKey,
    pub display_name: String,
    pub current_version: String,
    pub target_version: Option<String>,
    pub kind: OutcomeKind,
    pub work_request_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

impl UpgradeOutcome {
    /// An outcome decided without issuing any upgrade request.
    pub fn resolved(
        key: TargetKey,
        display_name: &str,
        current_version: &str,
        target_version: Option<String>,
        kind: OutcomeKind,
    ) -> Self {
        Self {
            key,
            display_name: display_name.to_string(),
            current_version: current_version.to_string(),
            target_version,
            kind,
            work_request_id: None,
            issued_at: None,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
enum TargetState {
    Pending,
    InProgress,
    Terminal(UpgradeOutcome),
}

/// Append-only outcome collection, keyed by target identity.
#[derive(Debug, Default)]
pub struct Aggregator {
    states: Mutex<BTreeMap<TargetKey, TargetState>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target as `Pending`. Idempotent for targets that already
    /// reached a later state.
    pub fn register(&self, key: TargetKey) {
        let mut states = self.states.lock().expect("aggregator lock poisoned");
        states.entry(key).or_insert(TargetState::Pending);
    }

    /// Mark a target as dispatched.
    pub fn mark_in_progress(&self, key: &TargetKey) {
        let mut states = self.states.lock().expect("aggregator lock poisoned");
        if let Some(state) = states.get_mut(key) {
            if matches!(state, TargetState::Pending) {
                *state = TargetState::InProgress;
            }
        }
    }

    /// Record a terminal outcome.
    ///
    /// A second outcome for the same target violates the scheduler's
    /// at-most-once dispatch contract and surfaces as an internal error.
    pub fn record(&self, outcome: UpgradeOutcome) -> Result<(), OkupError> {
        let mut states = self.states.lock().expect("aggregator lock poisoned");
        match states.get(&outcome.key) {
            Some(TargetState::Terminal(_)) => {
                Err(OkupError::DuplicateOutcome(outcome.key.to_string()))
            }
            _ => {
                states.insert(outcome.key.clone(), TargetState::Terminal(outcome));
                Ok(())
            }
        }
    }

    /// Number of targets that have reached a terminal state.
    pub fn terminal_count(&self) -> usize {
        let states = self.states.lock().expect("aggregator lock poisoned");
        states
            .values()
            .filter(|s| matches!(s, TargetState::Terminal(_)))
            .count()
    }

    /// Drain into the final summary. Targets still `Pending`/`InProgress`
    /// (run deadline expiry) are recorded as `TimedOut`.
    pub fn finalize(&self) -> RunSummary {
        let mut states = self.states.lock().expect("aggregator lock poisoned");
        let drained = std::mem::take(&mut *states);

        let outcomes = drained
            .into_iter()
            .map(|(key, state)| match state {
                TargetState::Terminal(outcome) => outcome,
                TargetState::Pending | TargetState::InProgress => UpgradeOutcome::resolved(
                    key.clone(),
                    &key.to_string(),
                    "unknown",
                    None,
                    OutcomeKind::TimedOut,
                ),
            })
            .collect();

        RunSummary::new(outcomes)
    }
}

/// Per-kind counts plus the full per-target detail.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub outcomes: Vec<UpgradeOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped_dependency: usize,
    pub skipped_dry_run: usize,
    pub skipped_up_to_date: usize,
}

impl RunSummary {
    pub fn new(outcomes: Vec<UpgradeOutcome>) -> Self {
        let mut summary = RunSummary {
            outcomes,
            ..RunSummary::default()
        };
        for outcome in &summary.outcomes {
            match outcome.kind {
                OutcomeKind::Succeeded => summary.succeeded += 1,
                OutcomeKind::Failed(_) => summary.failed += 1,
                OutcomeKind::TimedOut => summary.timed_out += 1,
                OutcomeKind::SkippedDependencyNotReady => summary.skipped_dependency += 1,
                OutcomeKind::SkippedDryRun => summary.skipped_dry_run += 1,
                OutcomeKind::SkippedUpToDate => summary.skipped_up_to_date += 1,
            }
        }
        summary
    }

    /// True when no target failed or timed out.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }

    /// Process exit indicator: 0 on success, 2 when any target failed or
    /// timed out.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 2 }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(key: TargetKey, kind: OutcomeKind) -> UpgradeOutcome {
        UpgradeOutcome::resolved(key, "name", "v1.28.2", Some("v1.30.1".to_string()), kind)
    }

    #[test]
    fn test_target_key_display() {
        assert_eq!(TargetKey::cluster("c-1").to_string(), "cluster c-1");
        assert_eq!(
            TargetKey::node_pool("c-1", "np-1").to_string(),
            "node pool np-1 (cluster c-1)"
        );
    }

    #[test]
    fn test_outcome_kind_failure() {
        assert!(OutcomeKind::Failed("x".to_string()).is_failure());
        assert!(OutcomeKind::TimedOut.is_failure());
        assert!(!OutcomeKind::Succeeded.is_failure());
        assert!(!OutcomeKind::SkippedDryRun.is_failure());
        assert!(!OutcomeKind::SkippedUpToDate.is_failure());
        assert!(!OutcomeKind::SkippedDependencyNotReady.is_failure());
    }

    #[test]
    fn test_aggregator_record_and_finalize() {
        let agg = Aggregator::new();
        let key = TargetKey::cluster("c-1");
        agg.register(key.clone());
        agg.mark_in_progress(&key);
        agg.record(outcome(key, OutcomeKind::Succeeded)).unwrap();

        let summary = agg.finalize();
        assert_eq!(summary.total(), 1);
        assert_eq!(summary.succeeded, 1);
        assert!(summary.is_success());
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn test_aggregator_duplicate_outcome_is_error() {
        let agg = Aggregator::new();
        let key = TargetKey::cluster("c-1");
        agg.register(key.clone());
        agg.record(outcome(key.clone(), OutcomeKind::Succeeded))
            .unwrap();

        let err = agg
            .record(outcome(key, OutcomeKind::Failed("again".to_string())))
            .unwrap_err();
        assert!(matches!(err, OkupError::DuplicateOutcome(_)));
    }

    #[test]
    fn test_aggregator_record_without_register() {
        // Pre-resolved outcomes may be recorded directly.
        let agg = Aggregator::new();
        agg.record(outcome(
            TargetKey::node_pool("c-1", "np-1"),
            OutcomeKind::SkippedUpToDate,
        ))
        .unwrap();
        assert_eq!(agg.terminal_count(), 1);
    }

    #[test]
    fn test_finalize_marks_unfinished_as_timed_out() {
        let agg = Aggregator::new();
        agg.register(TargetKey::cluster("c-1"));
        agg.register(TargetKey::cluster("c-2"));
        agg.mark_in_progress(&TargetKey::cluster("c-2"));
        agg.record(outcome(TargetKey::cluster("c-1"), OutcomeKind::Succeeded))
            .unwrap();

        let summary = agg.finalize();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.exit_code(), 2);
    }

    #[test]
    fn test_summary_counts_per_kind() {
        let summary = RunSummary::new(vec![
            outcome(TargetKey::cluster("a"), OutcomeKind::Succeeded),
            outcome(TargetKey::cluster("b"), OutcomeKind::Failed("x".to_string())),
            outcome(TargetKey::cluster("c"), OutcomeKind::TimedOut),
            outcome(
                TargetKey::node_pool("a", "p1"),
                OutcomeKind::SkippedDependencyNotReady,
            ),
            outcome(TargetKey::node_pool("a", "p2"), OutcomeKind::SkippedDryRun),
            outcome(
                TargetKey::node_pool("a", "p3"),
                OutcomeKind::SkippedUpToDate,
            ),
        ]);

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.skipped_dependency, 1);
        assert_eq!(summary.skipped_dry_run, 1);
        assert_eq!(summary.skipped_up_to_date, 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_skips_alone_are_success() {
        let summary = RunSummary::new(vec![
            outcome(TargetKey::cluster("a"), OutcomeKind::SkippedUpToDate),
            outcome(TargetKey::node_pool("a", "p1"), OutcomeKind::SkippedDryRun),
        ]);
        assert!(summary.is_success());
        assert_eq!(summary.exit_code(), 0);
    }
}
