//! End-to-end pipeline tests: report file -> selection -> resolution ->
//! cascade, over an in-memory control plane.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use okup::error::OkupError;
use okup::oke::cascade::{CascadeConfig, run_cascade};
use okup::oke::client::{
    ClusterDetails, ClusterLifecycleState, ControlPlane, NodePoolDetails, WorkRequestStatus,
};
use okup::oke::outcome::{OutcomeKind, RunSummary, TargetKey};
use okup::oke::poller::PollConfig;
use okup::oke::resolver::resolve;
use okup::report::load_report;
use okup::selector::{Filters, select};

const REPORT: &str = r#"{
    "clusters": [
        {
            "cluster_id": "A",
            "cluster_name": "cluster-a",
            "project": "payments",
            "stage": "prod",
            "region": "us-ashburn-1",
            "current_version": "1.28",
            "available_versions": ["1.28", "1.29", "1.30"]
        },
        {
            "cluster_id": "B",
            "cluster_name": "cluster-b",
            "project": "payments",
            "stage": "prod",
            "region": "eu-frankfurt-1",
            "current_version": "1.30",
            "available_versions": ["1.30"]
        }
    ],
    "node_pools": [
        {
            "node_pool_id": "A1",
            "node_pool_name": "cluster-a-workers",
            "parent_cluster_id": "A",
            "current_version": "1.28",
            "node_count": 3
        }
    ]
}"#;

/// Control plane double that answers from in-memory state and records
/// every call in order.
#[derive(Default)]
struct InMemoryPlane {
    clusters: Mutex<HashMap<String, ClusterDetails>>,
    node_pools: Mutex<HashMap<String, Vec<NodePoolDetails>>>,
    work_requests: Mutex<HashMap<String, WorkRequestStatus>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU32,
}

impl InMemoryPlane {
    fn seed_from_report(report: &okup::report::ReportDocument) -> Self {
        let plane = Self::default();
        for c in &report.clusters {
            plane.clusters.lock().unwrap().insert(
                c.cluster_id.clone(),
                ClusterDetails {
                    id: c.cluster_id.clone(),
                    name: c.cluster_name.clone(),
                    kubernetes_version: c.current_version.clone(),
                    lifecycle_state: ClusterLifecycleState::Active,
                    available_upgrades: c.available_versions.clone(),
                },
            );
        }
        for np in &report.node_pools {
            plane
                .node_pools
                .lock()
                .unwrap()
                .entry(np.parent_cluster_id.clone())
                .or_default()
                .push(NodePoolDetails {
                    id: np.node_pool_id.clone(),
                    name: np.node_pool_name.clone(),
                    kubernetes_version: Some(np.current_version.clone()),
                });
        }
        plane
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("upgrade_"))
            .collect()
    }
}

#[async_trait]
impl ControlPlane for InMemoryPlane {
    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterDetails, OkupError> {
        self.record(format!("get_cluster:{}", cluster_id));
        self.clusters
            .lock()
            .unwrap()
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| OkupError::FatalCloud {
                operation: "fake".to_string(),
                detail: format!("unknown cluster {}", cluster_id),
            })
    }

    async fn list_node_pools(&self, cluster_id: &str) -> Result<Vec<NodePoolDetails>, OkupError> {
        self.record(format!("list_node_pools:{}", cluster_id));
        Ok(self
            .node_pools
            .lock()
            .unwrap()
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn request_cluster_upgrade(
        &self,
        cluster_id: &str,
        version: &str,
    ) -> Result<String, OkupError> {
        self.record(format!("upgrade_cluster:{}:{}", cluster_id, version));
        let wr = format!("wr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(cluster) = self.clusters.lock().unwrap().get_mut(cluster_id) {
            cluster.kubernetes_version = version.to_string();
        }
        self.work_requests
            .lock()
            .unwrap()
            .insert(wr.clone(), WorkRequestStatus::Succeeded);
        Ok(wr)
    }

    async fn request_node_pool_upgrade(
        &self,
        node_pool_id: &str,
        version: &str,
    ) -> Result<String, OkupError> {
        self.record(format!("upgrade_node_pool:{}:{}", node_pool_id, version));
        let wr = format!("wr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.work_requests
            .lock()
            .unwrap()
            .insert(wr.clone(), WorkRequestStatus::Succeeded);
        Ok(wr)
    }

    async fn get_work_request_status(
        &self,
        work_request_id: &str,
    ) -> Result<WorkRequestStatus, OkupError> {
        self.record(format!("wr_status:{}", work_request_id));
        Ok(self
            .work_requests
            .lock()
            .unwrap()
            .get(work_request_id)
            .copied()
            .unwrap_or(WorkRequestStatus::Pending))
    }

    async fn get_cluster_lifecycle_state(
        &self,
        cluster_id: &str,
    ) -> Result<ClusterLifecycleState, OkupError> {
        self.record(format!("lifecycle:{}", cluster_id));
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(cluster_id)
            .map(|c| c.lifecycle_state)
            .unwrap_or(ClusterLifecycleState::Unknown))
    }
}

fn write_report() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(REPORT.as_bytes()).unwrap();
    file
}

fn fast_config(dry_run: bool) -> CascadeConfig {
    CascadeConfig {
        max_parallel: 4,
        poll: PollConfig {
            interval: Duration::from_millis(2),
            deadline: Duration::from_millis(500),
            max_transient_retries: 2,
            backoff_base: Duration::from_millis(1),
        },
        run_deadline: None,
        dry_run,
    }
}

fn outcome_of(summary: &RunSummary, key: &TargetKey) -> OutcomeKind {
    summary
        .outcomes
        .iter()
        .find(|o| &o.key == key)
        .map(|o| o.kind.clone())
        .unwrap_or_else(|| panic!("no outcome recorded for {}", key))
}

#[tokio::test]
async fn full_pipeline_with_version_override() {
    let file = write_report();
    let report = load_report(file.path()).unwrap();
    let plane = Arc::new(InMemoryPlane::seed_from_report(&report));

    let selection = select(&report, &Filters::default()).unwrap();
    let plan = resolve(&selection, Some("1.30")).unwrap();
    let summary = run_cascade(plane.clone(), plan, &fast_config(false))
        .await
        .unwrap();

    assert_eq!(summary.total(), 3);
    assert_eq!(
        outcome_of(&summary, &TargetKey::cluster("A")),
        OutcomeKind::Succeeded
    );
    assert_eq!(
        outcome_of(&summary, &TargetKey::node_pool("A", "A1")),
        OutcomeKind::Succeeded
    );
    assert_eq!(
        outcome_of(&summary, &TargetKey::cluster("B")),
        OutcomeKind::SkippedUpToDate
    );
    assert_eq!(summary.exit_code(), 0);

    // Ordering invariant: the node pool request goes out only after the
    // cluster is terminal and healthy.
    let calls = plane.calls();
    let cluster_pos = calls
        .iter()
        .position(|c| c.starts_with("upgrade_cluster:A"))
        .unwrap();
    let lifecycle_pos = calls
        .iter()
        .position(|c| c.starts_with("lifecycle:A"))
        .unwrap();
    let pool_pos = calls
        .iter()
        .position(|c| c.starts_with("upgrade_node_pool:A1"))
        .unwrap();
    assert!(cluster_pos < lifecycle_pos);
    assert!(lifecycle_pos < pool_pos);

    // Cluster B was up to date; it must never reach the executor.
    assert!(!calls.iter().any(|c| c.starts_with("upgrade_cluster:B")));
}

#[tokio::test]
async fn full_pipeline_dry_run_is_side_effect_free() {
    let file = write_report();
    let report = load_report(file.path()).unwrap();
    let plane = Arc::new(InMemoryPlane::seed_from_report(&report));

    let selection = select(&report, &Filters::default()).unwrap();
    let plan = resolve(&selection, Some("1.30")).unwrap();
    let summary = run_cascade(plane.clone(), plan, &fast_config(true))
        .await
        .unwrap();

    assert!(plane.mutating_calls().is_empty());
    assert!(plane.calls().is_empty());

    // Same outcome set a live run would attempt, forced to dry-run skips.
    assert_eq!(summary.total(), 3);
    assert_eq!(
        outcome_of(&summary, &TargetKey::cluster("A")),
        OutcomeKind::SkippedDryRun
    );
    assert_eq!(
        outcome_of(&summary, &TargetKey::node_pool("A", "A1")),
        OutcomeKind::SkippedDryRun
    );
    assert_eq!(
        outcome_of(&summary, &TargetKey::cluster("B")),
        OutcomeKind::SkippedUpToDate
    );
    assert_eq!(summary.exit_code(), 0);
}

#[tokio::test]
async fn cluster_filter_narrows_the_cascade() {
    let file = write_report();
    let report = load_report(file.path()).unwrap();
    let plane = Arc::new(InMemoryPlane::seed_from_report(&report));

    let filters = Filters {
        cluster: Some("cluster-a".to_string()),
        ..Filters::default()
    };
    let selection = select(&report, &filters).unwrap();
    let plan = resolve(&selection, None).unwrap();
    let summary = run_cascade(plane, plan, &fast_config(false)).await.unwrap();

    // Only cluster A and its pool; B is filtered out entirely.
    assert_eq!(summary.total(), 2);
    assert_eq!(
        outcome_of(&summary, &TargetKey::cluster("A")),
        OutcomeKind::Succeeded
    );
}

#[tokio::test]
async fn unknown_cluster_filter_fails_before_dispatch() {
    let file = write_report();
    let report = load_report(file.path()).unwrap();

    let filters = Filters {
        cluster: Some("no-such-cluster".to_string()),
        ..Filters::default()
    };
    let err = select(&report, &filters).unwrap_err();
    assert!(matches!(err, OkupError::NotFound(_)));
}

#[tokio::test]
async fn invalid_override_fails_before_dispatch() {
    let file = write_report();
    let report = load_report(file.path()).unwrap();

    let selection = select(&report, &Filters::default()).unwrap();
    let err = resolve(&selection, Some("9.99")).unwrap_err();
    assert!(matches!(err, OkupError::Validation(_)));
}
