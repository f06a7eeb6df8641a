//! Target version resolution.
//!
//! Decides, per selected cluster and node pool, which version to upgrade
//! to — an explicit override (validated against the report's available
//! set) or the highest available version at or above the current one.
//! Records already at target are short-circuited here and never reach the
//! scheduler.

use tracing::debug;

use crate::error::OkupError;
use crate::oke::outcome::{OutcomeKind, TargetKey, UpgradeOutcome};
use crate::report::{ClusterRecord, NodePoolRecord};
use crate::selector::Selection;

/// Numeric component key for ordering version strings.
///
/// "v1.30.1" -> [1, 30, 1]. Comparing keys lexicographically matches how
/// the report and the control plane order Kubernetes versions; strings
/// with no digits sort lowest.
pub fn version_key(version: &str) -> Vec<u64> {
    let mut key = Vec::new();
    let mut current: Option<u64> = None;

    for ch in version.chars() {
        if let Some(digit) = ch.to_digit(10) {
            current = Some(current.unwrap_or(0) * 10 + u64::from(digit));
        } else if let Some(value) = current.take() {
            key.push(value);
        }
    }
    if let Some(value) = current {
        key.push(value);
    }
    key
}

/// Normalize a version string such as "v1.34.1 (control plane)" to "1.34.1".
///
/// Returns the first dotted digit run, or None when the string carries no
/// digits at all.
pub fn extract_version(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;

    let mut end = start;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_digit() {
            end += 1;
        } else if b == b'.' && bytes.get(end + 1).is_some_and(|n| n.is_ascii_digit()) {
            end += 1;
        } else {
            break;
        }
    }
    Some(value[start..end].to_string())
}

/// True when two version strings denote the same version after
/// normalization.
pub fn same_version(a: &str, b: &str) -> bool {
    match (extract_version(a), extract_version(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Pick the upgrade target from the available set.
///
/// With a requested version, the (normalized) match from `available` is
/// returned and anything else is None — the caller decides whether that is
/// an error. Without one, the highest entry at or above `current` wins.
pub fn choose_target_version<'a>(
    available: &'a [String],
    current: &str,
    requested: Option<&str>,
) -> Option<&'a String> {
    if let Some(requested) = requested {
        let wanted = extract_version(requested)?;
        return available
            .iter()
            .find(|v| extract_version(v).as_deref() == Some(wanted.as_str()));
    }

    let current_key = version_key(current);
    available
        .iter()
        .filter(|v| version_key(v) >= current_key)
        .max_by_key(|v| version_key(v))
}

/// What the scheduler should do with a resolved cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterAction {
    /// Issue an upgrade request and poll it to terminal state.
    Upgrade,
    /// Already at target; record `SkippedUpToDate` and release the node
    /// pools immediately.
    AlreadyAtTarget,
}

/// A node pool scheduled for upgrade, carrying its resolved version.
#[derive(Debug, Clone)]
pub struct NodePoolTarget {
    pub record: NodePoolRecord,
    pub target_version: String,
}

/// A cluster scheduled for upgrade together with its dependent node pools.
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    pub record: ClusterRecord,
    pub target_version: String,
    pub action: ClusterAction,
    pub node_pools: Vec<NodePoolTarget>,
}

/// Resolver output: dispatchable targets plus outcomes decided before any
/// dispatch (up-to-date node pools, pools ahead of the target).
#[derive(Debug, Clone, Default)]
pub struct ResolvedPlan {
    pub clusters: Vec<ClusterTarget>,
    pub pre_resolved: Vec<UpgradeOutcome>,
}

impl ResolvedPlan {
    /// Number of targets the scheduler will drive.
    pub fn dispatch_count(&self) -> usize {
        self.clusters
            .iter()
            .map(|ct| 1 + ct.node_pools.len())
            .sum()
    }
}

/// Resolve the whole selection.
///
/// Fails with a validation error when an explicit override is not offered
/// by a selected cluster — rejecting a target the control plane is certain
/// to refuse beats issuing the doomed call.
pub fn resolve(selection: &Selection, requested: Option<&str>) -> Result<ResolvedPlan, OkupError> {
    let mut plan = ResolvedPlan::default();

    for sc in selection {
        let cluster = &sc.cluster;

        let (target_version, action) = resolve_cluster(cluster, requested)?;
        debug!(
            "Resolved cluster {} ({}): {} -> {} [{:?}]",
            cluster.cluster_name, cluster.cluster_id, cluster.current_version, target_version, action
        );

        let mut node_pools = Vec::new();
        for np in &sc.node_pools {
            let np_target = requested
                .and_then(extract_version)
                .unwrap_or_else(|| target_version.clone());

            if same_version(&np.current_version, &np_target) {
                plan.pre_resolved.push(UpgradeOutcome::resolved(
                    TargetKey::node_pool(&np.parent_cluster_id, &np.node_pool_id),
                    &np.node_pool_name,
                    &np.current_version,
                    Some(np_target),
                    OutcomeKind::SkippedUpToDate,
                ));
                continue;
            }

            if version_key(&np.current_version) > version_key(&np_target) {
                // Upgrading would be a downgrade; never dispatch.
                plan.pre_resolved.push(UpgradeOutcome::resolved(
                    TargetKey::node_pool(&np.parent_cluster_id, &np.node_pool_id),
                    &np.node_pool_name,
                    &np.current_version,
                    Some(np_target.clone()),
                    OutcomeKind::Failed(format!(
                        "node pool version {} is ahead of target {}",
                        np.current_version, np_target
                    )),
                ));
                continue;
            }

            node_pools.push(NodePoolTarget {
                record: np.clone(),
                target_version: np_target,
            });
        }

        plan.clusters.push(ClusterTarget {
            record: cluster.clone(),
            target_version,
            action,
            node_pools,
        });
    }

    Ok(plan)
}

fn resolve_cluster(
    cluster: &ClusterRecord,
    requested: Option<&str>,
) -> Result<(String, ClusterAction), OkupError> {
    if let Some(requested) = requested {
        if same_version(&cluster.current_version, requested) {
            let normalized = extract_version(requested).unwrap_or_else(|| requested.to_string());
            return Ok((normalized, ClusterAction::AlreadyAtTarget));
        }

        return match choose_target_version(&cluster.available_versions, &cluster.current_version, Some(requested))
        {
            Some(target) => Ok((target.clone(), ClusterAction::Upgrade)),
            None => Err(OkupError::Validation(format!(
                "target version {} is not offered for cluster {} ({}); available: {}",
                requested,
                cluster.cluster_name,
                cluster.cluster_id,
                if cluster.available_versions.is_empty() {
                    "none".to_string()
                } else {
                    cluster.available_versions.join(", ")
                },
            ))),
        };
    }

    match choose_target_version(&cluster.available_versions, &cluster.current_version, None) {
        Some(target) if !same_version(target, &cluster.current_version) => {
            Ok((target.clone(), ClusterAction::Upgrade))
        }
        Some(target) => Ok((target.clone(), ClusterAction::AlreadyAtTarget)),
        None => Ok((
            cluster.current_version.clone(),
            ClusterAction::AlreadyAtTarget,
        )),
    }
}
