//! Report selection: narrow the inventory down to the targets of this run.

use tracing::debug;

use crate::error::OkupError;
use crate::report::{ClusterRecord, NodePoolRecord, ReportDocument};

/// Filter criteria. Empty fields mean "no constraint".
///
/// The cluster filter matches either the cluster OCID or its display name;
/// node pool filters work the same way and may list several pools.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub project: Option<String>,
    pub stage: Option<String>,
    pub region: Option<String>,
    pub cluster: Option<String>,
    pub node_pools: Vec<String>,
}

impl Filters {
    fn matches_cluster(&self, cluster: &ClusterRecord) -> bool {
        if let Some(project) = &self.project {
            if &cluster.project != project {
                return false;
            }
        }
        if let Some(stage) = &self.stage {
            if &cluster.stage != stage {
                return false;
            }
        }
        if let Some(region) = &self.region {
            if &cluster.region != region {
                return false;
            }
        }
        if let Some(wanted) = &self.cluster {
            if &cluster.cluster_id != wanted && &cluster.cluster_name != wanted {
                return false;
            }
        }
        true
    }

    fn matches_node_pool(&self, node_pool: &NodePoolRecord) -> bool {
        if self.node_pools.is_empty() {
            return true;
        }
        self.node_pools
            .iter()
            .any(|wanted| wanted == &node_pool.node_pool_id || wanted == &node_pool.node_pool_name)
    }
}

/// A cluster together with the node pools it owns, post-filtering.
#[derive(Debug, Clone)]
pub struct SelectedCluster {
    pub cluster: ClusterRecord,
    pub node_pools: Vec<NodePoolRecord>,
}

pub type Selection = Vec<SelectedCluster>;

/// Apply filters to the report.
///
/// Cluster-to-node-pool ownership is preserved. An explicit `--cluster` or
/// `--node-pool` filter that matches nothing in the report is an error;
/// project/stage/region filters that match nothing yield an empty
/// selection (nothing to do).
pub fn select(report: &ReportDocument, filters: &Filters) -> Result<Selection, OkupError> {
    let mut selection = Selection::new();
    let mut matched_node_pools = 0usize;

    for cluster in &report.clusters {
        if !filters.matches_cluster(cluster) {
            debug!(
                "Skipping cluster {} ({}) due to filters",
                cluster.cluster_name, cluster.cluster_id
            );
            continue;
        }

        let node_pools: Vec<NodePoolRecord> = report
            .node_pools_of(&cluster.cluster_id)
            .into_iter()
            .filter(|np| filters.matches_node_pool(np))
            .cloned()
            .collect();
        matched_node_pools += node_pools.len();

        selection.push(SelectedCluster {
            cluster: cluster.clone(),
            node_pools,
        });
    }

    if let Some(wanted) = &filters.cluster {
        if selection.is_empty() {
            return Err(OkupError::NotFound(format!("cluster {}", wanted)));
        }
    }

    if !filters.node_pools.is_empty() && matched_node_pools == 0 {
        return Err(OkupError::NotFound(format!(
            "node pool(s) {}",
            filters.node_pools.join(", ")
        )));
    }

    debug!(
        "Selected {} cluster(s), {} node pool(s)",
        selection.len(),
        matched_node_pools
    );
    Ok(selection)
}
