//! Inventory report document consumed by the upgrade cascade.
//!
//! The report is produced by a separate version-report step; okup only
//! reads it. Records are immutable snapshots — nothing in the cascade
//! mutates them.

use std::path::Path;

use serde::Deserialize;

use crate::error::OkupError;

/// One cluster row from the report.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterRecord {
    pub cluster_id: String,
    pub cluster_name: String,
    pub project: String,
    pub stage: String,
    pub region: String,
    pub current_version: String,
    #[serde(default)]
    pub available_versions: Vec<String>,
}

/// One node pool row from the report.
#[derive(Debug, Clone, Deserialize)]
pub struct NodePoolRecord {
    pub node_pool_id: String,
    pub node_pool_name: String,
    pub parent_cluster_id: String,
    pub current_version: String,
    #[serde(default)]
    pub node_count: u32,
}

/// The full report document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportDocument {
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
    #[serde(default)]
    pub node_pools: Vec<NodePoolRecord>,
}

impl ReportDocument {
    /// Node pools owned by a cluster, in document order.
    pub fn node_pools_of(&self, cluster_id: &str) -> Vec<&NodePoolRecord> {
        self.node_pools
            .iter()
            .filter(|np| np.parent_cluster_id == cluster_id)
            .collect()
    }
}

/// Read and parse a report file.
pub fn load_report(path: &Path) -> Result<ReportDocument, OkupError> {
    let raw = std::fs::read_to_string(path).map_err(|e| OkupError::Report {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;

    serde_json::from_str(&raw).map_err(|e| OkupError::Report {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}
