//! Upgrade request issuance.
//!
//! Exactly one upgrade request per target per run. Retry policy for
//! transient issuance failures lives with the poll engine
//! ([`crate::oke::poller::retry_transient`]), not here.

use colored::Colorize;
use tracing::info;

use crate::error::OkupError;
use crate::oke::client::ControlPlane;

/// Issue a control plane upgrade for a cluster. Returns the work request
/// id to poll.
pub async fn execute_cluster(
    client: &dyn ControlPlane,
    cluster_id: &str,
    cluster_name: &str,
    version: &str,
) -> Result<String, OkupError> {
    info!(
        "Requesting control plane upgrade for {} ({}) to {}",
        cluster_name, cluster_id, version
    );

    let work_request_id = client.request_cluster_upgrade(cluster_id, version).await?;
    println!(
        "  {} Upgrade triggered for cluster {} to {} (work request {})",
        "✓".green(),
        cluster_name.cyan(),
        version.green(),
        work_request_id
    );
    Ok(work_request_id)
}

/// Issue an upgrade for a node pool. Returns the work request id to poll.
pub async fn execute_node_pool(
    client: &dyn ControlPlane,
    node_pool_id: &str,
    node_pool_name: &str,
    version: &str,
) -> Result<String, OkupError> {
    info!(
        "Requesting node pool upgrade for {} ({}) to {}",
        node_pool_name, node_pool_id, version
    );

    let work_request_id = client
        .request_node_pool_upgrade(node_pool_id, version)
        .await?;
    println!(
        "  {} Upgrade triggered for node pool {} to {} (work request {})",
        "✓".green(),
        node_pool_name.cyan(),
        version.green(),
        work_request_id
    );
    Ok(work_request_id)
}
