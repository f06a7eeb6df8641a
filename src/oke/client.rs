//! OKE control plane client.
//!
//! The cascade only depends on the narrow [`ControlPlane`] capability
//! trait; [`RestControlPlane`] implements it over the Container Engine
//! REST API. Session token acquisition is handled outside this tool — the
//! client is handed a ready bearer token.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::OkupError;
use crate::selector::Selection;

/// Work request status, reduced to what the cascade needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkRequestStatus {
    Pending,
    Succeeded,
    Failed,
}

impl WorkRequestStatus {
    /// Map a Container Engine work request status string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCEEDED" => WorkRequestStatus::Succeeded,
            "FAILED" | "CANCELING" | "CANCELED" => WorkRequestStatus::Failed,
            // ACCEPTED, IN_PROGRESS, WAITING
            _ => WorkRequestStatus::Pending,
        }
    }
}

/// Cluster lifecycle states.
///
/// A cluster can report a completed work request while still transitioning,
/// so the poll engine checks this in addition to the work request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterLifecycleState {
    Creating,
    Active,
    Updating,
    Deleting,
    Deleted,
    Failed,
    Unknown,
}

impl ClusterLifecycleState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CREATING" => ClusterLifecycleState::Creating,
            "ACTIVE" => ClusterLifecycleState::Active,
            "UPDATING" => ClusterLifecycleState::Updating,
            "DELETING" => ClusterLifecycleState::Deleting,
            "DELETED" => ClusterLifecycleState::Deleted,
            "FAILED" => ClusterLifecycleState::Failed,
            _ => ClusterLifecycleState::Unknown,
        }
    }

    /// States from which the cluster will never become healthy again.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            ClusterLifecycleState::Deleting
                | ClusterLifecycleState::Deleted
                | ClusterLifecycleState::Failed
        )
    }
}

/// Fresh cluster details fetched from the control plane.
#[derive(Debug, Clone)]
pub struct ClusterDetails {
    pub id: String,
    pub name: String,
    pub kubernetes_version: String,
    pub lifecycle_state: ClusterLifecycleState,
    pub available_upgrades: Vec<String>,
}

/// Fresh node pool details fetched from the control plane.
#[derive(Debug, Clone)]
pub struct NodePoolDetails {
    pub id: String,
    pub name: String,
    pub kubernetes_version: Option<String>,
}

/// The capability set the cascade consumes from the cloud control plane.
///
/// Production and test implementations both satisfy this, which keeps the
/// scheduler and poll engine unit-testable without network access.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterDetails, OkupError>;

    async fn list_node_pools(&self, cluster_id: &str) -> Result<Vec<NodePoolDetails>, OkupError>;

    /// Request a control plane upgrade. Returns the work request id.
    async fn request_cluster_upgrade(
        &self,
        cluster_id: &str,
        version: &str,
    ) -> Result<String, OkupError>;

    /// Request a node pool upgrade. Returns the work request id.
    async fn request_node_pool_upgrade(
        &self,
        node_pool_id: &str,
        version: &str,
    ) -> Result<String, OkupError>;

    async fn get_work_request_status(
        &self,
        work_request_id: &str,
    ) -> Result<WorkRequestStatus, OkupError>;

    async fn get_cluster_lifecycle_state(
        &self,
        cluster_id: &str,
    ) -> Result<ClusterLifecycleState, OkupError>;
}

const API_VERSION: &str = "20180222";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterBody {
    id: Option<String>,
    name: Option<String>,
    kubernetes_version: Option<String>,
    lifecycle_state: Option<String>,
    #[serde(default)]
    available_kubernetes_upgrades: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodePoolBody {
    id: Option<String>,
    name: Option<String>,
    kubernetes_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkRequestBody {
    status: Option<String>,
}

/// Container Engine REST client.
///
/// The report spans regions, so each resource id is routed to the endpoint
/// of the region its report row came from (a node pool routes through its
/// parent cluster's region, a work request through the resource it was
/// issued for).
pub struct RestControlPlane {
    http: reqwest::Client,
    auth_token: String,
    endpoint_template: String,
    routes: RwLock<HashMap<String, String>>,
}

impl RestControlPlane {
    pub fn new(auth_token: impl Into<String>, endpoint_template: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_token: auth_token.into(),
            endpoint_template: endpoint_template.into(),
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Register the region route for a resource id.
    pub fn route(&self, resource_id: impl Into<String>, region: impl Into<String>) {
        self.routes
            .write()
            .expect("route table poisoned")
            .insert(resource_id.into(), region.into());
    }

    /// Build a client with routes for every resource in the selection.
    pub fn for_selection(
        auth_token: impl Into<String>,
        endpoint_template: impl Into<String>,
        selection: &Selection,
    ) -> Self {
        let client = Self::new(auth_token, endpoint_template);
        for sc in selection {
            client.route(sc.cluster.cluster_id.clone(), sc.cluster.region.clone());
            for np in &sc.node_pools {
                client.route(np.node_pool_id.clone(), sc.cluster.region.clone());
            }
        }
        client
    }

    fn endpoint_for(&self, resource_id: &str) -> Result<String, OkupError> {
        let routes = self.routes.read().expect("route table poisoned");
        let region = routes.get(resource_id).ok_or_else(|| OkupError::FatalCloud {
            operation: module_path!().to_string(),
            detail: format!("no region route for resource {}", resource_id),
        })?;
        Ok(self.endpoint_template.replace("{region}", region))
    }

    fn region_of(&self, resource_id: &str) -> Option<String> {
        self.routes
            .read()
            .expect("route table poisoned")
            .get(resource_id)
            .cloned()
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, OkupError> {
        let response = request
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| OkupError::network(module_path!(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(OkupError::cloud(module_path!(), status.as_u16(), detail));
        }

        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, OkupError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| OkupError::FatalCloud {
                operation: module_path!().to_string(),
                detail: format!("malformed response body: {}", e),
            })
    }

    /// Extract the work request id from an upgrade response.
    fn work_request_id(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get("opc-work-request-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterDetails, OkupError> {
        debug!("Fetching cluster details: {}", cluster_id);
        let url = format!(
            "{}/{}/clusters/{}",
            self.endpoint_for(cluster_id)?,
            API_VERSION,
            cluster_id
        );

        let body: ClusterBody = self.json(self.http.get(&url)).await?;
        Ok(ClusterDetails {
            id: body.id.unwrap_or_else(|| cluster_id.to_string()),
            name: body.name.unwrap_or_else(|| cluster_id.to_string()),
            kubernetes_version: body.kubernetes_version.unwrap_or_default(),
            lifecycle_state: body
                .lifecycle_state
                .as_deref()
                .map(ClusterLifecycleState::parse)
                .unwrap_or(ClusterLifecycleState::Unknown),
            available_upgrades: body.available_kubernetes_upgrades,
        })
    }

    async fn list_node_pools(&self, cluster_id: &str) -> Result<Vec<NodePoolDetails>, OkupError> {
        debug!("Listing node pools for cluster: {}", cluster_id);
        let url = format!(
            "{}/{}/nodePools",
            self.endpoint_for(cluster_id)?,
            API_VERSION
        );

        let bodies: Vec<NodePoolBody> = self
            .json(self.http.get(&url).query(&[("clusterId", cluster_id)]))
            .await?;

        Ok(bodies
            .into_iter()
            .filter_map(|body| {
                let id = body.id?;
                Some(NodePoolDetails {
                    name: body.name.unwrap_or_else(|| id.clone()),
                    kubernetes_version: body.kubernetes_version,
                    id,
                })
            })
            .collect())
    }

    async fn request_cluster_upgrade(
        &self,
        cluster_id: &str,
        version: &str,
    ) -> Result<String, OkupError> {
        debug!(
            "Requesting cluster upgrade: {} -> {}",
            cluster_id, version
        );
        let url = format!(
            "{}/{}/clusters/{}",
            self.endpoint_for(cluster_id)?,
            API_VERSION,
            cluster_id
        );

        let response = self
            .send(
                self.http
                    .put(&url)
                    .json(&serde_json::json!({ "kubernetesVersion": version })),
            )
            .await?;

        let work_request_id =
            Self::work_request_id(&response).ok_or_else(|| OkupError::FatalCloud {
                operation: module_path!().to_string(),
                detail: format!(
                    "no work request id returned for cluster {} upgrade",
                    cluster_id
                ),
            })?;
        if let Some(region) = self.region_of(cluster_id) {
            self.route(work_request_id.clone(), region);
        }
        Ok(work_request_id)
    }

    async fn request_node_pool_upgrade(
        &self,
        node_pool_id: &str,
        version: &str,
    ) -> Result<String, OkupError> {
        debug!(
            "Requesting node pool upgrade: {} -> {}",
            node_pool_id, version
        );
        let url = format!(
            "{}/{}/nodePools/{}",
            self.endpoint_for(node_pool_id)?,
            API_VERSION,
            node_pool_id
        );

        let response = self
            .send(
                self.http
                    .put(&url)
                    .json(&serde_json::json!({ "kubernetesVersion": version })),
            )
            .await?;

        let work_request_id =
            Self::work_request_id(&response).ok_or_else(|| OkupError::FatalCloud {
                operation: module_path!().to_string(),
                detail: format!(
                    "no work request id returned for node pool {} upgrade",
                    node_pool_id
                ),
            })?;
        if let Some(region) = self.region_of(node_pool_id) {
            self.route(work_request_id.clone(), region);
        }
        Ok(work_request_id)
    }

    async fn get_work_request_status(
        &self,
        work_request_id: &str,
    ) -> Result<WorkRequestStatus, OkupError> {
        let url = format!(
            "{}/{}/workRequests/{}",
            self.endpoint_for(work_request_id)?,
            API_VERSION,
            work_request_id
        );

        let body: WorkRequestBody = self.json(self.http.get(&url)).await?;
        let status = body
            .status
            .as_deref()
            .map(WorkRequestStatus::parse)
            .unwrap_or(WorkRequestStatus::Pending);
        debug!("Work request {} status: {:?}", work_request_id, status);
        Ok(status)
    }

    async fn get_cluster_lifecycle_state(
        &self,
        cluster_id: &str,
    ) -> Result<ClusterLifecycleState, OkupError> {
        Ok(self.get_cluster(cluster_id).await?.lifecycle_state)
    }
}
