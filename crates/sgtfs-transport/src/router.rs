//! Contact-node selection for remote clusters.
//!
//! Candidates are the remote cluster's non-blacklisted nodes in name order,
//! rotated so that the i-th local node (by name) starts at remote node
//! `i mod n`. Each candidate is probed with `is_live` under a deadline; a
//! failed probe is reported to membership and the next candidate is tried.
//! Calls on the returned client are bounded by the call deadline, and
//! connection-level failures are reported the same way.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use sgtfs_meta::{
    ClusterInfo, ClusterMembership, DataObjectMetadata, Directory, MetaError, Node, Recipe,
    VirtualPath,
};

use crate::client::{ClientFactory, RemoteClient};
use crate::error::{Result, TransportError};

/// Deadlines for remote calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Liveness probe deadline (default: 2000ms)
    pub probe_timeout_ms: u64,
    /// Deadline for every delegated call (default: 30000ms)
    pub call_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2_000,
            call_timeout_ms: 30_000,
        }
    }
}

/// Picks and probes contact nodes of remote clusters.
pub struct TransportRouter {
    membership: Arc<ClusterMembership>,
    factory: Arc<dyn ClientFactory>,
    local_node: String,
    config: TransportConfig,
}

impl TransportRouter {
    /// Router acting on behalf of `local_node` of the local cluster.
    pub fn new(
        membership: Arc<ClusterMembership>,
        factory: Arc<dyn ClientFactory>,
        local_node: &str,
        config: TransportConfig,
    ) -> Self {
        Self {
            membership,
            factory,
            local_node: local_node.to_string(),
            config,
        }
    }

    /// Membership this router reports to.
    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }

    /// Ordered contact candidates for `cluster`. Blacklisted nodes are excluded.
    pub fn contact_order(&self, cluster: &ClusterInfo) -> Result<Vec<Node>> {
        let candidates: Vec<Node> = cluster
            .contactable_nodes()
            .into_iter()
            .map(|n| n.node.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let ordinal = self
            .membership
            .list_nodes()?
            .iter()
            .position(|n| n.node.name == self.local_node)
            .unwrap_or(0);
        let start = ordinal % candidates.len();
        Ok(candidates[start..]
            .iter()
            .chain(&candidates[..start])
            .cloned()
            .collect())
    }

    /// A client bound to a live node of `cluster`.
    ///
    /// Fails with `ClusterUnreachable` when no candidate answers, including
    /// when every node is blacklisted (no network call is made then).
    pub async fn get_client(&self, cluster: &str) -> Result<RoutedClient> {
        if self.membership.is_local(cluster) {
            return Err(MetaError::InvalidArgument(format!(
                "{cluster} is the local cluster"
            ))
            .into());
        }
        let info = self
            .membership
            .get_cluster(cluster)?
            .ok_or_else(|| MetaError::NotFound(format!("cluster {cluster}")))?;

        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
        for node in self.contact_order(&info)? {
            match self.probe(cluster, &node, probe_timeout).await {
                Ok(client) => {
                    if let Err(e) = self.membership.report_reachable(cluster, &node.name) {
                        warn!(
                            cluster,
                            node = %node.name,
                            error = %e,
                            "cannot record reachable node"
                        );
                    }
                    debug!(cluster, node = %node.name, "contact node selected");
                    return Ok(RoutedClient {
                        cluster: cluster.to_string(),
                        inner: client,
                        membership: self.membership.clone(),
                        timeout: Duration::from_millis(self.config.call_timeout_ms),
                    });
                }
                Err(e) => {
                    warn!(cluster, node = %node.name, error = %e, "probe failed");
                    if let Err(e) = self.membership.report_unreachable(cluster, &node.name) {
                        warn!(
                            cluster,
                            node = %node.name,
                            error = %e,
                            "cannot record unreachable node"
                        );
                    }
                }
            }
        }
        Err(TransportError::ClusterUnreachable(cluster.to_string()))
    }

    async fn probe(
        &self,
        cluster: &str,
        node: &Node,
        deadline: Duration,
    ) -> Result<Arc<dyn RemoteClient>> {
        let client = self.factory.connect(cluster, node)?;
        match tokio::time::timeout(deadline, client.is_live()).await {
            Ok(Ok(true)) => Ok(client),
            Ok(Ok(false)) => Err(TransportError::Connection {
                addr: node.transport_endpoint.clone(),
                reason: "node reports not live".into(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout {
                addr: node.transport_endpoint.clone(),
                timeout_ms: deadline.as_millis() as u64,
            }),
        }
    }
}

/// Client bound to one probed node. Every call is deadline-bounded; a
/// connection failure or timeout marks the node unreachable and surfaces as
/// `RemoteUnavailable`. Well-formed remote errors pass through.
pub struct RoutedClient {
    cluster: String,
    inner: Arc<dyn RemoteClient>,
    membership: Arc<ClusterMembership>,
    timeout: Duration,
}

impl RoutedClient {
    /// Remote cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Node the client is bound to.
    pub fn node_name(&self) -> &str {
        self.inner.node_name()
    }

    async fn call<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(TransportError::Timeout {
                addr: self.inner.node_name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        match result {
            Err(e) if e.is_connection_failure() => {
                warn!(
                    cluster = %self.cluster,
                    node = self.inner.node_name(),
                    op,
                    error = %e,
                    "remote call failed"
                );
                if let Err(report) = self
                    .membership
                    .report_unreachable(&self.cluster, self.inner.node_name())
                {
                    warn!(error = %report, "cannot record unreachable node");
                }
                Err(TransportError::RemoteUnavailable(format!(
                    "{op} on {}/{}: {e}",
                    self.cluster,
                    self.inner.node_name()
                )))
            }
            other => other,
        }
    }

    /// The remote cluster's roster.
    pub async fn get_cluster(&self) -> Result<ClusterInfo> {
        self.call("get_cluster", self.inner.get_cluster()).await
    }

    /// Remote directory.
    pub async fn get_directory(&self, path: &VirtualPath) -> Result<Directory> {
        self.call("get_directory", self.inner.get_directory(path)).await
    }

    /// Remote object metadata.
    pub async fn get_metadata(&self, path: &VirtualPath) -> Result<DataObjectMetadata> {
        self.call("get_metadata", self.inner.get_metadata(path)).await
    }

    /// Remote child metadata.
    pub async fn list_metadata(&self, path: &VirtualPath) -> Result<Vec<DataObjectMetadata>> {
        self.call("list_metadata", self.inner.list_metadata(path)).await
    }

    /// Remote recipe.
    pub async fn get_recipe(&self, path: &VirtualPath) -> Result<Recipe> {
        self.call("get_recipe", self.inner.get_recipe(path)).await
    }

    /// Remote chunk bytes.
    pub async fn get_data_chunk(&self, cluster: &str, hash: &str) -> Result<Bytes> {
        self.call("get_data_chunk", self.inner.get_data_chunk(cluster, hash))
            .await
    }
}
