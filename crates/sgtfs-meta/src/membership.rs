//! Cluster membership: the local roster and cached remote rosters.
//!
//! Rosters are stored under `cluster/{name}`. The local roster is
//! authoritative and changed by administrators; remote rosters are caches
//! that the sync task replaces wholesale. Node reachability is tracked on both
//! kinds: repeated failures past `blacklist_threshold` blacklist a node, which
//! removes it from contact selection until explicitly cleared.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::kvstore::{encode, get_typed, KvStore};
use crate::types::{ClusterInfo, ClusterNode, MetaError, Node, NodeStatus, Timestamp};

const CLUSTER_PREFIX: &str = "cluster/";

fn cluster_key(name: &str) -> Vec<u8> {
    format!("{CLUSTER_PREFIX}{name}").into_bytes()
}

/// Membership policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Consecutive unreachable reports before a node is blacklisted (default: 3).
    pub blacklist_threshold: u32,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            blacklist_threshold: 3,
        }
    }
}

/// Owns the local roster and the cached views of remote clusters.
pub struct ClusterMembership {
    kv: Arc<dyn KvStore>,
    local_cluster: String,
    config: MembershipConfig,
    write_lock: Mutex<()>,
}

impl ClusterMembership {
    /// Opens membership for `local_cluster`, creating an empty local roster
    /// if none is stored yet.
    pub fn new(
        kv: Arc<dyn KvStore>,
        local_cluster: &str,
        config: MembershipConfig,
    ) -> Result<Self, MetaError> {
        crate::path::VirtualPath::cluster_root(local_cluster)?;
        if local_cluster.is_empty() {
            return Err(MetaError::InvalidArgument("empty local cluster name".into()));
        }
        let membership = Self {
            kv,
            local_cluster: local_cluster.to_string(),
            config,
            write_lock: Mutex::new(()),
        };
        if membership.load(local_cluster)?.is_none() {
            membership.store(&ClusterInfo::new(local_cluster))?;
        }
        Ok(membership)
    }

    /// Name of the local cluster.
    pub fn local_cluster_name(&self) -> &str {
        &self.local_cluster
    }

    /// True if `name` is the local cluster.
    pub fn is_local(&self, name: &str) -> bool {
        name == self.local_cluster
    }

    /// Membership policy in effect.
    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    // ---- local cluster -------------------------------------------------

    /// Adds a node to the local cluster. Re-adding a node updates its
    /// endpoint and hostnames and keeps its status.
    pub fn add_node(&self, node: Node) -> Result<(), MetaError> {
        if node.name.is_empty() {
            return Err(MetaError::InvalidArgument("empty node name".into()));
        }
        let _guard = self.write_lock.lock();
        let mut local = self.local_locked()?;
        let status = local
            .nodes
            .get(&node.name)
            .map(|n| n.status.clone())
            .unwrap_or_default();
        info!(node = %node.name, endpoint = %node.transport_endpoint, "local node added");
        local
            .nodes
            .insert(node.name.clone(), ClusterNode { node, status });
        self.store(&local)
    }

    /// Removes a node from the local cluster. Returns false if it was unknown.
    pub fn remove_node(&self, name: &str) -> Result<bool, MetaError> {
        let _guard = self.write_lock.lock();
        let mut local = self.local_locked()?;
        let existed = local.nodes.remove(name).is_some();
        if existed {
            self.store(&local)?;
            info!(node = name, "local node removed");
        }
        Ok(existed)
    }

    /// One node of the local cluster.
    pub fn get_node(&self, name: &str) -> Result<Option<ClusterNode>, MetaError> {
        Ok(self.local_cluster()?.nodes.get(name).cloned())
    }

    /// All nodes of the local cluster, ordered by name.
    pub fn list_nodes(&self) -> Result<Vec<ClusterNode>, MetaError> {
        Ok(self.local_cluster()?.nodes.into_values().collect())
    }

    /// The local roster.
    pub fn local_cluster(&self) -> Result<ClusterInfo, MetaError> {
        self.load(&self.local_cluster)?
            .ok_or_else(|| MetaError::NotFound(format!("cluster {}", self.local_cluster)))
    }

    /// Whether `node` leads the periodic sync tasks: the first local node by
    /// name that is not blacklisted.
    pub fn is_leader(&self, node: &str) -> Result<bool, MetaError> {
        let local = self.local_cluster()?;
        Ok(local
            .contactable_nodes()
            .first()
            .is_some_and(|n| n.node.name == node))
    }

    // ---- reachability --------------------------------------------------

    /// Records a failed contact with `node` of `cluster`.
    ///
    /// Sets `unreachable`, bumps the counter and, once the counter reaches
    /// the threshold, blacklists the node.
    pub fn report_unreachable(&self, cluster: &str, node: &str) -> Result<NodeStatus, MetaError> {
        let threshold = self.config.blacklist_threshold;
        self.update_status(cluster, node, |status| {
            let now = Timestamp::now();
            if !status.unreachable {
                status.unreachable = true;
                status.unreachable_since = Some(now);
            }
            status.unreachable_count = status.unreachable_count.saturating_add(1);
            if !status.blacklisted && status.unreachable_count >= threshold {
                status.blacklisted = true;
                status.blacklisted_since = Some(now);
                warn!(
                    cluster,
                    node,
                    failures = status.unreachable_count,
                    "node blacklisted"
                );
            }
        })
    }

    /// Records a successful contact. Clears `unreachable` and the counter but
    /// leaves a blacklist in place.
    pub fn report_reachable(&self, cluster: &str, node: &str) -> Result<NodeStatus, MetaError> {
        self.update_status(cluster, node, |status| {
            status.unreachable = false;
            status.unreachable_since = None;
            status.unreachable_count = 0;
        })
    }

    /// Resets a node's status entirely, lifting any blacklist.
    pub fn clear_blacklist(&self, cluster: &str, node: &str) -> Result<NodeStatus, MetaError> {
        let status = self.update_status(cluster, node, |status| *status = NodeStatus::default())?;
        info!(cluster, node, "node status cleared");
        Ok(status)
    }

    // ---- remote clusters -----------------------------------------------

    /// Registers a remote cluster.
    pub fn add_cluster(&self, info: ClusterInfo) -> Result<(), MetaError> {
        self.check_remote_name(&info.name)?;
        let _guard = self.write_lock.lock();
        if self.load(&info.name)?.is_some() {
            return Err(MetaError::AlreadyExists(format!("cluster {}", info.name)));
        }
        info!(cluster = %info.name, nodes = info.nodes.len(), "remote cluster added");
        self.store(&info)
    }

    /// Registers several remote clusters. Every cluster is attempted; the
    /// failures are reported together.
    pub fn add_clusters(&self, batch: Vec<ClusterInfo>) -> Result<(), MetaError> {
        let total = batch.len();
        let failures: Vec<(String, String)> = batch
            .into_iter()
            .filter_map(|info| {
                let name = info.name.clone();
                self.add_cluster(info).err().map(|e| (name, e.to_string()))
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(MetaError::Batch { total, failures })
        }
    }

    /// Forgets a remote cluster. Returns false if it was unknown.
    pub fn remove_cluster(&self, name: &str) -> Result<bool, MetaError> {
        self.check_remote_name(name)?;
        let _guard = self.write_lock.lock();
        let existed = self.load(name)?.is_some();
        if existed {
            self.kv.delete(&cluster_key(name))?;
            info!(cluster = name, "remote cluster removed");
        }
        Ok(existed)
    }

    /// Roster of any cluster, local or remote.
    pub fn get_cluster(&self, name: &str) -> Result<Option<ClusterInfo>, MetaError> {
        self.load(name)
    }

    /// True if `name` is the local cluster or a known remote one.
    pub fn cluster_exists(&self, name: &str) -> Result<bool, MetaError> {
        Ok(self.is_local(name) || self.load(name)?.is_some())
    }

    /// All known remote clusters, ordered by name.
    pub fn list_clusters(&self) -> Result<Vec<ClusterInfo>, MetaError> {
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(CLUSTER_PREFIX.as_bytes())? {
            if key == cluster_key(&self.local_cluster) {
                continue;
            }
            out.push(crate::kvstore::decode(&value)?);
        }
        Ok(out)
    }

    /// Replaces the cached roster of a known remote cluster wholesale.
    pub fn update_cluster(&self, info: ClusterInfo) -> Result<(), MetaError> {
        self.check_remote_name(&info.name)?;
        let _guard = self.write_lock.lock();
        if self.load(&info.name)?.is_none() {
            return Err(MetaError::NotFound(format!("cluster {}", info.name)));
        }
        self.store(&info)
    }

    // ---- internals -----------------------------------------------------

    fn update_status<F>(&self, cluster: &str, node: &str, f: F) -> Result<NodeStatus, MetaError>
    where
        F: FnOnce(&mut NodeStatus),
    {
        let _guard = self.write_lock.lock();
        let mut info = self
            .load(cluster)?
            .ok_or_else(|| MetaError::NotFound(format!("cluster {cluster}")))?;
        let entry = info
            .nodes
            .get_mut(node)
            .ok_or_else(|| MetaError::NotFound(format!("node {node} in cluster {cluster}")))?;
        f(&mut entry.status);
        let status = entry.status.clone();
        self.store(&info)?;
        Ok(status)
    }

    fn check_remote_name(&self, name: &str) -> Result<(), MetaError> {
        if name.is_empty() || self.is_local(name) {
            return Err(MetaError::InvalidArgument(format!(
                "{name:?} is not a remote cluster name"
            )));
        }
        crate::path::VirtualPath::cluster_root(name).map(|_| ())
    }

    fn local_locked(&self) -> Result<ClusterInfo, MetaError> {
        Ok(self
            .load(&self.local_cluster)?
            .unwrap_or_else(|| ClusterInfo::new(&self.local_cluster)))
    }

    fn load(&self, name: &str) -> Result<Option<ClusterInfo>, MetaError> {
        get_typed(self.kv.as_ref(), &cluster_key(name))
    }

    fn store(&self, info: &ClusterInfo) -> Result<(), MetaError> {
        self.kv.put(cluster_key(&info.name), encode(info)?)
    }
}
