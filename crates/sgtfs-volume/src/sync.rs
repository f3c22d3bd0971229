//! Leader-only periodic tasks that keep remote state warm.
//!
//! [`ClusterSync`] refreshes the cached roster of every remote cluster from
//! the cluster itself. [`RecipeSync`] walks remote namespaces and fills the
//! [`RemoteRecipeCache`]. Both leave stale state in place when a cluster
//! cannot be reached and try again on the next tick.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sgtfs_meta::{ClusterMembership, VirtualPath};
use sgtfs_transport::{RoutedClient, TransportRouter};

use crate::cache::RemoteRecipeCache;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// This node was not the leader; nothing ran
    pub skipped: bool,
    /// Remote clusters visited
    pub clusters: u64,
    /// Clusters whose roster or recipes were refreshed
    pub refreshed: u64,
    /// Clusters that could not be synced this pass
    pub failed: u64,
    /// Recipes stored in the cache
    pub recipes: u64,
}

/// A pass the periodic driver can run.
#[async_trait]
pub trait SyncTask: Send + Sync + 'static {
    /// Task name used in logs.
    fn name(&self) -> &'static str;

    /// One pass over all remote clusters. Stops early once `shutdown` is set.
    async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> SyncReport;
}

fn leader_gate(membership: &ClusterMembership, node: &str, task: &str) -> bool {
    match membership.is_leader(node) {
        Ok(true) => true,
        Ok(false) => {
            debug!(task, node, "not the leader, skipping sync");
            false
        }
        Err(e) => {
            warn!(task, error = %e, "leader check failed");
            false
        }
    }
}

/// Replaces each remote roster with the one the cluster reports about itself.
pub struct ClusterSync {
    transport: Arc<TransportRouter>,
    node_name: String,
}

impl ClusterSync {
    /// Sync acting as `node_name` of the local cluster.
    pub fn new(transport: Arc<TransportRouter>, node_name: &str) -> Self {
        Self {
            transport,
            node_name: node_name.to_string(),
        }
    }
}

#[async_trait]
impl SyncTask for ClusterSync {
    fn name(&self) -> &'static str {
        "cluster-sync"
    }

    async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> SyncReport {
        let membership = self.transport.membership();
        let mut report = SyncReport::default();
        if !leader_gate(membership, &self.node_name, self.name()) {
            report.skipped = true;
            return report;
        }
        let clusters = match membership.list_clusters() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot list remote clusters");
                return report;
            }
        };
        for cached in clusters {
            if *shutdown.borrow() {
                break;
            }
            report.clusters += 1;
            let fetched = match self.transport.get_client(&cached.name).await {
                Ok(client) => client.get_cluster().await,
                Err(e) => Err(e),
            };
            let roster = match fetched {
                Ok(roster) => roster,
                Err(e) => {
                    warn!(
                        cluster = %cached.name,
                        error = %e,
                        "roster fetch failed, keeping cached view"
                    );
                    report.failed += 1;
                    continue;
                }
            };
            if roster.name != cached.name {
                warn!(
                    cluster = %cached.name,
                    reported = %roster.name,
                    "remote reported another cluster name"
                );
                report.failed += 1;
                continue;
            }
            match membership.update_cluster(roster) {
                Ok(()) => report.refreshed += 1,
                Err(e) => {
                    warn!(cluster = %cached.name, error = %e, "roster update failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Pulls remote recipes into the cache, breadth-first from each
/// cluster-root, visiting at most `max_entries` namespace entries per cluster.
pub struct RecipeSync {
    transport: Arc<TransportRouter>,
    cache: Arc<RemoteRecipeCache>,
    node_name: String,
    max_entries: usize,
}

impl RecipeSync {
    /// Sync acting as `node_name` of the local cluster.
    pub fn new(
        transport: Arc<TransportRouter>,
        cache: Arc<RemoteRecipeCache>,
        node_name: &str,
        max_entries: usize,
    ) -> Self {
        Self {
            transport,
            cache,
            node_name: node_name.to_string(),
            max_entries,
        }
    }

    async fn walk(
        &self,
        client: &RoutedClient,
        shutdown: &watch::Receiver<bool>,
    ) -> sgtfs_transport::Result<u64> {
        let mut stored = 0;
        let mut visited = 0usize;
        let mut queue = VecDeque::from([VirtualPath::cluster_root(client.cluster())?]);
        while let Some(dir) = queue.pop_front() {
            if *shutdown.borrow() {
                break;
            }
            let children = match client.list_metadata(&dir).await {
                Ok(children) => children,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            for child in children {
                if visited >= self.max_entries {
                    debug!(cluster = client.cluster(), visited, "recipe sync entry limit reached");
                    return Ok(stored);
                }
                visited += 1;
                if child.is_directory {
                    queue.push_back(child.path);
                    continue;
                }
                if let Some(cached) = self.cache.get(&child.path) {
                    if cached.size == child.size && cached.mod_time == child.mod_time {
                        continue;
                    }
                }
                match client.get_recipe(&child.path).await {
                    Ok(recipe) if recipe.is_complete() => {
                        self.cache.insert(recipe);
                        stored += 1;
                    }
                    Ok(_) => debug!(path = %child.path, "remote recipe still hashing"),
                    Err(e) if e.is_not_found() => self.cache.invalidate(&child.path),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(stored)
    }
}

#[async_trait]
impl SyncTask for RecipeSync {
    fn name(&self) -> &'static str {
        "recipe-sync"
    }

    async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> SyncReport {
        let membership = self.transport.membership();
        let mut report = SyncReport::default();
        if !leader_gate(membership, &self.node_name, self.name()) {
            report.skipped = true;
            return report;
        }
        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(purged, "expired remote recipes dropped");
        }
        let clusters = match membership.list_clusters() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot list remote clusters");
                return report;
            }
        };
        for cluster in clusters {
            if *shutdown.borrow() {
                break;
            }
            report.clusters += 1;
            let client = match self.transport.get_client(&cluster.name).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(cluster = %cluster.name, error = %e, "recipe sync skipped cluster");
                    report.failed += 1;
                    continue;
                }
            };
            match self.walk(&client, shutdown).await {
                Ok(stored) => {
                    report.refreshed += 1;
                    report.recipes += stored;
                }
                Err(e) => {
                    warn!(cluster = %cluster.name, error = %e, "recipe sync aborted for cluster");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Runs `task` every `interval` until `shutdown` flips. The first pass runs
/// immediately.
pub fn spawn_periodic<T: SyncTask>(
    task: Arc<T>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = interval.max(Duration::from_millis(1));
        info!(task = task.name(), interval_ms = interval.as_millis() as u64, "sync task started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            let report = task.run_once(&shutdown).await;
            if !report.skipped {
                debug!(
                    task = task.name(),
                    clusters = report.clusters,
                    refreshed = report.refreshed,
                    failed = report.failed,
                    recipes = report.recipes,
                    "sync pass finished"
                );
            }
        }
        info!(task = task.name(), "sync task stopped");
    })
}
