//! Assembly of one volume node from its configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sgtfs_meta::{ClusterInfo, ClusterMembership, KvStore, NamespaceTree, RecipeIndex};
use sgtfs_recipe::{
    ExportTable, HashWorker, HashWorkerHandle, HashWorkerStats, HostMap, RecipeEngine,
    SourceRegistry,
};
use sgtfs_transport::{ClientFactory, TransportRouter};

use crate::cache::RemoteRecipeCache;
use crate::config::VolumeConfig;
use crate::router::VolumeRouter;
use crate::scanner::{scan_exports, ScanReport};
use crate::server::VolumeService;
use crate::sync::{spawn_periodic, ClusterSync, RecipeSync};

/// Every manager of one node, wired together.
pub struct VolumeNode {
    config: VolumeConfig,
    membership: Arc<ClusterMembership>,
    namespace: Arc<NamespaceTree>,
    engine: Arc<RecipeEngine>,
    transport: Arc<TransportRouter>,
    cache: Arc<RemoteRecipeCache>,
    router: Arc<VolumeRouter>,
}

impl VolumeNode {
    /// Builds the node on `kv`. Local nodes (this one included) and remote
    /// clusters from the configuration are registered; remote clusters
    /// already stored in `kv` keep their cached roster.
    pub fn build(
        config: VolumeConfig,
        kv: Arc<dyn KvStore>,
        sources: SourceRegistry,
        factory: Arc<dyn ClientFactory>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let membership = Arc::new(ClusterMembership::new(
            kv.clone(),
            &config.cluster_name,
            config.membership.clone(),
        )?);
        for node in &config.local_nodes {
            membership.add_node(node.to_node())?;
        }
        membership.add_node(config.self_node().to_node())?;

        let mut fresh: Vec<ClusterInfo> = Vec::new();
        for remote in &config.remote_clusters {
            if !membership.cluster_exists(&remote.name)? {
                fresh.push(remote.to_cluster_info());
            }
        }
        if let Err(e) = membership.add_clusters(fresh) {
            warn!(error = %e, "some configured remote clusters were not registered");
        }

        let namespace = Arc::new(NamespaceTree::new(kv.clone()));
        let index = Arc::new(RecipeIndex::new(kv.clone()));
        let exports = ExportTable::from_configs(&config.cluster_name, &config.exports)?;
        let engine = Arc::new(RecipeEngine::new(
            kv,
            index.clone(),
            namespace.clone(),
            exports,
            sources,
            config.recipe.clone(),
        )?);

        let mut hosts = HostMap::new();
        for node in membership.list_nodes()? {
            for host in node.node.hostnames {
                hosts.insert(host, node.node.name.clone());
            }
        }
        engine.set_host_map(hosts);

        let transport = Arc::new(TransportRouter::new(
            membership.clone(),
            factory,
            &config.node_name,
            config.transport.clone(),
        ));
        let cache = Arc::new(RemoteRecipeCache::new(Duration::from_secs(
            config.sync.recipe_cache_ttl_secs,
        )));
        let router = Arc::new(VolumeRouter::new(
            membership.clone(),
            namespace.clone(),
            index,
            engine.clone(),
            transport.clone(),
            cache.clone(),
        ));

        info!(
            cluster = %config.cluster_name,
            node = %config.node_name,
            exports = engine.exports().len(),
            "volume node built"
        );
        Ok(Self {
            config,
            membership,
            namespace,
            engine,
            transport,
            cache,
            router,
        })
    }

    /// Configuration the node was built from.
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Cluster membership.
    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }

    /// Local namespace tree.
    pub fn namespace(&self) -> &Arc<NamespaceTree> {
        &self.namespace
    }

    /// Recipe engine.
    pub fn engine(&self) -> &Arc<RecipeEngine> {
        &self.engine
    }

    /// Request router.
    pub fn router(&self) -> &Arc<VolumeRouter> {
        &self.router
    }

    /// Registers every exported file in the namespace.
    pub fn scan(&self) -> ScanReport {
        scan_exports(&self.engine, &self.namespace)
    }

    /// Starts the hashing worker, both sync tasks and the server on
    /// `listener`. Everything stops once `shutdown` flips to true.
    pub fn start(
        &self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<RunningNode> {
        let local_addr = listener.local_addr()?;
        let hash_worker = HashWorker::start(
            self.engine.clone(),
            Duration::from_secs(self.config.recipe.hash_interval_secs),
            shutdown.clone(),
        );
        let sync = &self.config.sync;
        let tasks = vec![
            spawn_periodic(
                Arc::new(ClusterSync::new(self.transport.clone(), &self.config.node_name)),
                Duration::from_secs(sync.cluster_sync_interval_secs),
                shutdown.clone(),
            ),
            spawn_periodic(
                Arc::new(RecipeSync::new(
                    self.transport.clone(),
                    self.cache.clone(),
                    &self.config.node_name,
                    sync.recipe_sync_max_entries,
                )),
                Duration::from_secs(sync.recipe_sync_interval_secs),
                shutdown.clone(),
            ),
        ];
        let service = VolumeService::new(self.router.clone());
        let server = tokio::spawn(service.serve(listener, shutdown));
        Ok(RunningNode {
            local_addr,
            hash_worker,
            tasks,
            server,
        })
    }
}

/// Background tasks of a started node.
pub struct RunningNode {
    local_addr: SocketAddr,
    hash_worker: HashWorkerHandle,
    tasks: Vec<JoinHandle<()>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl RunningNode {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hashing worker statistics.
    pub fn hash_stats(&self) -> HashWorkerStats {
        self.hash_worker.stats()
    }

    /// Waits for every task to exit.
    pub async fn join(self) -> anyhow::Result<()> {
        self.hash_worker.join().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "sync task failed");
            }
        }
        self.server.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, RemoteClusterConfig};
    use crate::router::PathKind;
    use sgtfs_meta::{MemoryKvStore, VirtualPath};
    use sgtfs_transport::HttpClientFactory;

    fn node_config(name: &str, hosts: &[&str]) -> NodeConfig {
        NodeConfig {
            name: name.into(),
            endpoint: format!("{name}:7600"),
            hostnames: hosts.iter().map(|h| h.to_string()).collect(),
        }
    }

    fn factory() -> Arc<dyn ClientFactory> {
        Arc::new(HttpClientFactory::new(Duration::from_millis(100)).unwrap())
    }

    #[test]
    fn build_registers_roster_and_remotes() {
        let config = VolumeConfig {
            cluster_name: "east".into(),
            node_name: "e2".into(),
            local_nodes: vec![node_config("e1", &["h1"]), node_config("e3", &[])],
            remote_clusters: vec![RemoteClusterConfig {
                name: "west".into(),
                nodes: vec![node_config("w1", &[])],
            }],
            ..VolumeConfig::default()
        };
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let node = VolumeNode::build(config, kv, SourceRegistry::new(), factory()).unwrap();

        let names: Vec<String> = node
            .membership()
            .list_nodes()
            .unwrap()
            .into_iter()
            .map(|n| n.node.name)
            .collect();
        assert_eq!(names, vec!["e1", "e2", "e3"]);
        assert!(node.membership().is_leader("e1").unwrap());
        assert_eq!(node.membership().list_clusters().unwrap()[0].name, "west");
        assert_eq!(
            node.router().classify(&VirtualPath::parse("/west/x").unwrap()),
            PathKind::Remote
        );
    }

    #[test]
    fn rebuild_keeps_cached_remote_roster() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let config = VolumeConfig {
            cluster_name: "east".into(),
            node_name: "e1".into(),
            remote_clusters: vec![RemoteClusterConfig {
                name: "west".into(),
                nodes: vec![node_config("w1", &[])],
            }],
            ..VolumeConfig::default()
        };
        let node = VolumeNode::build(config.clone(), kv.clone(), SourceRegistry::new(), factory())
            .unwrap();
        node.membership()
            .update_cluster(ClusterInfo::with_nodes(
                "west",
                [node_config("w1", &[]).to_node(), node_config("w2", &[]).to_node()],
            ))
            .unwrap();
        drop(node);

        let node = VolumeNode::build(config, kv, SourceRegistry::new(), factory()).unwrap();
        let west = node.membership().get_cluster("west").unwrap().unwrap();
        assert_eq!(west.nodes.len(), 2);
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let config = VolumeConfig {
            cluster_name: "east".into(),
            node_name: "e1".into(),
            ..VolumeConfig::default()
        };
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let node = VolumeNode::build(config, kv, SourceRegistry::new(), factory()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let running = node.start(listener, rx).unwrap();
        assert_ne!(running.local_addr().port(), 0);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), running.join())
            .await
            .unwrap()
            .unwrap();
    }
}
