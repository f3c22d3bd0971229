//! Two clusters talking over real HTTP on localhost.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use sgtfs_meta::{KvStore, MemoryKvStore, Timestamp, VirtualPath};
use sgtfs_recipe::{ExportConfig, HashOutcome, MemorySource, RecipeConfig, SourceRegistry};
use sgtfs_transport::HttpClientFactory;
use sgtfs_volume::{
    NodeConfig, RemoteClusterConfig, SyncConfig, VolumeConfig, VolumeError, VolumeNode,
};

fn p(s: &str) -> VirtualPath {
    VirtualPath::parse(s).unwrap()
}

fn node_config(name: &str, addr: SocketAddr) -> NodeConfig {
    NodeConfig {
        name: name.into(),
        endpoint: addr.to_string(),
        hostnames: Vec::new(),
    }
}

fn config(
    cluster: &str,
    node: &str,
    addr: SocketAddr,
    exports: Vec<ExportConfig>,
    remote: (&str, &str, SocketAddr),
) -> VolumeConfig {
    VolumeConfig {
        cluster_name: cluster.into(),
        node_name: node.into(),
        bind_addr: addr,
        exports,
        local_nodes: vec![node_config(node, addr)],
        remote_clusters: vec![RemoteClusterConfig {
            name: remote.0.into(),
            nodes: vec![node_config(remote.1, remote.2)],
        }],
        recipe: RecipeConfig {
            chunk_size: 1024,
            hash_interval_secs: 3600,
            ..RecipeConfig::default()
        },
        sync: SyncConfig {
            cluster_sync_interval_secs: 3600,
            recipe_sync_interval_secs: 3600,
            ..SyncConfig::default()
        },
        ..VolumeConfig::default()
    }
}

fn build(config: VolumeConfig, sources: SourceRegistry) -> VolumeNode {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let factory = Arc::new(HttpClientFactory::new(Duration::from_millis(500)).unwrap());
    VolumeNode::build(config, kv, sources, factory).unwrap()
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn west_reads_east_over_http() {
    let east_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let west_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let east_addr = east_listener.local_addr().unwrap();
    let west_addr = west_listener.local_addr().unwrap();

    let data = content(2500);
    let mem = Arc::new(MemorySource::new());
    mem.put("/docs/a.txt", data.clone(), Timestamp::from_secs(100));
    mem.put("/docs/b.txt", &b"tiny"[..], Timestamp::from_secs(100));
    let mut east_sources = SourceRegistry::new();
    east_sources.register("mem", mem);

    let east = build(
        config(
            "east",
            "e1",
            east_addr,
            vec![ExportConfig {
                name: "data".into(),
                locator: "mem:///".into(),
            }],
            ("west", "w1", west_addr),
        ),
        east_sources,
    );
    assert_eq!(east.scan().files, 2);
    let west = build(
        config("west", "w1", west_addr, Vec::new(), ("east", "e1", east_addr)),
        SourceRegistry::new(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let east_running = east.start(east_listener, shutdown_rx.clone()).unwrap();
    let west_running = west.start(west_listener, shutdown_rx).unwrap();
    let router = west.router();

    let root = router.get_directory(&VirtualPath::root()).await.unwrap();
    assert_eq!(
        root.entries,
        BTreeSet::from(["east".to_string(), "west".to_string()])
    );

    let docs = router.get_directory(&p("/east/data/docs")).await.unwrap();
    assert_eq!(
        docs.entries,
        BTreeSet::from(["a.txt".to_string(), "b.txt".to_string()])
    );

    let a = p("/east/data/docs/a.txt");
    let meta = router.get_metadata(&a).await.unwrap();
    assert_eq!(meta.size, 2500);
    assert!(!meta.is_directory);
    assert_eq!(router.list_metadata(&p("/east/data/docs")).await.unwrap().len(), 2);

    let recipe = router.get_recipe(&a).await.unwrap();
    let lengths: Vec<u32> = recipe.chunks.iter().map(|c| c.length).collect();
    assert_eq!(lengths, vec![1024, 1024, 452]);

    if !recipe.is_complete() {
        let outcome = east.engine().hash_pending(&a).unwrap();
        assert!(matches!(outcome, HashOutcome::Completed | HashOutcome::Skipped));
    }
    let recipe = router.get_recipe(&a).await.unwrap();
    assert!(recipe.is_complete());
    assert!(router.cache().get(&a).is_some());

    let mut fetched = Vec::new();
    for chunk in &recipe.chunks {
        let hash = chunk.hash_hex().unwrap();
        let bytes = router.read_data_chunk("east", &hash).await.unwrap();
        fetched.extend_from_slice(&bytes);
    }
    assert_eq!(fetched, data);

    let first = recipe.chunks[0].hash_hex().unwrap();
    assert_eq!(router.locate_hash(&first).unwrap(), vec!["east".to_string()]);

    let err = router.get_metadata(&p("/east/data/nope")).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
    let east_roster = west.membership().get_cluster("east").unwrap().unwrap();
    assert!(!east_roster.nodes["e1"].status.unreachable);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        east_running.join().await.unwrap();
        west_running.join().await.unwrap();
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn blacklisted_cluster_is_unreachable() {
    let east_addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let west_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let west = build(
        config("west", "w1", west_addr, Vec::new(), ("east", "e1", east_addr)),
        SourceRegistry::new(),
    );
    for _ in 0..3 {
        west.membership().report_unreachable("east", "e1").unwrap();
    }

    let err = west
        .router()
        .get_directory(&p("/east/data"))
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::ClusterUnreachable(ref c) if c == "east"), "{err}");

    let err = west
        .router()
        .get_directory(&p("/north/data"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn refused_connection_marks_node_unreachable() {
    let east_addr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap()
    };
    let west = build(
        config(
            "west",
            "w1",
            "127.0.0.1:0".parse().unwrap(),
            Vec::new(),
            ("east", "e1", east_addr),
        ),
        SourceRegistry::new(),
    );

    let err = west
        .router()
        .get_metadata(&p("/east/data/a.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, VolumeError::ClusterUnreachable(_)), "{err}");
    let east = west.membership().get_cluster("east").unwrap().unwrap();
    assert!(east.nodes["e1"].status.unreachable);
    assert_eq!(east.nodes["e1"].status.unreachable_count, 1);
    assert!(!east.nodes["e1"].status.blacklisted);
}
