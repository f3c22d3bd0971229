//! Volume node configuration, loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use sgtfs_meta::{ClusterInfo, MembershipConfig, Node};
use sgtfs_recipe::{ExportConfig, RecipeConfig};
use sgtfs_transport::TransportConfig;

/// A node entry in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, unique within its cluster
    pub name: String,
    /// `host:port` or URL of the node's volume server
    pub endpoint: String,
    /// Host names used to match storage block owners
    #[serde(default)]
    pub hostnames: Vec<String>,
}

impl NodeConfig {
    /// Membership node for this entry.
    pub fn to_node(&self) -> Node {
        Node {
            name: self.name.clone(),
            transport_endpoint: self.endpoint.clone(),
            hostnames: self.hostnames.clone(),
        }
    }
}

/// A remote cluster known at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteClusterConfig {
    /// Cluster name
    pub name: String,
    /// Seed nodes; the sync task replaces them with the cluster's own roster
    pub nodes: Vec<NodeConfig>,
}

impl RemoteClusterConfig {
    /// Initial cached roster.
    pub fn to_cluster_info(&self) -> ClusterInfo {
        ClusterInfo::with_nodes(&self.name, self.nodes.iter().map(NodeConfig::to_node))
    }
}

/// Periodic sync task settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between remote roster refreshes
    pub cluster_sync_interval_secs: u64,
    /// Seconds between remote recipe pulls
    pub recipe_sync_interval_secs: u64,
    /// Namespace entries visited per remote cluster and recipe-sync cycle
    pub recipe_sync_max_entries: usize,
    /// How long a pulled remote recipe is served from the cache
    pub recipe_cache_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cluster_sync_interval_secs: 60,
            recipe_sync_interval_secs: 300,
            recipe_sync_max_entries: 10_000,
            recipe_cache_ttl_secs: 600,
        }
    }
}

/// Configuration of one `sgt-volume` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Name of the cluster this node belongs to
    pub cluster_name: String,
    /// Name of this node within the cluster
    pub node_name: String,
    /// Address the volume server listens on
    pub bind_addr: SocketAddr,
    /// Exported top-level directories
    pub exports: Vec<ExportConfig>,
    /// Nodes of the local cluster, this one included
    pub local_nodes: Vec<NodeConfig>,
    /// Remote clusters to federate with
    pub remote_clusters: Vec<RemoteClusterConfig>,
    /// Chunking and hashing
    pub recipe: RecipeConfig,
    /// Blacklist policy
    pub membership: MembershipConfig,
    /// Remote call deadlines
    pub transport: TransportConfig,
    /// Sync tasks
    pub sync: SyncConfig,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::from("local"),
            node_name: String::from("node1"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7600)),
            exports: Vec::new(),
            local_nodes: Vec::new(),
            remote_clusters: Vec::new(),
            recipe: RecipeConfig::default(),
            membership: MembershipConfig::default(),
            transport: TransportConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl VolumeConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: VolumeConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the node cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster_name.is_empty() || self.node_name.is_empty() {
            anyhow::bail!("cluster_name and node_name must be set");
        }
        if self.recipe.chunk_size == 0 {
            anyhow::bail!("recipe.chunk_size must be > 0");
        }
        for remote in &self.remote_clusters {
            if remote.name == self.cluster_name {
                anyhow::bail!("remote cluster {} has the local cluster's name", remote.name);
            }
        }
        Ok(())
    }

    /// Local roster entry for this node; a default one if `local_nodes` omits it.
    pub fn self_node(&self) -> NodeConfig {
        self.local_nodes
            .iter()
            .find(|n| n.name == self.node_name)
            .cloned()
            .unwrap_or_else(|| NodeConfig {
                name: self.node_name.clone(),
                endpoint: self.bind_addr.to_string(),
                hostnames: Vec::new(),
            })
    }

    /// Example configuration rendered as TOML.
    pub fn template() -> anyhow::Result<String> {
        let example = VolumeConfig {
            cluster_name: "east".into(),
            node_name: "east-1".into(),
            exports: vec![ExportConfig {
                name: "data".into(),
                locator: "file:///srv/data".into(),
            }],
            local_nodes: vec![NodeConfig {
                name: "east-1".into(),
                endpoint: "10.0.0.1:7600".into(),
                hostnames: vec!["east-1.example".into()],
            }],
            remote_clusters: vec![RemoteClusterConfig {
                name: "west".into(),
                nodes: vec![NodeConfig {
                    name: "west-1".into(),
                    endpoint: "10.1.0.1:7600".into(),
                    hostnames: Vec::new(),
                }],
            }],
            ..VolumeConfig::default()
        };
        Ok(toml::to_string_pretty(&example)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = VolumeConfig::default();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 7600)));
        assert_eq!(config.recipe.chunk_size, 1024 * 1024);
        assert_eq!(config.recipe.hash_algorithm, "BLAKE3");
        assert_eq!(config.membership.blacklist_threshold, 3);
        assert_eq!(config.sync.cluster_sync_interval_secs, 60);
        assert!(config.exports.is_empty());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
cluster_name = "east"
node_name = "east-2"
bind_addr = "127.0.0.1:9000"

[[exports]]
name = "data"
locator = "file:///srv/data"

[[local_nodes]]
name = "east-1"
endpoint = "10.0.0.1:7600"

[[local_nodes]]
name = "east-2"
endpoint = "10.0.0.2:7600"
hostnames = ["e2.example"]

[[remote_clusters]]
name = "west"
nodes = [{{ name = "west-1", endpoint = "10.1.0.1:7600" }}]

[recipe]
chunk_size = 4096
hash_algorithm = "SHA-256"

[sync]
recipe_cache_ttl_secs = 5
"#
        )
        .unwrap();

        let config = VolumeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster_name, "east");
        assert_eq!(config.exports[0].locator, "file:///srv/data");
        assert_eq!(config.local_nodes.len(), 2);
        assert_eq!(config.self_node().hostnames, vec!["e2.example"]);
        assert_eq!(config.remote_clusters[0].to_cluster_info().nodes.len(), 1);
        assert_eq!(config.recipe.chunk_size, 4096);
        assert_eq!(config.recipe.max_hash_attempts, 5);
        assert_eq!(config.sync.recipe_cache_ttl_secs, 5);
        assert_eq!(config.sync.recipe_sync_interval_secs, 300);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"cluster_name": "west", "node_name": "w1", "membership": {{"blacklist_threshold": 7}}}}"#
        )
        .unwrap();
        let config = VolumeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster_name, "west");
        assert_eq!(config.membership.blacklist_threshold, 7);
        assert_eq!(config.self_node().endpoint, "0.0.0.0:7600");
    }

    #[test]
    fn test_rejects_bad_files() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(VolumeConfig::from_file(file.path()).is_err());

        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"cluster_name": "east", "remote_clusters": [{{"name": "east", "nodes": []}}]}}"#
        )
        .unwrap();
        assert!(VolumeConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_template_parses_back() {
        let text = VolumeConfig::template().unwrap();
        let parsed: VolumeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cluster_name, "east");
        assert_eq!(parsed.remote_clusters[0].nodes[0].name, "west-1");
        parsed.validate().unwrap();
    }
}
