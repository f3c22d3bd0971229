//! Shared entities of the federated namespace and the metadata error type.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::path::VirtualPath;

/// Owner hint meaning "any node can serve this byte range".
pub const ANY_OWNER: &str = "*";

/// Pseudo-size reported for synthesized directories.
pub const DIRECTORY_PSEUDO_SIZE: u64 = 4096;

/// Errors raised by the metadata subsystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetaError {
    /// Malformed path, name, or request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Nothing is stored under the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// The item already exists and may not be overwritten.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The backing key-value store failed.
    #[error("KV store error: {0}")]
    KvError(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Some items of a batch operation failed; the rest were applied.
    #[error("{} of {total} batch items failed", failures.len())]
    Batch {
        /// Number of items in the batch.
        total: usize,
        /// (item, reason) for every failed item.
        failures: Vec<(String, String)>,
    },
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts a `SystemTime`, clamping pre-epoch times to the epoch.
    pub fn from_system_time(t: SystemTime) -> Self {
        let since = t.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since.as_secs(),
            nanos: since.subsec_nanos(),
        }
    }

    /// Whole-second timestamp.
    pub fn from_secs(secs: u64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Time elapsed since `self`, zero if `self` lies in the future.
    pub fn elapsed(&self) -> Duration {
        let now = Self::now();
        let a = Duration::new(self.secs, self.nanos);
        let b = Duration::new(now.secs, now.nanos);
        b.saturating_sub(a)
    }

    /// `self + d`.
    pub fn plus(&self, d: Duration) -> Self {
        let total = Duration::new(self.secs, self.nanos) + d;
        Self {
            secs: total.as_secs(),
            nanos: total.subsec_nanos(),
        }
    }
}

/// Metadata of one object in the federated namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObjectMetadata {
    /// Object path.
    pub path: VirtualPath,
    /// Size in bytes (pseudo-size for directories).
    pub size: u64,
    /// Whether the object is a directory.
    pub is_directory: bool,
    /// Last modification time.
    pub mod_time: Timestamp,
}

impl DataObjectMetadata {
    /// Metadata for a synthesized or stored directory.
    pub fn directory(path: VirtualPath, mod_time: Timestamp) -> Self {
        Self {
            path,
            size: DIRECTORY_PSEUDO_SIZE,
            is_directory: true,
            mod_time,
        }
    }

    /// Metadata of a file, derived from its recipe.
    pub fn from_recipe(recipe: &Recipe) -> Self {
        Self {
            path: recipe.path.clone(),
            size: recipe.size,
            is_directory: false,
            mod_time: recipe.mod_time,
        }
    }
}

/// One fixed-size byte range of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeChunk {
    /// Byte offset of the chunk in the file.
    pub offset: u64,
    /// Chunk length, always > 0.
    pub length: u32,
    /// Content hash; `None` while hashing is pending.
    pub hash: Option<Vec<u8>>,
    /// Nodes holding the underlying block, or `"*"`.
    pub owner_hints: Vec<String>,
}

impl RecipeChunk {
    /// Creates an unhashed chunk.
    pub fn new(offset: u64, length: u32, owner_hints: Vec<String>) -> Self {
        Self {
            offset,
            length,
            hash: None,
            owner_hints,
        }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }

    /// Whether the content hash is known.
    pub fn is_hashed(&self) -> bool {
        self.hash.is_some()
    }

    /// Lowercase hex of the hash, if any.
    pub fn hash_hex(&self) -> Option<String> {
        self.hash.as_deref().map(hex::encode)
    }
}

/// Chunk-level description of one exported file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Path of the file this recipe describes.
    pub path: VirtualPath,
    /// Name of the digest used for chunk hashes.
    pub hash_algorithm: String,
    /// Nominal chunk size; only the last chunk may be shorter.
    pub chunk_size: u32,
    /// File size in bytes.
    pub size: u64,
    /// Modification time of the underlying resource when chunked.
    pub mod_time: Timestamp,
    /// Chunks in offset order, tiling `[0, size)`.
    pub chunks: Vec<RecipeChunk>,
}

impl Recipe {
    /// True once every chunk carries a hash.
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(RecipeChunk::is_hashed)
    }

    /// Number of chunks still waiting for a hash.
    pub fn pending_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| !c.is_hashed()).count()
    }

    /// Chunk containing byte `offset`.
    pub fn chunk_at(&self, offset: u64) -> Option<&RecipeChunk> {
        if offset >= self.size {
            return None;
        }
        let idx = self.chunks.partition_point(|c| c.end() <= offset);
        self.chunks.get(idx)
    }

    /// First chunk whose hash equals `hash`.
    pub fn find_chunk(&self, hash: &[u8]) -> Option<&RecipeChunk> {
        self.chunks.iter().find(|c| c.hash.as_deref() == Some(hash))
    }

    /// Distinct hex hashes of all hashed chunks.
    pub fn hash_set(&self) -> BTreeSet<String> {
        self.chunks.iter().filter_map(RecipeChunk::hash_hex).collect()
    }
}

/// A directory of the federated namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Directory path.
    pub path: VirtualPath,
    /// Child names.
    pub entries: BTreeSet<String>,
}

impl Directory {
    /// An empty directory.
    pub fn new(path: VirtualPath) -> Self {
        Self {
            path,
            entries: BTreeSet::new(),
        }
    }
}

/// A node of a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique name within its cluster.
    pub name: String,
    /// Address the transport uses to reach the node.
    pub transport_endpoint: String,
    /// Host names of the machine, used to match storage block owners.
    pub hostnames: Vec<String>,
}

impl Node {
    /// Node with no extra hostnames.
    pub fn new(name: &str, transport_endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            transport_endpoint: transport_endpoint.to_string(),
            hostnames: Vec::new(),
        }
    }
}

/// Reachability state of a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Last contact attempt failed.
    pub unreachable: bool,
    /// When the node first became unreachable.
    pub unreachable_since: Option<Timestamp>,
    /// Failed contact attempts since the status was last cleared.
    pub unreachable_count: u32,
    /// Excluded from contact selection until cleared.
    pub blacklisted: bool,
    /// When the node was blacklisted.
    pub blacklisted_since: Option<Timestamp>,
}

/// A node together with its status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node identity.
    pub node: Node,
    /// Reachability state.
    pub status: NodeStatus,
}

/// Roster of one cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Cluster name.
    pub name: String,
    /// Nodes keyed by name.
    pub nodes: BTreeMap<String, ClusterNode>,
}

impl ClusterInfo {
    /// Empty roster.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    /// Roster from nodes, all with a clean status.
    pub fn with_nodes(name: &str, nodes: impl IntoIterator<Item = Node>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| {
                (
                    node.name.clone(),
                    ClusterNode {
                        node,
                        status: NodeStatus::default(),
                    },
                )
            })
            .collect();
        Self {
            name: name.to_string(),
            nodes,
        }
    }

    /// Nodes eligible for contact (not blacklisted), ordered by name.
    pub fn contactable_nodes(&self) -> Vec<&ClusterNode> {
        self.nodes
            .values()
            .filter(|n| !n.status.blacklisted)
            .collect()
    }
}
