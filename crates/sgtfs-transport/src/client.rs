//! Remote client seam.
//!
//! A [`RemoteClient`] is bound to one node of a remote cluster and mirrors the
//! operations the volume server exposes. Connections are produced by a
//! [`ClientFactory`] so routing can be tested without a network.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use sgtfs_meta::{ClusterInfo, DataObjectMetadata, Directory, Node, Recipe, VirtualPath};

use crate::error::Result;

/// Operations served by a remote volume node.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Name of the node this client talks to.
    fn node_name(&self) -> &str;

    /// Liveness probe.
    async fn is_live(&self) -> Result<bool>;

    /// The remote node's authoritative view of its own cluster.
    async fn get_cluster(&self) -> Result<ClusterInfo>;

    /// Directory at `path`.
    async fn get_directory(&self, path: &VirtualPath) -> Result<Directory>;

    /// Metadata of the object at `path`.
    async fn get_metadata(&self, path: &VirtualPath) -> Result<DataObjectMetadata>;

    /// Metadata of every child of the directory at `path`.
    async fn list_metadata(&self, path: &VirtualPath) -> Result<Vec<DataObjectMetadata>>;

    /// Recipe of the file at `path`.
    async fn get_recipe(&self, path: &VirtualPath) -> Result<Recipe>;

    /// Bytes of the chunk with content hash `hash` (hex) owned by `cluster`.
    async fn get_data_chunk(&self, cluster: &str, hash: &str) -> Result<Bytes>;
}

/// Produces clients bound to individual nodes.
pub trait ClientFactory: Send + Sync {
    /// Client for `node` of `cluster`. Must not perform network I/O.
    fn connect(&self, cluster: &str, node: &Node) -> Result<Arc<dyn RemoteClient>>;
}
