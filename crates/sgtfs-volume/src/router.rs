//! Volume router: the single entry point for namespace, recipe and chunk
//! requests.
//!
//! Paths are classified as root, cluster-root, local or remote. Root and
//! cluster-root objects are synthesized from membership; local paths are
//! served from the namespace tree and the recipe engine; remote paths are
//! delegated to a contact node picked by the transport router.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, warn};

use sgtfs_meta::{
    ClusterInfo, ClusterMembership, DataObjectMetadata, Directory, NamespaceTree, Recipe,
    RecipeIndex, Timestamp, VirtualPath,
};
use sgtfs_recipe::{HashAlgorithm, RecipeEngine};
use sgtfs_transport::TransportRouter;

use crate::cache::RemoteRecipeCache;
use crate::error::{Result, VolumeError};

/// Where a path is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// The federation root `/`
    Root,
    /// `/cluster`, synthesized
    ClusterRoot {
        /// Cluster is the local one
        local: bool,
    },
    /// Below the local cluster-root
    Local,
    /// Below a remote cluster-root
    Remote,
}

/// Dispatches every volume operation to the local managers or a remote node.
pub struct VolumeRouter {
    membership: Arc<ClusterMembership>,
    namespace: Arc<NamespaceTree>,
    index: Arc<RecipeIndex>,
    engine: Arc<RecipeEngine>,
    transport: Arc<TransportRouter>,
    cache: Arc<RemoteRecipeCache>,
}

impl VolumeRouter {
    /// Wires the router to its collaborators.
    pub fn new(
        membership: Arc<ClusterMembership>,
        namespace: Arc<NamespaceTree>,
        index: Arc<RecipeIndex>,
        engine: Arc<RecipeEngine>,
        transport: Arc<TransportRouter>,
        cache: Arc<RemoteRecipeCache>,
    ) -> Self {
        Self {
            membership,
            namespace,
            index,
            engine,
            transport,
            cache,
        }
    }

    /// Cluster membership.
    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }

    /// Recipe engine.
    pub fn engine(&self) -> &Arc<RecipeEngine> {
        &self.engine
    }

    /// Remote recipe cache.
    pub fn cache(&self) -> &Arc<RemoteRecipeCache> {
        &self.cache
    }

    /// Classifies `path`.
    pub fn classify(&self, path: &VirtualPath) -> PathKind {
        let local = self.membership.is_local(path.cluster());
        if path.is_root() {
            PathKind::Root
        } else if path.is_cluster_root() {
            PathKind::ClusterRoot { local }
        } else if local {
            PathKind::Local
        } else {
            PathKind::Remote
        }
    }

    /// Always true while the process serves requests.
    pub fn is_live(&self) -> bool {
        true
    }

    /// Authoritative roster of the local cluster.
    pub fn get_cluster(&self) -> Result<ClusterInfo> {
        Ok(self.membership.local_cluster()?)
    }

    /// Directory at `path`.
    pub async fn get_directory(&self, path: &VirtualPath) -> Result<Directory> {
        match self.classify(path) {
            PathKind::Root => self.root_directory(),
            PathKind::ClusterRoot { local: true } => {
                let dir = self.namespace.list(path)?;
                if dir.entries.is_empty() {
                    return Err(VolumeError::NotFound(format!("no entries under {path}")));
                }
                Ok(dir)
            }
            PathKind::Local => self
                .local_directory(path)?
                .ok_or_else(|| VolumeError::NotFound(format!("directory {path}"))),
            PathKind::ClusterRoot { local: false } | PathKind::Remote => {
                self.ensure_known(path.cluster())?;
                let client = self.transport.get_client(path.cluster()).await?;
                Ok(client.get_directory(path).await?)
            }
        }
    }

    /// Metadata of the object at `path`.
    pub async fn get_metadata(&self, path: &VirtualPath) -> Result<DataObjectMetadata> {
        match self.classify(path) {
            PathKind::Root | PathKind::ClusterRoot { local: true } => {
                Ok(DataObjectMetadata::directory(path.clone(), Timestamp::now()))
            }
            PathKind::Local => self.local_metadata(path),
            PathKind::ClusterRoot { local: false } | PathKind::Remote => {
                self.ensure_known(path.cluster())?;
                let client = self.transport.get_client(path.cluster()).await?;
                Ok(client.get_metadata(path).await?)
            }
        }
    }

    /// Metadata of every child of the directory at `path`. An empty
    /// directory is `NotFound`.
    pub async fn list_metadata(&self, path: &VirtualPath) -> Result<Vec<DataObjectMetadata>> {
        let listed = match self.classify(path) {
            PathKind::Root => {
                let now = Timestamp::now();
                self.root_directory()?
                    .entries
                    .iter()
                    .map(|name| {
                        let root = VirtualPath::cluster_root(name)?;
                        Ok(DataObjectMetadata::directory(root, now))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            PathKind::ClusterRoot { local: true } | PathKind::Local => {
                let dir = match self.classify(path) {
                    PathKind::Local => self
                        .local_directory(path)?
                        .ok_or_else(|| VolumeError::NotFound(format!("directory {path}")))?,
                    _ => self.namespace.list(path)?,
                };
                let mut out = Vec::with_capacity(dir.entries.len());
                for name in &dir.entries {
                    let child = path.join(name)?;
                    match self.local_metadata(&child) {
                        Ok(meta) => out.push(meta),
                        Err(e) if e.is_not_found() => {
                            debug!(path = %child, "skipping vanished entry");
                        }
                        Err(e) => return Err(e),
                    }
                }
                out
            }
            PathKind::ClusterRoot { local: false } | PathKind::Remote => {
                self.ensure_known(path.cluster())?;
                let client = self.transport.get_client(path.cluster()).await?;
                client.list_metadata(path).await?
            }
        };
        if listed.is_empty() {
            return Err(VolumeError::NotFound(format!("no entries under {path}")));
        }
        Ok(listed)
    }

    /// Recipe of the file at `path`. Local recipes are generated on first
    /// access; remote ones are served from the cache while fresh.
    pub async fn get_recipe(&self, path: &VirtualPath) -> Result<Recipe> {
        match self.classify(path) {
            PathKind::Root | PathKind::ClusterRoot { .. } => Err(VolumeError::InvalidArgument(
                format!("{path} is a directory"),
            )),
            PathKind::Local => {
                if self.local_directory(path)?.is_some() {
                    return Err(VolumeError::InvalidArgument(format!("{path} is a directory")));
                }
                Ok(self.engine.recipe(path)?)
            }
            PathKind::Remote => {
                if let Some(recipe) = self.cache.get(path) {
                    return Ok(recipe);
                }
                self.ensure_known(path.cluster())?;
                let client = self.transport.get_client(path.cluster()).await?;
                let recipe = client.get_recipe(path).await?;
                self.cache.insert(recipe.clone());
                Ok(recipe)
            }
        }
    }

    /// Stream over the chunk with content hash `hash` (hex) owned by
    /// `cluster`. Local chunks come from the first indexed file that is
    /// unchanged since hashing and whose bytes still digest to `hash`.
    pub async fn get_data_chunk(&self, cluster: &str, hash: &str) -> Result<Box<dyn Read + Send>> {
        if self.membership.is_local(cluster) {
            return Ok(Box::new(Cursor::new(self.read_local_chunk(hash)?)));
        }
        self.ensure_known(cluster)?;
        let client = self.transport.get_client(cluster).await?;
        let bytes = client.get_data_chunk(cluster, hash).await?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    /// Whole chunk as bytes. Local reads run on the blocking pool.
    pub async fn read_data_chunk(self: &Arc<Self>, cluster: &str, hash: &str) -> Result<Bytes> {
        if !self.membership.is_local(cluster) {
            self.ensure_known(cluster)?;
            let client = self.transport.get_client(cluster).await?;
            return Ok(client.get_data_chunk(cluster, hash).await?);
        }
        let router = self.clone();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || router.read_local_chunk(&hash))
            .await
            .map_err(|e| VolumeError::Internal(e.to_string()))?
    }

    /// Clusters known to hold a chunk with `hash`: the local cluster first
    /// (from the hash index), then remote clusters from cached recipes.
    pub fn locate_hash(&self, hash: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if !self.index.paths_for_hash(hash)?.is_empty() {
            out.push(self.membership.local_cluster_name().to_string());
        }
        out.extend(self.cache.clusters_with_hash(hash));
        Ok(out)
    }

    fn read_local_chunk(&self, hash: &str) -> Result<Bytes> {
        let wanted = hex::decode(hash)
            .map_err(|_| VolumeError::InvalidArgument(format!("bad hash {hash:?}")))?;
        for path in self.index.paths_for_hash(hash)? {
            // A changed file is regenerated and drops out of the hash index here.
            let recipe = match self.engine.recipe(&path) {
                Ok(recipe) => recipe,
                Err(e) => {
                    debug!(path = %path, hash, error = %e, "skipping chunk source");
                    continue;
                }
            };
            let Some(chunk) = recipe.find_chunk(&wanted) else {
                debug!(path = %path, hash, "chunk no longer in recipe");
                continue;
            };
            let algorithm: HashAlgorithm = recipe.hash_algorithm.parse()?;
            let mut buf = Vec::with_capacity(chunk.length as usize);
            let read = self
                .engine
                .open_chunk(&path, chunk)
                .map_err(VolumeError::from)
                .and_then(|mut reader| {
                    reader
                        .read_to_end(&mut buf)
                        .map_err(|e| VolumeError::ResourceUnavailable(format!("{path}: {e}")))
                });
            if let Err(e) = read {
                warn!(path = %path, hash, error = %e, "chunk source unreadable, trying next");
                continue;
            }
            if algorithm.digest(&buf) != wanted {
                warn!(path = %path, hash, "chunk bytes no longer match, dropping recipe");
                if let Err(e) = self.engine.remove(&path) {
                    warn!(path = %path, error = %e, "cannot drop recipe");
                }
                continue;
            }
            return Ok(Bytes::from(buf));
        }
        Err(VolumeError::NotFound(format!("chunk {hash}")))
    }

    fn local_metadata(&self, path: &VirtualPath) -> Result<DataObjectMetadata> {
        if self.local_directory(path)?.is_some() {
            return Ok(DataObjectMetadata::directory(path.clone(), Timestamp::now()));
        }
        let recipe = self.engine.recipe(path)?;
        Ok(DataObjectMetadata::from_recipe(&recipe))
    }

    /// Local directory at `path`, or `None` if `path` is not one. Directories
    /// created after the export scan are registered from the source backend;
    /// one holding no files is `NotFound`.
    fn local_directory(&self, path: &VirtualPath) -> Result<Option<Directory>> {
        if let Some(dir) = self.namespace.get(path)? {
            return Ok(Some(dir));
        }
        match self.engine.discover_directory(path) {
            Ok(Some(_)) => self
                .namespace
                .get(path)?
                .map(Some)
                .ok_or_else(|| VolumeError::NotFound(format!("no entries under {path}"))),
            Ok(None) => Ok(None),
            Err(e) => {
                debug!(path = %path, error = %e, "not a discoverable directory");
                Ok(None)
            }
        }
    }

    fn root_directory(&self) -> Result<Directory> {
        let mut entries: BTreeSet<String> = self
            .membership
            .list_clusters()?
            .into_iter()
            .map(|c| c.name)
            .collect();
        entries.insert(self.membership.local_cluster_name().to_string());
        Ok(Directory {
            path: VirtualPath::root(),
            entries,
        })
    }

    fn ensure_known(&self, cluster: &str) -> Result<()> {
        if self.membership.cluster_exists(cluster)? {
            Ok(())
        } else {
            Err(VolumeError::NotFound(format!("cluster {cluster}")))
        }
    }
}
