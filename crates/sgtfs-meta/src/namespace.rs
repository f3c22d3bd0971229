//! Federated directory hierarchy.
//!
//! Directories are stored in the KV store with key format `dir/{path}` and a
//! value holding the set of child names. A directory record exists only while
//! it has entries, except cluster-roots, which may be stored empty and are
//! never deleted. The federation root is not stored at all: it is synthesized
//! from cluster membership by the volume layer.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

use crate::kvstore::{encode, get_typed, BatchOp, KvStore};
use crate::path::VirtualPath;
use crate::types::{Directory, MetaError};

const DIR_PREFIX: &str = "dir/";

fn dir_key(path: &VirtualPath) -> Vec<u8> {
    format!("{DIR_PREFIX}{path}").into_bytes()
}

fn subtree_prefix(path: &VirtualPath) -> Vec<u8> {
    if path.is_cluster_root() {
        format!("{DIR_PREFIX}{path}").into_bytes()
    } else {
        format!("{DIR_PREFIX}{path}/").into_bytes()
    }
}

/// Manages the directory tree on top of the KV store.
pub struct NamespaceTree {
    kv: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
}

impl NamespaceTree {
    /// Creates a tree on top of `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    /// Registers `path` as a child of its parent, materializing missing
    /// ancestors up to the owning cluster-root.
    pub fn add_entry(&self, path: &VirtualPath) -> Result<(), MetaError> {
        check_entry_path(path)?;
        let _guard = self.write_lock.lock();
        self.add_locked(path)
    }

    /// Removes `path` (and any directory subtree below it) from its parent.
    /// Parents left empty are removed too, stopping at the cluster-root.
    ///
    /// Returns false if `path` was not registered.
    pub fn remove_entry(&self, path: &VirtualPath) -> Result<bool, MetaError> {
        check_entry_path(path)?;
        let _guard = self.write_lock.lock();

        let mut ops: Vec<BatchOp> = self
            .kv
            .keys(&subtree_prefix(path))?
            .into_iter()
            .map(|key| BatchOp::Delete { key })
            .collect();
        ops.push(BatchOp::Delete { key: dir_key(path) });
        self.kv.write_batch(ops)?;

        self.remove_locked(path)
    }

    /// Stored directory at `path`, if any.
    ///
    /// Cluster-roots with no registered entries yield `None` here; use
    /// [`NamespaceTree::list`] to get them as empty directories.
    pub fn get(&self, path: &VirtualPath) -> Result<Option<Directory>, MetaError> {
        if path.is_root() {
            return Ok(None);
        }
        let entries: Option<BTreeSet<String>> = get_typed(self.kv.as_ref(), &dir_key(path))?;
        Ok(entries.map(|entries| Directory {
            path: path.clone(),
            entries,
        }))
    }

    /// Directory at `path`. Cluster-roots always exist (possibly empty);
    /// other paths fail with `NotFound` unless a directory is stored.
    pub fn list(&self, path: &VirtualPath) -> Result<Directory, MetaError> {
        if path.is_root() {
            return Err(MetaError::InvalidArgument(
                "the federation root is not stored in the namespace tree".to_string(),
            ));
        }
        match self.get(path)? {
            Some(dir) => Ok(dir),
            None if path.is_cluster_root() => Ok(Directory::new(path.clone())),
            None => Err(MetaError::NotFound(format!("directory {path}"))),
        }
    }

    /// True if a directory record exists at `path`.
    pub fn is_directory(&self, path: &VirtualPath) -> Result<bool, MetaError> {
        Ok(self.kv.get(&dir_key(path))?.is_some())
    }

    /// True if `path` is registered in its parent directory.
    pub fn contains(&self, path: &VirtualPath) -> Result<bool, MetaError> {
        let Some(parent) = path.parent() else {
            return Ok(true);
        };
        if parent.is_root() {
            return Ok(false);
        }
        Ok(self
            .get(&parent)?
            .is_some_and(|dir| dir.entries.contains(path.name())))
    }

    /// All stored directories of one cluster, in path order.
    pub fn directories(&self, cluster: &str) -> Result<Vec<Directory>, MetaError> {
        let root = VirtualPath::cluster_root(cluster)?;
        let mut out = Vec::new();
        for (key, value) in self.kv.scan_prefix(&subtree_prefix(&root))? {
            let s = String::from_utf8_lossy(&key[DIR_PREFIX.len()..]).into_owned();
            let path = VirtualPath::parse(&s)?;
            if path.cluster() != cluster {
                continue;
            }
            out.push(Directory {
                path,
                entries: crate::kvstore::decode(&value)?,
            });
        }
        Ok(out)
    }

    fn add_locked(&self, path: &VirtualPath) -> Result<(), MetaError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        let stored: Option<BTreeSet<String>> = get_typed(self.kv.as_ref(), &dir_key(&parent))?;
        let created = stored.is_none();
        let mut entries = stored.unwrap_or_default();
        if entries.insert(path.name().to_string()) {
            self.kv.put(dir_key(&parent), encode(&entries)?)?;
            trace!(%parent, name = path.name(), "namespace entry added");
        }
        if created && !parent.is_cluster_root() {
            self.add_locked(&parent)?;
        }
        Ok(())
    }

    fn remove_locked(&self, path: &VirtualPath) -> Result<bool, MetaError> {
        let Some(parent) = path.parent() else {
            return Ok(false);
        };
        let stored: Option<BTreeSet<String>> = get_typed(self.kv.as_ref(), &dir_key(&parent))?;
        let Some(mut entries) = stored else {
            return Ok(false);
        };
        if !entries.remove(path.name()) {
            return Ok(false);
        }
        trace!(%parent, name = path.name(), "namespace entry removed");
        if entries.is_empty() && !parent.is_cluster_root() {
            self.kv.delete(&dir_key(&parent))?;
            self.remove_locked(&parent)?;
        } else {
            self.kv.put(dir_key(&parent), encode(&entries)?)?;
        }
        Ok(true)
    }
}

fn check_entry_path(path: &VirtualPath) -> Result<(), MetaError> {
    if path.is_root() || path.is_cluster_root() {
        return Err(MetaError::InvalidArgument(format!(
            "{path} is synthesized from membership and cannot be registered"
        )));
    }
    Ok(())
}
