//! Durable recipe store and content-hash dedup index.
//!
//! Two collections live in the KV store:
//! - `recipe/{path}` → complete [`Recipe`]
//! - `hash/{hex}` → set of paths whose recipe has a chunk with that hash
//!
//! Only complete recipes are indexed, so a hash entry always refers to a
//! stored complete recipe. Each `put`/`remove` is written as one batch.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::kvstore::{decode, encode, get_typed, BatchOp, KvStore};
use crate::path::VirtualPath;
use crate::types::{MetaError, Recipe, RecipeChunk};

const RECIPE_PREFIX: &str = "recipe/";
const HASH_PREFIX: &str = "hash/";

fn recipe_key(path: &VirtualPath) -> Vec<u8> {
    format!("{RECIPE_PREFIX}{path}").into_bytes()
}

fn hash_key(hex: &str) -> Vec<u8> {
    format!("{HASH_PREFIX}{hex}").into_bytes()
}

/// Stores complete recipes and the hash → paths dedup index.
pub struct RecipeIndex {
    kv: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
}

impl RecipeIndex {
    /// Creates an index on top of `kv`.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    /// Stores a complete recipe and indexes all of its chunk hashes.
    ///
    /// A recipe already stored for the same path is replaced and its hash
    /// entries are dropped in the same batch.
    pub fn put(&self, recipe: &Recipe) -> Result<(), MetaError> {
        if !recipe.is_complete() {
            return Err(MetaError::InvalidArgument(format!(
                "recipe for {} has {} unhashed chunks",
                recipe.path,
                recipe.pending_chunks()
            )));
        }
        let _guard = self.write_lock.lock();

        let previous: Option<Recipe> = get_typed(self.kv.as_ref(), &recipe_key(&recipe.path))?;
        let old_hashes = previous.as_ref().map(Recipe::hash_set).unwrap_or_default();
        let new_hashes = recipe.hash_set();

        let mut touched: BTreeMap<String, BTreeSet<VirtualPath>> = BTreeMap::new();
        for hex in old_hashes.difference(&new_hashes) {
            let mut paths = self.load_hash_set(hex)?;
            paths.remove(&recipe.path);
            touched.insert(hex.clone(), paths);
        }
        for hex in new_hashes.difference(&old_hashes) {
            let mut paths = self.load_hash_set(hex)?;
            paths.insert(recipe.path.clone());
            touched.insert(hex.clone(), paths);
        }

        let mut ops = hash_set_ops(touched)?;
        ops.push(BatchOp::Put {
            key: recipe_key(&recipe.path),
            value: encode(recipe)?,
        });
        self.kv.write_batch(ops)?;
        debug!(path = %recipe.path, chunks = recipe.chunks.len(), "recipe indexed");
        Ok(())
    }

    /// Complete recipe stored for `path`.
    pub fn get(&self, path: &VirtualPath) -> Result<Option<Recipe>, MetaError> {
        get_typed(self.kv.as_ref(), &recipe_key(path))
    }

    /// True if a complete recipe is stored for `path`.
    pub fn contains(&self, path: &VirtualPath) -> Result<bool, MetaError> {
        Ok(self.kv.get(&recipe_key(path))?.is_some())
    }

    /// Paths whose recipe contains a chunk with hash `hex`.
    pub fn paths_for_hash(&self, hex: &str) -> Result<BTreeSet<VirtualPath>, MetaError> {
        self.load_hash_set(&hex.to_ascii_lowercase())
    }

    /// First live (path, chunk) for a content hash, searched in path order.
    ///
    /// Paths whose recipe has vanished or no longer carries the hash are
    /// skipped.
    pub fn get_by_hash(&self, hex: &str) -> Result<Option<(VirtualPath, RecipeChunk)>, MetaError> {
        let hex = hex.to_ascii_lowercase();
        let raw = hex::decode(&hex)
            .map_err(|e| MetaError::InvalidArgument(format!("hash {hex}: {e}")))?;
        for path in self.load_hash_set(&hex)? {
            match self.get(&path)? {
                Some(recipe) => {
                    if let Some(chunk) = recipe.find_chunk(&raw) {
                        return Ok(Some((path, chunk.clone())));
                    }
                    warn!(%path, hash = %hex, "hash entry points at recipe without that chunk");
                }
                None => warn!(%path, hash = %hex, "hash entry points at missing recipe"),
            }
        }
        Ok(None)
    }

    /// Removes the recipe for `path` and drops `path` from every hash entry.
    /// Hash entries left empty are deleted.
    pub fn remove(&self, path: &VirtualPath) -> Result<Option<Recipe>, MetaError> {
        let _guard = self.write_lock.lock();
        self.remove_locked(path)
    }

    /// Removes every stored recipe and hash entry. Returns the number of recipes removed.
    pub fn remove_all(&self) -> Result<usize, MetaError> {
        let _guard = self.write_lock.lock();
        let recipes = self.kv.keys(RECIPE_PREFIX.as_bytes())?;
        let hashes = self.kv.keys(HASH_PREFIX.as_bytes())?;
        let count = recipes.len();
        let ops = recipes
            .into_iter()
            .chain(hashes)
            .map(|key| BatchOp::Delete { key })
            .collect();
        self.kv.write_batch(ops)?;
        Ok(count)
    }

    /// Paths of all stored recipes, sorted.
    pub fn list(&self) -> Result<Vec<VirtualPath>, MetaError> {
        self.kv
            .keys(RECIPE_PREFIX.as_bytes())?
            .into_iter()
            .map(|key| {
                let s = String::from_utf8_lossy(&key[RECIPE_PREFIX.len()..]).into_owned();
                VirtualPath::parse(&s)
            })
            .collect()
    }

    /// Number of stored recipes.
    pub fn len(&self) -> Result<usize, MetaError> {
        Ok(self.kv.keys(RECIPE_PREFIX.as_bytes())?.len())
    }

    /// Number of distinct hashes in the dedup index.
    pub fn hash_count(&self) -> Result<usize, MetaError> {
        Ok(self.kv.keys(HASH_PREFIX.as_bytes())?.len())
    }

    fn remove_locked(&self, path: &VirtualPath) -> Result<Option<Recipe>, MetaError> {
        let Some(recipe) = get_typed::<Recipe>(self.kv.as_ref(), &recipe_key(path))? else {
            return Ok(None);
        };
        let mut touched = BTreeMap::new();
        for hex in recipe.hash_set() {
            let mut paths = self.load_hash_set(&hex)?;
            paths.remove(path);
            touched.insert(hex, paths);
        }
        let mut ops = hash_set_ops(touched)?;
        ops.push(BatchOp::Delete {
            key: recipe_key(path),
        });
        self.kv.write_batch(ops)?;
        debug!(%path, "recipe removed from index");
        Ok(Some(recipe))
    }

    fn load_hash_set(&self, hex: &str) -> Result<BTreeSet<VirtualPath>, MetaError> {
        match self.kv.get(&hash_key(hex))? {
            Some(bytes) => decode(&bytes),
            None => Ok(BTreeSet::new()),
        }
    }
}

fn hash_set_ops(
    touched: BTreeMap<String, BTreeSet<VirtualPath>>,
) -> Result<Vec<BatchOp>, MetaError> {
    touched
        .into_iter()
        .map(|(hex, paths)| {
            let key = hash_key(&hex);
            if paths.is_empty() {
                Ok(BatchOp::Delete { key })
            } else {
                Ok(BatchOp::Put {
                    key,
                    value: encode(&paths)?,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryKvStore;
    use crate::types::{Timestamp, ANY_OWNER};

    fn recipe(path: &str, hashes: &[&[u8]]) -> Recipe {
        let chunks = hashes
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let mut c = RecipeChunk::new(i as u64 * 4, 4, vec![ANY_OWNER.into()]);
                c.hash = Some(h.to_vec());
                c
            })
            .collect();
        Recipe {
            path: VirtualPath::parse(path).unwrap(),
            hash_algorithm: "BLAKE3".into(),
            chunk_size: 4,
            size: hashes.len() as u64 * 4,
            mod_time: Timestamp::from_secs(1),
            chunks,
        }
    }

    fn index() -> RecipeIndex {
        RecipeIndex::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn test_put_get() {
        let idx = index();
        let r = recipe("/east/a", &[&[1], &[2]]);
        idx.put(&r).unwrap();
        assert_eq!(idx.get(&r.path).unwrap(), Some(r.clone()));
        assert_eq!(idx.len().unwrap(), 1);
        assert_eq!(idx.hash_count().unwrap(), 2);
    }

    #[test]
    fn test_put_rejects_incomplete() {
        let idx = index();
        let mut r = recipe("/east/a", &[&[1]]);
        r.chunks[0].hash = None;
        assert!(matches!(idx.put(&r), Err(MetaError::InvalidArgument(_))));
        assert_eq!(idx.hash_count().unwrap(), 0);
    }

    #[test]
    fn test_get_by_hash_shared_between_files() {
        let idx = index();
        let a = recipe("/east/a", &[&[0xaa], &[0x01]]);
        let b = recipe("/east/b", &[&[0x02], &[0xaa]]);
        idx.put(&a).unwrap();
        idx.put(&b).unwrap();

        let (path, chunk) = idx.get_by_hash("aa").unwrap().unwrap();
        assert_eq!(path, a.path);
        assert_eq!(chunk.offset, 0);
        assert_eq!(idx.paths_for_hash("AA").unwrap().len(), 2);

        idx.remove(&a.path).unwrap();
        let (path, chunk) = idx.get_by_hash("aa").unwrap().unwrap();
        assert_eq!(path, b.path);
        assert_eq!(chunk.offset, 4);
        assert!(idx.get_by_hash("01").unwrap().is_none());
        assert_eq!(idx.hash_count().unwrap(), 2);
    }

    #[test]
    fn test_replace_drops_stale_hashes() {
        let idx = index();
        idx.put(&recipe("/east/a", &[&[1], &[2]])).unwrap();
        idx.put(&recipe("/east/a", &[&[2], &[3]])).unwrap();
        assert!(idx.get_by_hash("01").unwrap().is_none());
        assert!(idx.get_by_hash("02").unwrap().is_some());
        assert!(idx.get_by_hash("03").unwrap().is_some());
        assert_eq!(idx.hash_count().unwrap(), 2);
    }

    #[test]
    fn test_remove_garbage_collects_hash_entries() {
        let idx = index();
        let a = recipe("/east/a", &[&[1], &[1], &[2]]);
        idx.put(&a).unwrap();
        let removed = idx.remove(&a.path).unwrap();
        assert_eq!(removed, Some(a.clone()));
        assert_eq!(idx.hash_count().unwrap(), 0);
        assert!(idx.remove(&a.path).unwrap().is_none());
    }

    #[test]
    fn test_remove_all_and_list() {
        let idx = index();
        idx.put(&recipe("/west/z", &[&[9]])).unwrap();
        idx.put(&recipe("/east/a", &[&[8]])).unwrap();
        let listed: Vec<String> = idx.list().unwrap().iter().map(|p| p.to_string()).collect();
        assert_eq!(listed, vec!["sgt://east/a", "sgt://west/z"]);
        assert_eq!(idx.remove_all().unwrap(), 2);
        assert!(idx.list().unwrap().is_empty());
        assert_eq!(idx.hash_count().unwrap(), 0);
    }

    #[test]
    fn test_get_by_hash_rejects_bad_hex() {
        assert!(matches!(
            index().get_by_hash("zz"),
            Err(MetaError::InvalidArgument(_))
        ));
    }
}
