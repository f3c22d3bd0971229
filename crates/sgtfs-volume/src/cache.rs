//! Cache of recipes pulled from remote clusters.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use sgtfs_meta::{Recipe, VirtualPath};

#[derive(Debug, Clone)]
struct CachedRecipe {
    recipe: Recipe,
    fetched_at: Instant,
}

/// Remote recipes keyed by path, served while younger than the TTL.
#[derive(Debug)]
pub struct RemoteRecipeCache {
    entries: DashMap<VirtualPath, CachedRecipe>,
    ttl: Duration,
}

impl RemoteRecipeCache {
    /// Empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Stores a complete remote recipe. Incomplete ones are ignored.
    pub fn insert(&self, recipe: Recipe) {
        if !recipe.is_complete() {
            return;
        }
        self.entries.insert(
            recipe.path.clone(),
            CachedRecipe {
                recipe,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Cached recipe for `path` if still fresh.
    pub fn get(&self, path: &VirtualPath) -> Option<Recipe> {
        let entry = self.entries.get(path)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            Some(entry.recipe.clone())
        } else {
            None
        }
    }

    /// Drops the entry for `path`.
    pub fn invalidate(&self, path: &VirtualPath) {
        self.entries.remove(path);
    }

    /// Clusters whose fresh cached recipes contain a chunk with `hash_hex`.
    pub fn clusters_with_hash(&self, hash_hex: &str) -> BTreeSet<String> {
        let Ok(hash) = hex::decode(hash_hex) else {
            return BTreeSet::new();
        };
        self.entries
            .iter()
            .filter(|e| e.fetched_at.elapsed() <= self.ttl)
            .filter(|e| e.recipe.find_chunk(&hash).is_some())
            .map(|e| e.key().cluster().to_string())
            .collect()
    }

    /// Removes expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.fetched_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    /// Number of cached recipes, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
