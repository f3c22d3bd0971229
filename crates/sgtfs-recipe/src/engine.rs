//! Recipe engine: chunk layout generation, staleness checks, and background
//! hashing of pending recipes.
//!
//! A recipe starts life in the pending set (`pending/{path}` in the KV store)
//! with every chunk hash empty. Hashing fills hashes in place; once the last
//! chunk is hashed the recipe moves to the [`RecipeIndex`] and leaves the
//! pending set. Failed attempts back off exponentially and, after
//! `max_hash_attempts`, the recipe is parked as `HashingFailed` until the
//! resource changes or it is reset.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sgtfs_meta::kvstore::{encode, get_typed, KvStore};
use sgtfs_meta::{NamespaceTree, Recipe, RecipeChunk, RecipeIndex, Timestamp, VirtualPath};

use crate::chunk_reader::ChunkReader;
use crate::chunker::{self, HostMap};
use crate::error::RecipeError;
use crate::exports::ExportTable;
use crate::fingerprint::HashAlgorithm;
use crate::source::{ResourceLocator, SourceRegistry};

const PENDING_PREFIX: &str = "pending/";
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

fn pending_key(path: &VirtualPath) -> Vec<u8> {
    format!("{PENDING_PREFIX}{path}").into_bytes()
}

/// Recipe generation and hashing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Fixed chunk size in bytes
    pub chunk_size: u32,
    /// Digest name (`BLAKE3`, `SHA-256`, `SHA-512`)
    pub hash_algorithm: String,
    /// Seconds between background hashing cycles
    pub hash_interval_secs: u64,
    /// Failed attempts before a recipe is parked as `HashingFailed`
    pub max_hash_attempts: u32,
    /// Base retry delay; doubles with every failed attempt
    pub retry_backoff_secs: u64,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            hash_algorithm: HashAlgorithm::Blake3.name().to_string(),
            hash_interval_secs: 30,
            max_hash_attempts: 5,
            retry_backoff_secs: 30,
        }
    }
}

impl RecipeConfig {
    /// Delay before the next attempt after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let base = Duration::from_secs(self.retry_backoff_secs);
        let factor = 1u32.checked_shl(attempts.saturating_sub(1)).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
    }
}

/// Lifecycle state of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipeState {
    /// Every chunk hashed and indexed
    Complete,
    /// Waiting for the hashing worker
    Pending,
    /// Retry budget exhausted
    HashingFailed,
}

/// An incomplete recipe with its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecipe {
    /// Layout, with whatever hashes are done so far
    pub recipe: Recipe,
    /// Failed hashing attempts
    pub attempts: u32,
    /// Earliest time of the next attempt
    pub next_attempt_at: Timestamp,
    /// Terminal failure flag
    pub failed: bool,
    /// Last hashing error, for operators
    pub last_error: Option<String>,
}

impl PendingRecipe {
    fn new(recipe: Recipe) -> Self {
        Self {
            recipe,
            attempts: 0,
            next_attempt_at: Timestamp::default(),
            failed: false,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> RecipeState {
        if self.failed {
            RecipeState::HashingFailed
        } else {
            RecipeState::Pending
        }
    }
}

/// Result of one hashing attempt for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOutcome {
    /// All chunks hashed; the recipe is now indexed
    Completed,
    /// Backoff not elapsed yet
    Deferred,
    /// Attempt failed; retried after backoff
    Failed {
        /// Failures so far
        attempts: u32,
    },
    /// Attempt failed and the retry budget is spent
    Abandoned,
    /// The resource vanished; recipe and namespace entry dropped
    Removed,
    /// Nothing to do (not pending, or parked)
    Skipped,
}

/// Counts from one sweep over the pending set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashCycleReport {
    /// Pending recipes examined
    pub scanned: u64,
    /// Recipes that became complete
    pub completed: u64,
    /// Attempts that failed and will be retried
    pub failed: u64,
    /// Recipes still in backoff
    pub deferred: u64,
    /// Recipes parked as `HashingFailed` this cycle
    pub abandoned: u64,
    /// Recipes dropped because the resource vanished
    pub removed: u64,
}

impl HashCycleReport {
    /// Folds one outcome into the counts.
    pub fn record(&mut self, outcome: &HashOutcome) {
        self.scanned += 1;
        match outcome {
            HashOutcome::Completed => self.completed += 1,
            HashOutcome::Deferred => self.deferred += 1,
            HashOutcome::Failed { .. } => self.failed += 1,
            HashOutcome::Abandoned => self.abandoned += 1,
            HashOutcome::Removed => self.removed += 1,
            HashOutcome::Skipped => {}
        }
    }
}

/// Builds recipes for exported resources and drives them to completion.
pub struct RecipeEngine {
    kv: Arc<dyn KvStore>,
    index: Arc<RecipeIndex>,
    namespace: Arc<NamespaceTree>,
    exports: ExportTable,
    sources: SourceRegistry,
    config: RecipeConfig,
    algorithm: HashAlgorithm,
    hosts: RwLock<HostMap>,
    write_lock: Mutex<()>,
}

impl RecipeEngine {
    /// Creates the engine. Fails with `UnsupportedAlgorithm` for an unknown
    /// digest name and `InvalidArgument` for a zero chunk size.
    pub fn new(
        kv: Arc<dyn KvStore>,
        index: Arc<RecipeIndex>,
        namespace: Arc<NamespaceTree>,
        exports: ExportTable,
        sources: SourceRegistry,
        config: RecipeConfig,
    ) -> Result<Self, RecipeError> {
        let algorithm: HashAlgorithm = config.hash_algorithm.parse()?;
        if config.chunk_size == 0 {
            return Err(RecipeError::InvalidArgument("chunk_size must be > 0".into()));
        }
        Ok(Self {
            kv,
            index,
            namespace,
            exports,
            sources,
            config,
            algorithm,
            hosts: RwLock::new(HostMap::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Active digest.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Engine settings.
    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    /// Export table of the local cluster.
    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// Source backends.
    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Replaces the host → node map used for owner hints.
    pub fn set_host_map(&self, hosts: HostMap) {
        *self.hosts.write() = hosts;
    }

    /// Chunk layout of a resource at the configured chunk size.
    pub fn chunk(&self, resource: &ResourceLocator) -> Result<Vec<RecipeChunk>, RecipeError> {
        self.chunk_with_size(resource, self.config.chunk_size)
    }

    /// Chunk layout of a resource at an explicit chunk size.
    pub fn chunk_with_size(
        &self,
        resource: &ResourceLocator,
        chunk_size: u32,
    ) -> Result<Vec<RecipeChunk>, RecipeError> {
        let backend = self.sources.backend(resource)?;
        let hosts = self.hosts.read().clone();
        chunker::chunk(backend.as_ref(), resource, chunk_size, &hosts)
    }

    /// Hashes one chunk with the configured digest.
    pub fn hash(
        &self,
        resource: &ResourceLocator,
        chunk: &RecipeChunk,
    ) -> Result<RecipeChunk, RecipeError> {
        let backend = self.sources.backend(resource)?;
        chunker::hash(backend.as_ref(), resource, chunk, self.algorithm)
    }

    /// Opens a bounded reader over one chunk of a local file.
    pub fn open_chunk(
        &self,
        path: &VirtualPath,
        chunk: &RecipeChunk,
    ) -> Result<ChunkReader, RecipeError> {
        let resource = self.exports.resolve(path)?;
        let backend = self.sources.backend(&resource)?;
        let length = u64::from(chunk.length);
        let stream = backend.open_range(&resource, chunk.offset, length)?;
        Ok(ChunkReader::new(stream, length))
    }

    /// Returns the recipe stored for `path` (complete or pending), generating
    /// an incomplete one on first request. Never regenerates an existing one.
    pub fn generate_incomplete(&self, path: &VirtualPath) -> Result<Recipe, RecipeError> {
        let _guard = self.write_lock.lock();
        if let Some(recipe) = self.stored_locked(path)? {
            return Ok(recipe);
        }
        self.generate_locked(path)
    }

    /// Recipe for `path`, regenerated if the resource changed since it was
    /// built. A vanished resource drops the recipe and its namespace entry
    /// and fails with `NotFound`.
    pub fn recipe(&self, path: &VirtualPath) -> Result<Recipe, RecipeError> {
        let resource = self.exports.resolve(path)?;
        let backend = self.sources.backend(&resource)?;
        let _guard = self.write_lock.lock();

        let stat = backend
            .size(&resource)
            .and_then(|size| Ok((size, backend.mod_time(&resource)?)));
        let (size, mod_time) = match stat {
            Ok(s) => s,
            Err(e) if e.is_not_found() => {
                self.forget_locked(path)?;
                return Err(RecipeError::NotFound(path.to_string()));
            }
            Err(e) => match self.stored_locked(path)? {
                Some(recipe) => {
                    warn!(path = %path, error = %e, "stat failed, serving stored recipe layout");
                    return Ok(recipe);
                }
                None => return Err(e),
            },
        };

        if let Some(recipe) = self.stored_locked(path)? {
            if recipe.size == size && recipe.mod_time == mod_time {
                return Ok(recipe);
            }
            info!(
                path = %path,
                old_size = recipe.size,
                size,
                "resource changed, regenerating recipe"
            );
            self.remove_locked(path)?;
        }
        self.generate_locked(path)
    }

    /// Registers every file below `path` in the namespace when its resource
    /// is a directory, picking up directories created after the export scan.
    /// Returns the number of files registered, or `None` for a file.
    pub fn discover_directory(&self, path: &VirtualPath) -> Result<Option<u64>, RecipeError> {
        let resource = self.exports.resolve(path)?;
        let backend = self.sources.backend(&resource)?;
        if !backend.is_directory(&resource)? {
            return Ok(None);
        }
        let mut files = 0;
        let mut stack = vec![(path.clone(), resource)];
        while let Some((dir, resource)) = stack.pop() {
            for entry in backend.list(&resource)? {
                let child = dir.join(&entry.name)?;
                let child_resource = resource.join([entry.name.as_str()]);
                if entry.is_dir {
                    stack.push((child, child_resource));
                } else {
                    self.namespace.add_entry(&child)?;
                    files += 1;
                }
            }
        }
        debug!(path = %path, files, "directory discovered");
        Ok(Some(files))
    }

    /// Lifecycle state of the recipe for `path`, if one exists.
    pub fn status(&self, path: &VirtualPath) -> Result<Option<RecipeState>, RecipeError> {
        if self.index.contains(path)? {
            return Ok(Some(RecipeState::Complete));
        }
        Ok(self.pending(path)?.map(|p| p.state()))
    }

    /// Pending entry for `path`.
    pub fn pending(&self, path: &VirtualPath) -> Result<Option<PendingRecipe>, RecipeError> {
        Ok(get_typed(self.kv.as_ref(), &pending_key(path))?)
    }

    /// Paths in the pending set, sorted.
    pub fn pending_paths(&self) -> Result<Vec<VirtualPath>, RecipeError> {
        self.kv
            .keys(PENDING_PREFIX.as_bytes())?
            .into_iter()
            .map(|key| {
                let s = String::from_utf8_lossy(&key[PENDING_PREFIX.len()..]).into_owned();
                Ok(VirtualPath::parse(&s)?)
            })
            .collect()
    }

    /// Drops the recipe for `path`, complete or pending. The namespace entry stays.
    pub fn remove(&self, path: &VirtualPath) -> Result<bool, RecipeError> {
        let _guard = self.write_lock.lock();
        self.remove_locked(path)
    }

    /// Puts a parked (`HashingFailed`) recipe back in the queue with a fresh
    /// retry budget. Returns false if `path` is not pending.
    pub fn reset(&self, path: &VirtualPath) -> Result<bool, RecipeError> {
        let _guard = self.write_lock.lock();
        let Some(mut pending) = self.pending(path)? else {
            return Ok(false);
        };
        pending.attempts = 0;
        pending.failed = false;
        pending.last_error = None;
        pending.next_attempt_at = Timestamp::default();
        self.kv.put(pending_key(path), encode(&pending)?)?;
        Ok(true)
    }

    /// One hashing attempt for `path` using the current time.
    pub fn hash_pending(&self, path: &VirtualPath) -> Result<HashOutcome, RecipeError> {
        self.hash_pending_at(path, Timestamp::now())
    }

    /// One hashing attempt for `path` as of `now`.
    ///
    /// Storage reads run without the engine lock; the result is committed
    /// under the lock only if the pending entry was not replaced meanwhile.
    pub fn hash_pending_at(
        &self,
        path: &VirtualPath,
        now: Timestamp,
    ) -> Result<HashOutcome, RecipeError> {
        let Some(pending) = self.pending(path)? else {
            return Ok(HashOutcome::Skipped);
        };
        if pending.failed {
            return Ok(HashOutcome::Skipped);
        }
        if pending.next_attempt_at > now {
            return Ok(HashOutcome::Deferred);
        }

        let resource = self.exports.resolve(path)?;
        let mut recipe = pending.recipe.clone();
        let mut failure = None;
        for chunk in recipe.chunks.iter_mut().filter(|c| !c.is_hashed()) {
            match self.hash(&resource, chunk) {
                Ok(hashed) => *chunk = hashed,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let _guard = self.write_lock.lock();
        let Some(current) = self.pending(path)? else {
            return Ok(HashOutcome::Skipped);
        };
        if current.recipe.mod_time != pending.recipe.mod_time
            || current.recipe.size != pending.recipe.size
        {
            debug!(path = %path, "pending recipe replaced during hashing");
            return Ok(HashOutcome::Skipped);
        }

        if let Some(err) = failure {
            if err.is_not_found() {
                self.forget_locked(path)?;
                return Ok(HashOutcome::Removed);
            }
            let mut next = PendingRecipe {
                recipe,
                attempts: current.attempts + 1,
                ..current
            };
            next.last_error = Some(err.to_string());
            let outcome = if next.attempts >= self.config.max_hash_attempts {
                next.failed = true;
                warn!(path = %path, attempts = next.attempts, error = %err, "giving up on hashing");
                HashOutcome::Abandoned
            } else {
                next.next_attempt_at = now.plus(self.config.backoff(next.attempts));
                debug!(
                    path = %path,
                    attempts = next.attempts,
                    error = %err,
                    "hashing failed, will retry"
                );
                HashOutcome::Failed {
                    attempts: next.attempts,
                }
            };
            self.kv.put(pending_key(path), encode(&next)?)?;
            return Ok(outcome);
        }

        self.index.put(&recipe)?;
        self.kv.delete(&pending_key(path))?;
        debug!(path = %path, chunks = recipe.chunks.len(), "recipe complete");
        Ok(HashOutcome::Completed)
    }

    /// Sweeps the whole pending set once. `should_stop` is checked between
    /// recipes.
    pub fn run_hash_cycle(&self, should_stop: impl Fn() -> bool) -> HashCycleReport {
        let mut report = HashCycleReport::default();
        let paths = match self.pending_paths() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot list pending recipes");
                return report;
            }
        };
        let now = Timestamp::now();
        for path in paths {
            if should_stop() {
                break;
            }
            match self.hash_pending_at(&path, now) {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!(path = %path, error = %e, "hashing attempt errored");
                    report.record(&HashOutcome::Failed { attempts: 0 });
                }
            }
        }
        report
    }

    fn stored_locked(&self, path: &VirtualPath) -> Result<Option<Recipe>, RecipeError> {
        if let Some(recipe) = self.index.get(path)? {
            return Ok(Some(recipe));
        }
        Ok(self.pending(path)?.map(|p| p.recipe))
    }

    fn generate_locked(&self, path: &VirtualPath) -> Result<Recipe, RecipeError> {
        let resource = self.exports.resolve(path)?;
        let backend = self.sources.backend(&resource)?;
        let size = backend.size(&resource)?;
        let mod_time = backend.mod_time(&resource)?;
        let chunks = self.chunk(&resource)?;
        let recipe = Recipe {
            path: path.clone(),
            hash_algorithm: self.algorithm.name().to_string(),
            chunk_size: self.config.chunk_size,
            size,
            mod_time,
            chunks,
        };
        if recipe.chunks.is_empty() {
            self.index.put(&recipe)?;
        } else {
            self.kv
                .put(pending_key(path), encode(&PendingRecipe::new(recipe.clone()))?)?;
        }
        self.namespace.add_entry(path)?;
        debug!(path = %path, size, chunks = recipe.chunks.len(), "generated recipe");
        Ok(recipe)
    }

    fn remove_locked(&self, path: &VirtualPath) -> Result<bool, RecipeError> {
        let was_complete = self.index.remove(path)?.is_some();
        let was_pending = self.kv.get(&pending_key(path))?.is_some();
        if was_pending {
            self.kv.delete(&pending_key(path))?;
        }
        Ok(was_complete || was_pending)
    }

    fn forget_locked(&self, path: &VirtualPath) -> Result<(), RecipeError> {
        self.remove_locked(path)?;
        self.namespace.remove_entry(path)?;
        info!(path = %path, "resource vanished, dropped recipe");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use sgtfs_meta::MemoryKvStore;

    struct Fixture {
        engine: RecipeEngine,
        source: Arc<MemorySource>,
        index: Arc<RecipeIndex>,
        namespace: Arc<NamespaceTree>,
    }

    fn fixture(config: RecipeConfig) -> Fixture {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let index = Arc::new(RecipeIndex::new(kv.clone()));
        let namespace = Arc::new(NamespaceTree::new(kv.clone()));
        let source = Arc::new(MemorySource::new());
        let mut sources = SourceRegistry::new();
        sources.register("mem", source.clone());
        let mut exports = ExportTable::new("east");
        exports
            .add("data", ResourceLocator::parse("mem:///").unwrap())
            .unwrap();
        let engine = RecipeEngine::new(
            kv,
            index.clone(),
            namespace.clone(),
            exports,
            sources,
            config,
        )
        .unwrap();
        Fixture {
            engine,
            source,
            index,
            namespace,
        }
    }

    fn small() -> RecipeConfig {
        RecipeConfig {
            chunk_size: 1024,
            retry_backoff_secs: 0,
            max_hash_attempts: 3,
            ..RecipeConfig::default()
        }
    }

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn discovers_directories_added_after_scan() {
        let f = fixture(small());
        f.source.put("/new/a.bin", vec![1u8; 10], Timestamp::from_secs(1));
        f.source.put("/new/deep/b.bin", vec![2u8; 10], Timestamp::from_secs(1));

        let discovered = f.engine.discover_directory(&vp("/east/data/new")).unwrap();
        assert_eq!(discovered, Some(2));
        assert!(f.namespace.contains(&vp("/east/data/new/a.bin")).unwrap());
        assert!(f.namespace.is_directory(&vp("/east/data/new/deep")).unwrap());

        let file = vp("/east/data/new/a.bin");
        assert_eq!(f.engine.discover_directory(&file).unwrap(), None);
        assert!(f
            .engine
            .discover_directory(&vp("/east/data/gone"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let result = RecipeEngine::new(
            kv.clone(),
            Arc::new(RecipeIndex::new(kv.clone())),
            Arc::new(NamespaceTree::new(kv)),
            ExportTable::new("east"),
            SourceRegistry::new(),
            RecipeConfig {
                hash_algorithm: "crc32".into(),
                ..RecipeConfig::default()
            },
        );
        assert!(matches!(result, Err(RecipeError::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = RecipeConfig::default();
        assert_eq!(c.backoff(1), Duration::from_secs(30));
        assert_eq!(c.backoff(2), Duration::from_secs(60));
        assert_eq!(c.backoff(4), Duration::from_secs(240));
        assert_eq!(c.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn generate_then_hash_to_completion() {
        let f = fixture(small());
        f.source.put("/a.bin", vec![5u8; 2500], Timestamp::from_secs(1));
        let path = vp("/east/data/a.bin");

        let recipe = f.engine.generate_incomplete(&path).unwrap();
        assert_eq!(recipe.chunks.len(), 3);
        assert!(!recipe.is_complete());
        assert_eq!(f.engine.status(&path).unwrap(), Some(RecipeState::Pending));
        assert!(f.namespace.contains(&path).unwrap());

        let report = f.engine.run_hash_cycle(|| false);
        assert_eq!(report.completed, 1);
        assert_eq!(f.engine.status(&path).unwrap(), Some(RecipeState::Complete));
        assert!(f.engine.pending_paths().unwrap().is_empty());
        assert_eq!(f.index.get(&path).unwrap().unwrap().chunks[2].length, 452);
    }

    #[test]
    fn generate_is_idempotent() {
        let f = fixture(small());
        f.source.put("/a", vec![1u8; 3000], Timestamp::from_secs(1));
        let path = vp("/east/data/a");
        let first = f.engine.generate_incomplete(&path).unwrap();
        let stats = f.source.stat_calls();
        let second = f.engine.generate_incomplete(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(f.source.stat_calls(), stats);
    }

    #[test]
    fn empty_file_is_complete_immediately() {
        let f = fixture(small());
        f.source.put("/empty", Vec::new(), Timestamp::from_secs(1));
        let path = vp("/east/data/empty");
        let recipe = f.engine.generate_incomplete(&path).unwrap();
        assert!(recipe.chunks.is_empty());
        assert_eq!(f.engine.status(&path).unwrap(), Some(RecipeState::Complete));
    }

    #[test]
    fn changed_resource_is_regenerated() {
        let f = fixture(small());
        f.source.put("/a", vec![1u8; 2048], Timestamp::from_secs(1));
        let path = vp("/east/data/a");
        f.engine.generate_incomplete(&path).unwrap();
        f.engine.run_hash_cycle(|| false);

        f.source.put("/a", vec![2u8; 100], Timestamp::from_secs(2));
        let recipe = f.engine.recipe(&path).unwrap();
        assert_eq!(recipe.size, 100);
        assert_eq!(f.engine.status(&path).unwrap(), Some(RecipeState::Pending));
        assert!(!f.index.contains(&path).unwrap());
    }

    #[test]
    fn vanished_resource_is_forgotten() {
        let f = fixture(small());
        f.source.put("/dir/a", vec![1u8; 10], Timestamp::from_secs(1));
        let path = vp("/east/data/dir/a");
        f.engine.generate_incomplete(&path).unwrap();
        f.source.remove("/dir/a");

        assert!(f.engine.recipe(&path).unwrap_err().is_not_found());
        assert_eq!(f.engine.status(&path).unwrap(), None);
        assert!(!f.namespace.contains(&path).unwrap());
        assert!(!f.namespace.contains(&vp("/east/data/dir")).unwrap());
    }

    #[test]
    fn retry_budget_parks_recipe() {
        let f = fixture(small());
        f.source.put("/bad", vec![1u8; 10], Timestamp::from_secs(1));
        f.source.set_failing("/bad", true);
        let path = vp("/east/data/bad");
        f.engine.generate_incomplete(&path).unwrap();

        assert_eq!(f.engine.run_hash_cycle(|| false).failed, 1);
        assert_eq!(f.engine.run_hash_cycle(|| false).failed, 1);
        assert_eq!(f.engine.run_hash_cycle(|| false).abandoned, 1);
        assert_eq!(f.engine.status(&path).unwrap(), Some(RecipeState::HashingFailed));
        let pending = f.engine.pending(&path).unwrap().unwrap();
        assert_eq!(pending.attempts, 3);
        assert!(pending.last_error.is_some());

        let opens = f.source.open_calls();
        assert_eq!(f.engine.run_hash_cycle(|| false).completed, 0);
        assert_eq!(f.source.open_calls(), opens);

        // metadata still answers from the layout
        assert_eq!(f.engine.recipe(&path).unwrap().chunks.len(), 1);

        f.source.set_failing("/bad", false);
        assert!(f.engine.reset(&path).unwrap());
        assert_eq!(f.engine.run_hash_cycle(|| false).completed, 1);
        assert_eq!(f.engine.status(&path).unwrap(), Some(RecipeState::Complete));
    }

    #[test]
    fn failed_attempt_defers_until_backoff() {
        let f = fixture(RecipeConfig {
            retry_backoff_secs: 60,
            ..small()
        });
        f.source.put("/bad", vec![1u8; 10], Timestamp::from_secs(1));
        f.source.set_failing("/bad", true);
        let path = vp("/east/data/bad");
        f.engine.generate_incomplete(&path).unwrap();

        let t0 = Timestamp::from_secs(1_000);
        assert_eq!(
            f.engine.hash_pending_at(&path, t0).unwrap(),
            HashOutcome::Failed { attempts: 1 }
        );
        f.source.set_failing("/bad", false);
        assert_eq!(
            f.engine.hash_pending_at(&path, Timestamp::from_secs(1_030)).unwrap(),
            HashOutcome::Deferred
        );
        assert_eq!(
            f.engine.hash_pending_at(&path, Timestamp::from_secs(1_060)).unwrap(),
            HashOutcome::Completed
        );
    }

    #[test]
    fn cycle_stops_between_recipes() {
        let f = fixture(small());
        for name in ["/a", "/b", "/c"] {
            f.source.put(name, vec![1u8; 10], Timestamp::from_secs(1));
            f.engine
                .generate_incomplete(&vp(&format!("/east/data{name}")))
                .unwrap();
        }
        let calls = std::cell::Cell::new(0);
        let report = f.engine.run_hash_cycle(|| {
            calls.set(calls.get() + 1);
            calls.get() > 1
        });
        assert_eq!(report.completed, 1);
        assert_eq!(f.engine.pending_paths().unwrap().len(), 2);
    }

    #[test]
    fn outside_exports_is_not_found() {
        let f = fixture(small());
        assert!(f
            .engine
            .generate_incomplete(&vp("/east/other/x"))
            .unwrap_err()
            .is_not_found());
        assert!(f
            .engine
            .generate_incomplete(&vp("/east/data/missing"))
            .unwrap_err()
            .is_not_found());
    }
}
