//! Source storage backends.
//!
//! A backend reads raw bytes of exported resources. Backends are selected by
//! the scheme of a [`ResourceLocator`] through a [`SourceRegistry`]; `file`
//! (local filesystem) and `mem` (in-memory) ship with the crate.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sgtfs_meta::{Timestamp, ANY_OWNER};

use crate::error::RecipeError;

/// `scheme://path` address of a raw resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceLocator {
    scheme: String,
    path: String,
}

impl ResourceLocator {
    /// Builds a locator; `path` must be absolute.
    pub fn new(scheme: &str, path: &str) -> Result<Self, RecipeError> {
        let valid_scheme = |c: char| c.is_ascii_alphanumeric() || c == '+' || c == '-';
        if scheme.is_empty() || !scheme.chars().all(valid_scheme) {
            return Err(RecipeError::InvalidArgument(format!("invalid scheme {scheme:?}")));
        }
        if !path.starts_with('/') {
            return Err(RecipeError::InvalidArgument(format!(
                "resource path {path:?} is not absolute"
            )));
        }
        let trimmed = if path.len() > 1 { path.trim_end_matches('/') } else { path };
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            path: if trimmed.is_empty() { "/".into() } else { trimmed.into() },
        })
    }

    /// Parses `scheme://path`.
    pub fn parse(s: &str) -> Result<Self, RecipeError> {
        let (scheme, path) = s
            .split_once("://")
            .ok_or_else(|| RecipeError::InvalidArgument(format!("locator {s:?} has no scheme")))?;
        Self::new(scheme, path)
    }

    /// Backend scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Path understood by the backend.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends relative segments.
    pub fn join<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut path = self.path.clone();
        for seg in segments {
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(seg);
        }
        Self {
            scheme: self.scheme.clone(),
            path,
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}

/// One child of a directory resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceEntry {
    /// Child name.
    pub name: String,
    /// Whether the child is itself a directory.
    pub is_dir: bool,
}

/// Raw byte access to exported resources.
pub trait ChunkSource: Send + Sync {
    /// Size of the resource in bytes.
    fn size(&self, resource: &ResourceLocator) -> Result<u64, RecipeError>;

    /// Last modification time of the resource.
    fn mod_time(&self, resource: &ResourceLocator) -> Result<Timestamp, RecipeError>;

    /// Reader positioned at `offset`. The reader may run past
    /// `offset + length`; callers bound it with a [`crate::ChunkReader`].
    fn open_range(
        &self,
        resource: &ResourceLocator,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn Read + Send>, RecipeError>;

    /// Host names holding the bytes of a range. Best effort: `"*"` means
    /// any node.
    fn block_owners(
        &self,
        _resource: &ResourceLocator,
        _offset: u64,
        _length: u64,
    ) -> Result<Vec<String>, RecipeError> {
        Ok(vec![ANY_OWNER.to_string()])
    }

    /// Children of a directory resource.
    fn list(&self, resource: &ResourceLocator) -> Result<Vec<SourceEntry>, RecipeError>;

    /// True if `resource` is a directory. A missing resource is `NotFound`.
    fn is_directory(&self, resource: &ResourceLocator) -> Result<bool, RecipeError>;
}

/// Backends keyed by locator scheme.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    backends: HashMap<String, Arc<dyn ChunkSource>>,
}

impl SourceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the local filesystem backend under `file`.
    pub fn with_local_fs() -> Self {
        let mut registry = Self::new();
        registry.register("file", Arc::new(LocalFsSource::new()));
        registry
    }

    /// Registers (or replaces) the backend for `scheme`.
    pub fn register(&mut self, scheme: &str, backend: Arc<dyn ChunkSource>) {
        self.backends.insert(scheme.to_ascii_lowercase(), backend);
    }

    /// Backend serving `resource`.
    pub fn backend(&self, resource: &ResourceLocator) -> Result<Arc<dyn ChunkSource>, RecipeError> {
        self.backends
            .get(resource.scheme())
            .cloned()
            .ok_or_else(|| RecipeError::UnknownScheme(resource.scheme().to_string()))
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut s: Vec<String> = self.backends.keys().cloned().collect();
        s.sort();
        s
    }
}

fn map_io(resource: &ResourceLocator, e: io::Error) -> RecipeError {
    if e.kind() == io::ErrorKind::NotFound {
        RecipeError::NotFound(resource.to_string())
    } else {
        RecipeError::unavailable(resource, e)
    }
}

/// Local filesystem backend. Blocks are always local, so owner hints stay `"*"`.
#[derive(Debug, Default)]
pub struct LocalFsSource;

impl LocalFsSource {
    /// Creates the backend.
    pub fn new() -> Self {
        Self
    }

    fn metadata(&self, resource: &ResourceLocator) -> Result<std::fs::Metadata, RecipeError> {
        std::fs::metadata(PathBuf::from(resource.path())).map_err(|e| map_io(resource, e))
    }
}

impl ChunkSource for LocalFsSource {
    fn size(&self, resource: &ResourceLocator) -> Result<u64, RecipeError> {
        let meta = self.metadata(resource)?;
        if meta.is_dir() {
            return Err(RecipeError::InvalidArgument(format!("{resource} is a directory")));
        }
        Ok(meta.len())
    }

    fn mod_time(&self, resource: &ResourceLocator) -> Result<Timestamp, RecipeError> {
        let modified = self
            .metadata(resource)?
            .modified()
            .map_err(|e| map_io(resource, e))?;
        Ok(Timestamp::from_system_time(modified))
    }

    fn open_range(
        &self,
        resource: &ResourceLocator,
        offset: u64,
        _length: u64,
    ) -> Result<Box<dyn Read + Send>, RecipeError> {
        let mut file = File::open(resource.path()).map_err(|e| map_io(resource, e))?;
        file.seek(SeekFrom::Start(offset)).map_err(|e| map_io(resource, e))?;
        Ok(Box::new(file))
    }

    fn list(&self, resource: &ResourceLocator) -> Result<Vec<SourceEntry>, RecipeError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(resource.path()).map_err(|e| map_io(resource, e))? {
            let entry = entry.map_err(|e| map_io(resource, e))?;
            let file_type = entry.file_type().map_err(|e| map_io(resource, e))?;
            if !(file_type.is_dir() || file_type.is_file()) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            out.push(SourceEntry {
                name,
                is_dir: file_type.is_dir(),
            });
        }
        out.sort();
        Ok(out)
    }

    fn is_directory(&self, resource: &ResourceLocator) -> Result<bool, RecipeError> {
        Ok(self.metadata(resource)?.is_dir())
    }
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    mod_time: Timestamp,
    owners: Vec<String>,
}

/// In-memory backend for tests and demos.
///
/// Supports failure injection per resource and counts how often resources
/// were stat'ed and opened.
#[derive(Debug, Default)]
pub struct MemorySource {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    failing: RwLock<BTreeSet<String>>,
    stats: AtomicU64,
    opens: AtomicU64,
}

impl MemorySource {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) a resource at absolute `path`.
    pub fn put(&self, path: &str, data: impl Into<Bytes>, mod_time: Timestamp) {
        self.objects.write().insert(
            path.to_string(),
            MemoryObject {
                data: data.into(),
                mod_time,
                owners: vec![ANY_OWNER.to_string()],
            },
        );
    }

    /// Deletes a resource.
    pub fn remove(&self, path: &str) -> bool {
        self.objects.write().remove(path).is_some()
    }

    /// Sets the block owner hosts reported for every range of `path`.
    pub fn set_owners(&self, path: &str, owners: Vec<String>) {
        if let Some(obj) = self.objects.write().get_mut(path) {
            obj.owners = owners;
        }
    }

    /// Makes reads of `path` fail until cleared.
    pub fn set_failing(&self, path: &str, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(path.to_string());
        } else {
            set.remove(path);
        }
    }

    /// Number of `size`/`mod_time` calls served.
    pub fn stat_calls(&self) -> u64 {
        self.stats.load(Ordering::Relaxed)
    }

    /// Number of `open_range` calls served.
    pub fn open_calls(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    fn object(&self, resource: &ResourceLocator) -> Result<MemoryObject, RecipeError> {
        self.objects
            .read()
            .get(resource.path())
            .cloned()
            .ok_or_else(|| RecipeError::NotFound(resource.to_string()))
    }
}

impl ChunkSource for MemorySource {
    fn size(&self, resource: &ResourceLocator) -> Result<u64, RecipeError> {
        self.stats.fetch_add(1, Ordering::Relaxed);
        Ok(self.object(resource)?.data.len() as u64)
    }

    fn mod_time(&self, resource: &ResourceLocator) -> Result<Timestamp, RecipeError> {
        self.stats.fetch_add(1, Ordering::Relaxed);
        Ok(self.object(resource)?.mod_time)
    }

    fn open_range(
        &self,
        resource: &ResourceLocator,
        offset: u64,
        _length: u64,
    ) -> Result<Box<dyn Read + Send>, RecipeError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        if self.failing.read().contains(resource.path()) {
            return Err(RecipeError::unavailable(resource, "injected read failure"));
        }
        let obj = self.object(resource)?;
        let start = (offset as usize).min(obj.data.len());
        Ok(Box::new(Cursor::new(obj.data.slice(start..))))
    }

    fn block_owners(
        &self,
        resource: &ResourceLocator,
        _offset: u64,
        _length: u64,
    ) -> Result<Vec<String>, RecipeError> {
        Ok(self.object(resource)?.owners)
    }

    fn list(&self, resource: &ResourceLocator) -> Result<Vec<SourceEntry>, RecipeError> {
        let prefix = if resource.path() == "/" {
            "/".to_string()
        } else {
            format!("{}/", resource.path())
        };
        let objects = self.objects.read();
        let mut entries = BTreeSet::new();
        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => entries.insert(SourceEntry {
                    name: dir.to_string(),
                    is_dir: true,
                }),
                None => entries.insert(SourceEntry {
                    name: rest.to_string(),
                    is_dir: false,
                }),
            };
        }
        if entries.is_empty() && !objects.contains_key(resource.path()) && resource.path() != "/" {
            return Err(RecipeError::NotFound(resource.to_string()));
        }
        Ok(entries.into_iter().collect())
    }

    fn is_directory(&self, resource: &ResourceLocator) -> Result<bool, RecipeError> {
        let objects = self.objects.read();
        if objects.contains_key(resource.path()) {
            return Ok(false);
        }
        if resource.path() == "/" {
            return Ok(true);
        }
        let prefix = format!("{}/", resource.path());
        if objects.keys().any(|key| key.starts_with(&prefix)) {
            Ok(true)
        } else {
            Err(RecipeError::NotFound(resource.to_string()))
        }
    }
}
