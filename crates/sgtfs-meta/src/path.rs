//! Cluster-qualified virtual paths.
//!
//! A [`VirtualPath`] names an object in the federated namespace. It renders as
//! `sgt://<cluster><path>`; the federation root is `sgt:///` and a cluster-root
//! is `sgt://<cluster>/`. Paths are normalized on construction: no empty
//! segments, no trailing slash except for `/`, no `.` segments, and `..` is
//! rejected outright.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::MetaError;

/// URI scheme of every virtual path.
pub const SCHEME: &str = "sgt";

const SCHEME_PREFIX: &str = "sgt://";

/// A normalized (cluster, path) pair in the federated namespace.
///
/// Equality and ordering compare the cluster first, then the path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath {
    cluster: String,
    path: String,
}

impl VirtualPath {
    /// The federation root `sgt:///`.
    pub fn root() -> Self {
        Self {
            cluster: String::new(),
            path: "/".to_string(),
        }
    }

    /// The root directory of one cluster.
    pub fn cluster_root(cluster: &str) -> Result<Self, MetaError> {
        Self::new(cluster, "/")
    }

    /// Builds a path inside `cluster`. An empty cluster is only valid for `/`.
    pub fn new(cluster: &str, path: &str) -> Result<Self, MetaError> {
        validate_cluster_name(cluster)?;
        let path = normalize(path)?;
        if cluster.is_empty() && path != "/" {
            return Err(MetaError::InvalidArgument(format!(
                "path {path} has no cluster"
            )));
        }
        Ok(Self {
            cluster: cluster.to_string(),
            path,
        })
    }

    /// Parses either the URI form (`sgt://cluster/a/b`) or the federated
    /// absolute form (`/cluster/a/b`, where the first segment is the cluster).
    pub fn parse(s: &str) -> Result<Self, MetaError> {
        if let Some(rest) = s.strip_prefix(SCHEME_PREFIX) {
            let (cluster, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, "/"),
            };
            return Self::new(cluster, path);
        }
        if s.contains("://") {
            return Err(MetaError::InvalidArgument(format!(
                "unsupported scheme in {s}"
            )));
        }
        if !s.starts_with('/') {
            return Err(MetaError::InvalidArgument(format!(
                "path {s} is not absolute"
            )));
        }
        let trimmed = s.trim_start_matches('/');
        let (cluster, path) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
            None => (trimmed, "/"),
        };
        Self::new(cluster, path)
    }

    /// Cluster (URI authority). Empty for the federation root.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Slash-separated path inside the cluster.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True for `sgt:///`.
    pub fn is_root(&self) -> bool {
        self.cluster.is_empty()
    }

    /// True for `sgt://<cluster>/`.
    pub fn is_cluster_root(&self) -> bool {
        !self.cluster.is_empty() && self.path == "/"
    }

    /// Last path segment. The cluster-root is named after its cluster and
    /// the federation root has an empty name.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return "";
        }
        if self.is_cluster_root() {
            return &self.cluster;
        }
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// Parent path, obtained by truncating to the last `/`. `None` for the root.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        if self.is_cluster_root() {
            return Some(Self::root());
        }
        let idx = self.path.rfind('/').unwrap_or(0);
        let parent = if idx == 0 { "/" } else { &self.path[..idx] };
        Some(Self {
            cluster: self.cluster.clone(),
            path: parent.to_string(),
        })
    }

    /// Appends one child segment.
    pub fn join(&self, name: &str) -> Result<VirtualPath, MetaError> {
        if name.is_empty() || name.contains('/') {
            return Err(MetaError::InvalidArgument(format!(
                "invalid entry name {name:?}"
            )));
        }
        if self.is_root() {
            return Self::cluster_root(name);
        }
        let joined = if self.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.path)
        };
        Self::new(&self.cluster, &joined)
    }

    /// Path segments below the cluster-root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// True if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &VirtualPath) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        if self.cluster != ancestor.cluster || self.path == ancestor.path {
            return false;
        }
        ancestor.path == "/"
            || (self.path.starts_with(&ancestor.path)
                && self.path.as_bytes().get(ancestor.path.len()) == Some(&b'/'))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME_PREFIX}{}{}", self.cluster, self.path)
    }
}

impl std::str::FromStr for VirtualPath {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = MetaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VirtualPath> for String {
    fn from(path: VirtualPath) -> Self {
        path.to_string()
    }
}

fn validate_cluster_name(cluster: &str) -> Result<(), MetaError> {
    if cluster
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(MetaError::InvalidArgument(format!(
            "invalid cluster name {cluster:?}"
        )));
    }
    Ok(())
}

fn normalize(path: &str) -> Result<String, MetaError> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(MetaError::InvalidArgument(format!(
                    "path {path} escapes its cluster"
                )))
            }
            s if s.chars().any(char::is_control) => {
                return Err(MetaError::InvalidArgument(format!(
                    "path {path:?} contains control characters"
                )))
            }
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}
