//! HTTP+JSON binding shared by the client and the volume server: route paths,
//! query shapes, and the structured error body.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness probe.
pub const ROUTE_LIVE: &str = "/v1/live";
/// Local cluster roster.
pub const ROUTE_CLUSTER: &str = "/v1/cluster";
/// Directory listing, `?path=`.
pub const ROUTE_DIRECTORY: &str = "/v1/directory";
/// Object metadata, `?path=`.
pub const ROUTE_METADATA: &str = "/v1/metadata";
/// Metadata of every child, `?path=`.
pub const ROUTE_METADATA_LIST: &str = "/v1/metadata/list";
/// Recipe, `?path=`.
pub const ROUTE_RECIPE: &str = "/v1/recipe";
/// Raw chunk bytes, `?cluster=&hash=`.
pub const ROUTE_CHUNK: &str = "/v1/chunk";

/// Query for path-keyed routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathQuery {
    /// Virtual path, `sgt://cluster/path`
    pub path: String,
}

/// Query for the chunk route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkQuery {
    /// Cluster owning the recipe that holds the hash
    pub cluster: String,
    /// Lowercase hex content hash
    pub hash: String,
}

/// Liveness answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveResponse {
    /// Always true when the node answers
    pub live: bool,
}

/// Error classes a remote caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireErrorKind {
    /// Nothing at the path/hash
    NotFound,
    /// Malformed request
    InvalidArgument,
    /// Anything else
    Internal,
}

/// Error body returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Class
    pub kind: WireErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl WireError {
    /// New error body.
    pub fn new(kind: WireErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind {
            WireErrorKind::NotFound => 404,
            WireErrorKind::InvalidArgument => 400,
            WireErrorKind::Internal => 500,
        }
    }

    /// Reconstructs an error from a non-2xx status when the body is unusable.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => WireErrorKind::NotFound,
            400 => WireErrorKind::InvalidArgument,
            _ => WireErrorKind::Internal,
        };
        Self::new(kind, message)
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
