//! Error type of the volume layer and its mapping to wire errors.

use sgtfs_meta::MetaError;
use sgtfs_recipe::RecipeError;
use sgtfs_transport::{TransportError, WireError, WireErrorKind};
use thiserror::Error;

/// Errors surfaced by [`crate::VolumeRouter`] operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// Malformed path or request
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Nothing at the path, or no path for the hash
    #[error("not found: {0}")]
    NotFound(String),

    /// Local storage read failed
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// No node of the remote cluster answered
    #[error("cluster {0} unreachable")]
    ClusterUnreachable(String),

    /// The contacted remote node failed the call
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Misconfigured digest
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl VolumeError {
    /// Structured error body for remote callers.
    pub fn to_wire(&self) -> WireError {
        let kind = match self {
            VolumeError::NotFound(_) => WireErrorKind::NotFound,
            VolumeError::InvalidArgument(_) => WireErrorKind::InvalidArgument,
            _ => WireErrorKind::Internal,
        };
        WireError::new(kind, self.to_string())
    }

    /// True for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VolumeError::NotFound(_))
    }
}

impl From<MetaError> for VolumeError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::InvalidArgument(m) => VolumeError::InvalidArgument(m),
            MetaError::NotFound(m) => VolumeError::NotFound(m),
            other => VolumeError::Internal(other.to_string()),
        }
    }
}

impl From<RecipeError> for VolumeError {
    fn from(e: RecipeError) -> Self {
        match e {
            RecipeError::NotFound(m) => VolumeError::NotFound(m),
            RecipeError::InvalidArgument(m) => VolumeError::InvalidArgument(m),
            RecipeError::UnsupportedAlgorithm(m) => VolumeError::UnsupportedAlgorithm(m),
            other @ RecipeError::ResourceUnavailable { .. } => {
                VolumeError::ResourceUnavailable(other.to_string())
            }
            other @ RecipeError::UnknownScheme(_) => VolumeError::Internal(other.to_string()),
            RecipeError::Meta(m) => m.into(),
        }
    }
}

impl From<TransportError> for VolumeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ClusterUnreachable(c) => VolumeError::ClusterUnreachable(c),
            TransportError::Remote(w) => match w.kind {
                WireErrorKind::NotFound => VolumeError::NotFound(w.message),
                WireErrorKind::InvalidArgument => VolumeError::InvalidArgument(w.message),
                WireErrorKind::Internal => VolumeError::RemoteUnavailable(w.message),
            },
            TransportError::Meta(m) => m.into(),
            other => VolumeError::RemoteUnavailable(other.to_string()),
        }
    }
}

/// Result alias for volume operations.
pub type Result<T> = std::result::Result<T, VolumeError>;
