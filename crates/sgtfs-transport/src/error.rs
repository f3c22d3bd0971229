//! Transport errors.

use sgtfs_meta::MetaError;
use thiserror::Error;

use crate::wire::{WireError, WireErrorKind};

/// Errors raised while talking to remote clusters.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP/HTTP connection could not be established or broke mid-call.
    #[error("connection to {addr} failed: {reason}")]
    Connection {
        /// Endpoint address
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// The node did not answer within the deadline.
    #[error("call to {addr} timed out after {timeout_ms}ms")]
    Timeout {
        /// Endpoint address
        addr: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// The node answered with a well-formed error.
    #[error("remote error: {0}")]
    Remote(WireError),

    /// No node of the cluster answered a liveness probe.
    #[error("cluster {0} unreachable")]
    ClusterUnreachable(String),

    /// The chosen node failed the call after a successful probe.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Response body could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Membership lookup failed.
    #[error(transparent)]
    Meta(#[from] MetaError),
}

impl TransportError {
    /// Connection-level failures; only these mark a node unreachable.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Connection { .. } | TransportError::Timeout { .. }
        )
    }

    /// Well-formed `NotFound` from the remote, or an unknown cluster locally.
    pub fn is_not_found(&self) -> bool {
        match self {
            TransportError::Remote(w) => w.kind == WireErrorKind::NotFound,
            TransportError::Meta(MetaError::NotFound(_)) => true,
            _ => false,
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
