//! Error types for the sgtfs-recipe subsystem

use sgtfs_meta::MetaError;

/// All errors that can occur while building or hashing recipes
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    /// The configured digest name is not known
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Reading the underlying resource failed; the recipe stays incomplete
    #[error("resource unavailable: {resource}: {reason}")]
    ResourceUnavailable {
        /// Locator of the resource
        resource: String,
        /// What went wrong
        reason: String,
    },
    /// No export or resource exists at the path
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed locator, path, or chunk request
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No backend is registered for the locator's scheme
    #[error("no source backend for scheme {0:?}")]
    UnknownScheme(String),
    /// Metadata store failure
    #[error(transparent)]
    Meta(#[from] MetaError),
}

impl RecipeError {
    pub(crate) fn unavailable(resource: impl ToString, reason: impl ToString) -> Self {
        Self::ResourceUnavailable {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for a missing export, resource, or stored item.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RecipeError::NotFound(_) | RecipeError::Meta(MetaError::NotFound(_))
        )
    }
}
