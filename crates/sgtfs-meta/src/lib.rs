#![warn(missing_docs)]

//! sgtfs metadata subsystem: virtual paths, recipe/hash index, federated namespace tree, cluster membership
//!
//! All durable state goes through one [`KvStore`] with four independent
//! collections: `recipe/`, `hash/`, `dir/` and `cluster/`. Each manager
//! serializes its own mutations; managers never share a lock.

pub mod kvstore;
pub mod membership;
pub mod namespace;
pub mod path;
pub mod recipe_index;
pub mod types;

pub use kvstore::{BatchOp, KvStore, MemoryKvStore};
pub use membership::{ClusterMembership, MembershipConfig};
pub use namespace::NamespaceTree;
pub use path::{VirtualPath, SCHEME};
pub use recipe_index::RecipeIndex;
pub use types::{
    ClusterInfo, ClusterNode, DataObjectMetadata, Directory, MetaError, Node, NodeStatus, Recipe,
    RecipeChunk, Timestamp, ANY_OWNER, DIRECTORY_PSEUDO_SIZE,
};
