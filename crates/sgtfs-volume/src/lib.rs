#![warn(missing_docs)]

//! sgtfs volume subsystem: federated volume router, export scanner, cluster and recipe sync, HTTP server
//!
//! A [`VolumeNode`] wires the metadata managers, the recipe engine and the
//! transport router behind one [`VolumeRouter`], which answers every
//! namespace, recipe and chunk request locally or by delegating to a node of
//! the owning remote cluster.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod node;
pub mod router;
pub mod scanner;
pub mod server;
pub mod sync;

pub use cache::RemoteRecipeCache;
pub use config::{NodeConfig, RemoteClusterConfig, SyncConfig, VolumeConfig};
pub use error::{Result, VolumeError};
pub use node::{RunningNode, VolumeNode};
pub use router::{PathKind, VolumeRouter};
pub use scanner::{scan_exports, ScanReport};
pub use server::VolumeService;
pub use sync::{spawn_periodic, ClusterSync, RecipeSync, SyncReport, SyncTask};
