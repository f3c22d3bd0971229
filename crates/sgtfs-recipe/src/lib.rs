#![warn(missing_docs)]

//! sgtfs recipe subsystem: fixed-size chunking, streaming content hashing, source backends
//!
//! A recipe describes one exported file as an ordered list of fixed-size
//! chunks. Layouts are produced on first request; hashes are filled in by the
//! background [`HashWorker`], after which the recipe is indexed for dedup.

pub mod background;
pub mod chunk_reader;
pub mod chunker;
pub mod engine;
pub mod error;
pub mod exports;
pub mod fingerprint;
pub mod source;

pub use background::{HashWorker, HashWorkerHandle, HashWorkerStats};
pub use chunk_reader::ChunkReader;
pub use chunker::HostMap;
pub use engine::{
    HashCycleReport, HashOutcome, PendingRecipe, RecipeConfig, RecipeEngine, RecipeState,
};
pub use error::RecipeError;
pub use exports::{ExportConfig, ExportTable};
pub use fingerprint::{HashAlgorithm, StreamHasher};
pub use source::{
    ChunkSource, LocalFsSource, MemorySource, ResourceLocator, SourceEntry, SourceRegistry,
};
