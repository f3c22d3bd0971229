//! Fixed-size chunking and per-chunk hashing against a source backend.

use std::collections::{BTreeSet, HashMap};

use sgtfs_meta::{RecipeChunk, ANY_OWNER};
use tracing::{debug, trace};

use crate::chunk_reader::ChunkReader;
use crate::error::RecipeError;
use crate::fingerprint::HashAlgorithm;
use crate::source::{ChunkSource, ResourceLocator};

/// Host name → local node name, used to turn block owner hosts into node hints.
pub type HostMap = HashMap<String, String>;

/// Splits `[0, size)` into `chunk_size` pieces; the last one holds the rest.
pub fn chunk_bounds(size: u64, chunk_size: u32) -> Result<Vec<(u64, u32)>, RecipeError> {
    if chunk_size == 0 {
        return Err(RecipeError::InvalidArgument("chunk size must be > 0".into()));
    }
    let step = u64::from(chunk_size);
    let mut out = Vec::with_capacity(size.div_ceil(step) as usize);
    let mut offset = 0u64;
    while offset < size {
        let len = step.min(size - offset);
        out.push((offset, len as u32));
        offset += len;
    }
    Ok(out)
}

/// Owner hints for one byte range: node names where known, `"*"` otherwise.
pub fn owner_hints(
    source: &dyn ChunkSource,
    resource: &ResourceLocator,
    offset: u64,
    length: u64,
    hosts: &HostMap,
) -> Vec<String> {
    let owners = match source.block_owners(resource, offset, length) {
        Ok(owners) => owners,
        Err(e) => {
            trace!(resource = %resource, offset, error = %e, "block owners unavailable");
            return vec![ANY_OWNER.to_string()];
        }
    };
    let nodes: BTreeSet<String> = owners
        .iter()
        .filter(|h| h.as_str() != ANY_OWNER)
        .filter_map(|h| hosts.get(h).cloned())
        .collect();
    if nodes.is_empty() {
        vec![ANY_OWNER.to_string()]
    } else {
        nodes.into_iter().collect()
    }
}

/// Chunk layout of a resource; all hashes are left empty.
pub fn chunk(
    source: &dyn ChunkSource,
    resource: &ResourceLocator,
    chunk_size: u32,
    hosts: &HostMap,
) -> Result<Vec<RecipeChunk>, RecipeError> {
    if chunk_size == 0 {
        return Err(RecipeError::InvalidArgument("chunk size must be > 0".into()));
    }
    let size = source.size(resource)?;
    let chunks: Vec<RecipeChunk> = chunk_bounds(size, chunk_size)?
        .into_iter()
        .map(|(offset, len)| {
            let hints = owner_hints(source, resource, offset, u64::from(len), hosts);
            RecipeChunk::new(offset, len, hints)
        })
        .collect();
    debug!(resource = %resource, size, chunks = chunks.len(), "chunked resource");
    Ok(chunks)
}

/// Returns `chunk` with its hash populated from the bytes in the source.
pub fn hash(
    source: &dyn ChunkSource,
    resource: &ResourceLocator,
    chunk: &RecipeChunk,
    algorithm: HashAlgorithm,
) -> Result<RecipeChunk, RecipeError> {
    if chunk.length == 0 {
        return Err(RecipeError::InvalidArgument(format!(
            "zero-length chunk at offset {} of {resource}",
            chunk.offset
        )));
    }
    let length = u64::from(chunk.length);
    let stream = source.open_range(resource, chunk.offset, length)?;
    let mut reader = ChunkReader::new(stream, length);
    let digest = algorithm
        .digest_reader(&mut reader, length)
        .map_err(|e| RecipeError::unavailable(resource, format!("offset {}: {e}", chunk.offset)))?;
    let mut hashed = chunk.clone();
    hashed.hash = Some(digest);
    Ok(hashed)
}
