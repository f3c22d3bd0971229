//! Key-value store seam for the durable maps.
//!
//! Every manager (recipe index, namespace tree, membership) persists through
//! [`KvStore`]. Production deployments back it with a replicated store shared
//! by all nodes of a cluster; tests and single-node runs use [`MemoryKvStore`].
//! Read-after-write ordering across nodes is whatever the backing store
//! guarantees.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::MetaError;

/// Key type for the KV store.
pub type Key = Vec<u8>;
/// Value type for the KV store.
pub type Value = Vec<u8>;
/// A key-value pair.
pub type KvPair = (Key, Value);

/// Key-value store trait for metadata persistence.
pub trait KvStore: Send + Sync {
    /// Get a value by key. Returns None if the key doesn't exist.
    fn get(&self, key: &[u8]) -> Result<Option<Value>, MetaError>;

    /// Put a key-value pair. Overwrites any existing value.
    fn put(&self, key: Key, value: Value) -> Result<(), MetaError>;

    /// Delete a key. Returns Ok(()) even if the key didn't exist.
    fn delete(&self, key: &[u8]) -> Result<(), MetaError>;

    /// Scan all keys with the given prefix, returning (key, value) pairs in sorted order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, MetaError>;

    /// Atomically write a batch of operations (puts and deletes).
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), MetaError>;

    /// Keys under `prefix`, sorted.
    fn keys(&self, prefix: &[u8]) -> Result<Vec<Key>, MetaError> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }
}

/// A single operation in a write batch.
#[derive(Debug)]
pub enum BatchOp {
    /// Put a key-value pair.
    Put {
        /// The key to insert or update.
        key: Key,
        /// The value to store.
        value: Value,
    },
    /// Delete a key.
    Delete {
        /// The key to delete.
        key: Key,
    },
}

/// Encodes a value for storage.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, MetaError> {
    bincode::serialize(value).map_err(|e| MetaError::Serialization(e.to_string()))
}

/// Decodes a stored value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MetaError> {
    bincode::deserialize(bytes).map_err(|e| MetaError::Serialization(e.to_string()))
}

/// Reads and decodes one key.
pub fn get_typed<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &[u8],
) -> Result<Option<T>, MetaError> {
    kv.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

/// In-memory KV store backed by a BTreeMap.
///
/// Does not persist data across restarts.
#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<Key, Value>>,
}

impl MemoryKvStore {
    /// Creates a new empty in-memory KV store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Value>, MetaError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: Key, value: Value) -> Result<(), MetaError> {
        self.data.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), MetaError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, MetaError> {
        let data = self.data.read();
        Ok(data
            .range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), MetaError> {
        let mut data = self.data.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryKvStore::new();
        store.put(b"recipe/a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(store.get(b"recipe/a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"recipe/b").unwrap(), None);
        store.delete(b"recipe/a").unwrap();
        assert_eq!(store.get(b"recipe/a").unwrap(), None);
        store.delete(b"recipe/a").unwrap();
    }

    #[test]
    fn test_scan_prefix_is_bounded() {
        let store = MemoryKvStore::new();
        store.put(b"dir/a".to_vec(), b"1".to_vec()).unwrap();
        store.put(b"dir/b".to_vec(), b"2".to_vec()).unwrap();
        store.put(b"dirx".to_vec(), b"3".to_vec()).unwrap();
        store.put(b"hash/x".to_vec(), b"4".to_vec()).unwrap();

        let result = store.scan_prefix(b"dir/").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].0, b"dir/a");
        assert_eq!(result[1].0, b"dir/b");
        assert_eq!(store.keys(b"hash/").unwrap(), vec![b"hash/x".to_vec()]);
    }

    #[test]
    fn test_write_batch() {
        let store = MemoryKvStore::new();
        store.put(b"existing".to_vec(), b"old".to_vec()).unwrap();

        store
            .write_batch(vec![
                BatchOp::Put {
                    key: b"new1".to_vec(),
                    value: b"v1".to_vec(),
                },
                BatchOp::Delete {
                    key: b"existing".to_vec(),
                },
            ])
            .unwrap();

        assert_eq!(store.get(b"new1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.get(b"existing").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_typed_roundtrip() {
        let store = MemoryKvStore::new();
        let value: Vec<String> = vec!["a".into(), "b".into()];
        store.put(b"k".to_vec(), encode(&value).unwrap()).unwrap();
        let back: Option<Vec<String>> = get_typed(&store, b"k").unwrap();
        assert_eq!(back, Some(value));
        let missing: Option<Vec<String>> = get_typed(&store, b"nope").unwrap();
        assert!(missing.is_none());
    }
}
