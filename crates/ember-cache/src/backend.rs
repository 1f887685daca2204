//! The cache backend contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::CacheError;
use crate::fingerprint::{Fingerprint, HashAlgorithm};

/// Namespaces the engine uses on every backend.
pub mod namespace {
  /// Computed node values.
  pub const OBJECTS: &str = "objects";
  /// Node fingerprints recorded after processing.
  pub const KERNELS: &str = "kernels";
  /// Per-node metadata records.
  pub const META: &str = "meta";
}

/// Key-value storage contract the engine requires.
///
/// Implementations must tolerate concurrent readers; the scheduler
/// guarantees that two nodes never write the same key concurrently
/// (each node owns its own id).
pub trait CacheBackend: Send + Sync {
  /// Read the bytes stored under a key, if any.
  fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

  /// Store bytes under a key, overwriting any previous value.
  fn put(&self, ns: &str, key: &str, bytes: &[u8]) -> Result<(), CacheError>;

  /// Whether a key exists in a namespace.
  fn exists(&self, ns: &str, key: &str) -> Result<bool, CacheError>;

  /// Remove a key. Removing a missing key is not an error.
  fn delete(&self, ns: &str, key: &str) -> Result<(), CacheError>;

  /// List all keys in a namespace.
  fn list(&self, ns: &str) -> Result<Vec<String>, CacheError>;

  /// Fingerprint of the bytes stored under a key, if any.
  fn hash(
    &self,
    ns: &str,
    key: &str,
    algo: HashAlgorithm,
  ) -> Result<Option<Fingerprint>, CacheError> {
    Ok(self.get(ns, key)?.map(|bytes| algo.hash(&bytes)))
  }
}

/// In-memory backend. The default for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
  namespaces: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheBackend for MemoryCache {
  fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
    Ok(namespaces.get(ns).and_then(|m| m.get(key)).cloned())
  }

  fn put(&self, ns: &str, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
    let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
    namespaces
      .entry(ns.to_string())
      .or_default()
      .insert(key.to_string(), bytes.to_vec());
    Ok(())
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, CacheError> {
    let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
    Ok(namespaces.get(ns).is_some_and(|m| m.contains_key(key)))
  }

  fn delete(&self, ns: &str, key: &str) -> Result<(), CacheError> {
    let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
    if let Some(m) = namespaces.get_mut(ns) {
      m.remove(key);
    }
    Ok(())
  }

  fn list(&self, ns: &str) -> Result<Vec<String>, CacheError> {
    let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
    Ok(
      namespaces
        .get(ns)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn put_get_exists_delete_roundtrip() {
    let cache = MemoryCache::new();
    assert!(cache.get("objects", "a").unwrap().is_none());
    cache.put("objects", "a", b"1").unwrap();
    assert!(cache.exists("objects", "a").unwrap());
    assert_eq!(cache.get("objects", "a").unwrap().unwrap(), b"1");
    cache.delete("objects", "a").unwrap();
    assert!(!cache.exists("objects", "a").unwrap());
    // Deleting again is fine.
    cache.delete("objects", "a").unwrap();
  }

  #[test]
  fn namespaces_are_disjoint() {
    let cache = MemoryCache::new();
    cache.put("objects", "a", b"1").unwrap();
    assert!(!cache.exists("kernels", "a").unwrap());
    assert_eq!(cache.list("objects").unwrap(), vec!["a".to_string()]);
    assert!(cache.list("kernels").unwrap().is_empty());
  }

  #[test]
  fn hash_reflects_stored_bytes() {
    let cache = MemoryCache::new();
    cache.put("objects", "a", b"payload").unwrap();
    let stored = cache.hash("objects", "a", HashAlgorithm::Xxh3).unwrap();
    assert_eq!(stored, Some(HashAlgorithm::Xxh3.hash(b"payload")));
    assert!(cache.hash("objects", "b", HashAlgorithm::Xxh3).unwrap().is_none());
  }
}
