//! Per-run cache of namespace listings.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// A best-effort cache of backend listings, rebuilt at the start of each
/// run and updated as nodes are processed.
///
/// Purely an optimization: a miss falls through to the backend, so a stale
/// listing can only cost an extra query, never change a staleness decision.
#[derive(Debug, Default)]
pub struct Inventory {
  listings: RwLock<HashMap<String, HashSet<String>>>,
}

impl Inventory {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load a namespace listing from the backend.
  pub fn refresh(&self, backend: &dyn CacheBackend, ns: &str) -> Result<(), CacheError> {
    let keys: HashSet<String> = backend.list(ns)?.into_iter().collect();
    let mut listings = self.listings.write().unwrap_or_else(|e| e.into_inner());
    listings.insert(ns.to_string(), keys);
    Ok(())
  }

  /// Whether a key exists, answering from the listing when possible.
  pub fn contains(
    &self,
    backend: &dyn CacheBackend,
    ns: &str,
    key: &str,
  ) -> Result<bool, CacheError> {
    {
      let listings = self.listings.read().unwrap_or_else(|e| e.into_inner());
      if let Some(keys) = listings.get(ns) {
        if keys.contains(key) {
          return Ok(true);
        }
      }
    }
    // Not in the listing: confirm against the backend and remember a hit.
    let exists = backend.exists(ns, key)?;
    if exists {
      self.record(ns, key);
    }
    Ok(exists)
  }

  /// Note that a key was written this run.
  pub fn record(&self, ns: &str, key: &str) {
    let mut listings = self.listings.write().unwrap_or_else(|e| e.into_inner());
    listings
      .entry(ns.to_string())
      .or_default()
      .insert(key.to_string());
  }

  /// Note that a key was removed this run.
  pub fn evict(&self, ns: &str, key: &str) {
    let mut listings = self.listings.write().unwrap_or_else(|e| e.into_inner());
    if let Some(keys) = listings.get_mut(ns) {
      keys.remove(key);
    }
  }
}
