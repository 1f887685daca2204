//! Persisted per-node metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{CacheBackend, namespace};
use crate::error::CacheError;
use crate::store::FingerprintPair;

/// Timing of the most recent processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
  pub started_at: DateTime<Utc>,
  pub elapsed_ms: u64,
  /// How many attempts the envelope used, including the final one.
  pub attempts: u32,
}

/// The last-recorded observation for a node.
///
/// `fingerprint`, `dependency_fingerprint`, `file_fingerprint`, and
/// `command` reflect the last *successful* processing and survive failed
/// attempts untouched. `timings`, `error`, `warnings`, and `messages`
/// reflect the most recent *attempted* processing. `missing` is recomputed
/// every run and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
  pub fingerprint: Option<FingerprintPair>,
  pub dependency_fingerprint: Option<FingerprintPair>,
  pub file_fingerprint: Option<FingerprintPair>,
  pub command: Option<String>,
  pub timings: Option<Timings>,
  pub error: Option<String>,
  #[serde(default)]
  pub warnings: Vec<String>,
  #[serde(default)]
  pub messages: Vec<String>,
  /// Whether the node was absent from the cache before this run.
  #[serde(skip)]
  pub missing: bool,
}

impl Metadata {
  /// Load a node's metadata from the backend.
  ///
  /// Fail-safe: a corrupt record is treated as absent, which makes the
  /// node stale under the `missing` component rather than failing the run.
  pub fn load(backend: &dyn CacheBackend, node_id: &str) -> Result<Option<Self>, CacheError> {
    match backend.get(namespace::META, node_id)? {
      Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
      None => Ok(None),
    }
  }

  /// Persist this record, overwriting any previous one.
  pub fn store(&self, backend: &dyn CacheBackend, node_id: &str) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(self).map_err(|e| CacheError::Serialization {
      context: format!("metadata for '{node_id}'"),
      source: e,
    })?;
    backend.put(namespace::META, node_id, &bytes)
  }

  /// Overwrite the success fields after a successful processing.
  pub fn record_success(
    &mut self,
    fingerprint: FingerprintPair,
    dependency_fingerprint: FingerprintPair,
    file_fingerprint: Option<FingerprintPair>,
    command: Option<String>,
  ) {
    self.fingerprint = Some(fingerprint);
    self.dependency_fingerprint = Some(dependency_fingerprint);
    self.file_fingerprint = file_fingerprint;
    self.command = command;
    self.error = None;
  }
}
