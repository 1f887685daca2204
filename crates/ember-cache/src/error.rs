//! Error types for cache and fingerprint operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while hashing content or talking to a backend.
///
/// `Io` and `Serialization` are node-level failures: they fail the build of
/// the node whose content could not be read or encoded. `Backend` means the
/// cache itself is unavailable or corrupt and aborts the run.
#[derive(Debug, Error)]
pub enum CacheError {
  /// A file could not be read or written.
  #[error("I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A value could not be serialized or deserialized.
  #[error("serialization failed for {context}: {source}")]
  Serialization {
    context: String,
    #[source]
    source: serde_json::Error,
  },

  /// The cache backend is unavailable or corrupt.
  #[error("cache backend error: {0}")]
  Backend(String),
}
