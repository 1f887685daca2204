//! Content fingerprints and the hash algorithms behind them.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Sentinel fingerprint for content that does not exist (e.g. a missing
/// file). Distinct from every real digest, which is always hex.
const ABSENT: &str = "absent";

/// A content-derived identifier for a node's current state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn absent() -> Self {
    Fingerprint(ABSENT.to_string())
  }

  pub fn is_absent(&self) -> bool {
    self.0 == ABSENT
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Hash algorithm behind one fingerprint class.
///
/// The short class defaults to XXH3-128 (fast, stable, short enough to
/// double as a storage key); the long class defaults to SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
  Xxh3,
  Sha256,
}

impl HashAlgorithm {
  /// Hash raw bytes into a hex fingerprint.
  pub fn hash(&self, bytes: &[u8]) -> Fingerprint {
    match self {
      HashAlgorithm::Xxh3 => {
        let digest = xxhash_rust::xxh3::xxh3_128(bytes);
        Fingerprint(format!("{digest:032x}"))
      }
      HashAlgorithm::Sha256 => Fingerprint(hex::encode(Sha256::digest(bytes))),
    }
  }

  /// Hash a file's bytes. A missing file yields the absent sentinel; any
  /// other read failure is an I/O error.
  pub fn hash_file(&self, path: &Path) -> Result<Fingerprint, CacheError> {
    match std::fs::read(path) {
      Ok(bytes) => Ok(self.hash(&bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Fingerprint::absent()),
      Err(e) => Err(CacheError::Io {
        path: path.to_path_buf(),
        source: e,
      }),
    }
  }
}

/// Canonicalize source text before hashing.
///
/// Whitespace runs collapse to a single space so that re-formatting without
/// semantic change produces the same fingerprint.
pub fn normalize_source(source: &str) -> String {
  source.split_whitespace().collect::<Vec<_>>().join(" ")
}
