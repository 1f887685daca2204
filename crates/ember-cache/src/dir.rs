//! Directory-backed cache, one file per key.
//!
//! Reads are fail-safe: an unreadable or missing entry is a miss. Only an
//! unusable root directory is a backend error, which aborts the run.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// Flat-file implementation of [`CacheBackend`].
///
/// Layout: `<root>/<namespace>/<key>`. Path separators and the escape
/// character in keys are hex-escaped, so distinct keys always map to
/// distinct file names and `list` recovers them exactly.
#[derive(Debug)]
pub struct DirCache {
  root: PathBuf,
}

impl DirCache {
  /// Open a cache rooted at the given directory, creating it if needed.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    fs::create_dir_all(&root)
      .map_err(|e| CacheError::Backend(format!("cannot create cache root {}: {e}", root.display())))?;
    Ok(Self { root })
  }

  fn entry_path(&self, ns: &str, key: &str) -> PathBuf {
    self.root.join(ns).join(escape_key(key))
  }
}

fn escape_key(key: &str) -> String {
  let mut name = String::with_capacity(key.len());
  for c in key.chars() {
    match c {
      '%' | '/' | '\\' => {
        name.push('%');
        name.push_str(&format!("{:02x}", c as u32));
      }
      _ => name.push(c),
    }
  }
  name
}

fn unescape_key(name: &str) -> String {
  let mut key = String::with_capacity(name.len());
  let mut rest = name;
  while let Some(pos) = rest.find('%') {
    key.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];
    match after
      .get(..2)
      .and_then(|hex| u32::from_str_radix(hex, 16).ok())
      .and_then(char::from_u32)
    {
      Some(decoded) => {
        key.push(decoded);
        rest = &after[2..];
      }
      // Not a name we wrote; keep the literal percent.
      None => {
        key.push('%');
        rest = after;
      }
    }
  }
  key.push_str(rest);
  key
}

impl CacheBackend for DirCache {
  fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    match fs::read(self.entry_path(ns, key)) {
      Ok(bytes) => Ok(Some(bytes)),
      // Fail-safe: anything unreadable is a miss.
      Err(_) => Ok(None),
    }
  }

  fn put(&self, ns: &str, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
    let path = self.entry_path(ns, key);
    let dir = path.parent().expect("entry path has a namespace parent");
    fs::create_dir_all(dir)
      .map_err(|e| CacheError::Backend(format!("cannot create namespace {}: {e}", dir.display())))?;
    fs::write(&path, bytes).map_err(|e| CacheError::Io {
      path: path.clone(),
      source: e,
    })
  }

  fn exists(&self, ns: &str, key: &str) -> Result<bool, CacheError> {
    Ok(self.entry_path(ns, key).is_file())
  }

  fn delete(&self, ns: &str, key: &str) -> Result<(), CacheError> {
    let path = self.entry_path(ns, key);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(CacheError::Io { path, source: e }),
    }
  }

  fn list(&self, ns: &str) -> Result<Vec<String>, CacheError> {
    let dir = self.root.join(ns);
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(CacheError::Io { path: dir, source: e }),
    };

    let mut keys = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|e| CacheError::Io {
        path: dir.clone(),
        source: e,
      })?;
      if let Some(name) = entry.file_name().to_str() {
        keys.push(unescape_key(name));
      }
    }
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip_through_files() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = DirCache::open(tmp.path().join("cache")).unwrap();
    cache.put("objects", "a", b"42").unwrap();
    assert_eq!(cache.get("objects", "a").unwrap().unwrap(), b"42");
    assert!(cache.exists("objects", "a").unwrap());
    assert_eq!(cache.list("objects").unwrap(), vec!["a".to_string()]);
    cache.delete("objects", "a").unwrap();
    assert!(!cache.exists("objects", "a").unwrap());
  }

  #[test]
  fn keys_with_separators_map_to_single_files() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = DirCache::open(tmp.path()).unwrap();
    cache.put("objects", "dir/file", b"x").unwrap();
    assert_eq!(cache.list("objects").unwrap(), vec!["dir/file".to_string()]);
    assert_eq!(cache.get("objects", "dir/file").unwrap().unwrap(), b"x");
  }

  #[test]
  fn similar_keys_never_share_a_file() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = DirCache::open(tmp.path()).unwrap();
    cache.put("objects", "a/b", b"slash").unwrap();
    cache.put("objects", "a--b", b"dashes").unwrap();
    cache.put("objects", "a%2fb", b"percent").unwrap();

    assert_eq!(cache.get("objects", "a/b").unwrap().unwrap(), b"slash");
    assert_eq!(cache.get("objects", "a--b").unwrap().unwrap(), b"dashes");
    assert_eq!(cache.get("objects", "a%2fb").unwrap().unwrap(), b"percent");

    let mut keys = cache.list("objects").unwrap();
    keys.sort();
    assert_eq!(
      keys,
      vec!["a%2fb".to_string(), "a--b".to_string(), "a/b".to_string()]
    );

    cache.delete("objects", "a/b").unwrap();
    assert!(!cache.exists("objects", "a/b").unwrap());
    assert!(cache.exists("objects", "a--b").unwrap());
  }

  #[test]
  fn missing_namespace_lists_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = DirCache::open(tmp.path()).unwrap();
    assert!(cache.list("kernels").unwrap().is_empty());
  }
}
