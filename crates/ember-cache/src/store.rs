//! Fingerprint computation for nodes and their dependency closures.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use ember_plan::{Node, NodeKind, Plan};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::{Fingerprint, HashAlgorithm, normalize_source};

/// Both fingerprint classes for one piece of content.
///
/// The short class is stable and short enough to double as a storage key
/// for file-like artifacts; the long class is collision-resistant and used
/// for bookkeeping only. The classes use independently configured
/// algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintPair {
  pub short: Fingerprint,
  pub long: Fingerprint,
}

impl FingerprintPair {
  pub fn absent() -> Self {
    Self {
      short: Fingerprint::absent(),
      long: Fingerprint::absent(),
    }
  }

  pub fn is_absent(&self) -> bool {
    self.long.is_absent()
  }
}

/// Computes content fingerprints for nodes.
///
/// Computation is a pure function of the node's current content and never
/// mutates cache state; a per-run memo only avoids rehashing a node twice.
/// Callers must hand over a validated plan — function-import recursion
/// relies on the graph being acyclic.
pub struct FingerprintStore {
  short_algo: HashAlgorithm,
  long_algo: HashAlgorithm,
  memo: RwLock<HashMap<String, FingerprintPair>>,
}

impl FingerprintStore {
  pub fn new(short_algo: HashAlgorithm, long_algo: HashAlgorithm) -> Self {
    Self {
      short_algo,
      long_algo,
      memo: RwLock::new(HashMap::new()),
    }
  }

  pub fn short_algo(&self) -> HashAlgorithm {
    self.short_algo
  }

  fn pair(&self, bytes: &[u8]) -> FingerprintPair {
    FingerprintPair {
      short: self.short_algo.hash(bytes),
      long: self.long_algo.hash(bytes),
    }
  }

  /// The node's own fingerprint.
  ///
  /// - Value import: hash of the canonical JSON encoding.
  /// - File import: hash of the file bytes; absent file yields the sentinel.
  /// - Function import and target command: hash of the normalized source
  ///   text combined with the fingerprints of every function import it
  ///   depends on, transitively, so a command's identity changes when
  ///   anything it calls changes.
  pub fn fingerprint_of(&self, node: &Node, plan: &Plan) -> Result<FingerprintPair, CacheError> {
    {
      let memo = self.memo.read().unwrap_or_else(|e| e.into_inner());
      if let Some(pair) = memo.get(&node.id) {
        return Ok(pair.clone());
      }
    }

    let pair = match &node.kind {
      NodeKind::ImportValue(value) => {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
          context: format!("value of '{}'", node.id),
          source: e,
        })?;
        self.pair(&bytes)
      }
      NodeKind::ImportFile(path) => self.file_fingerprint_of(path)?,
      NodeKind::ImportFunction { source } => self.source_fingerprint(source, node, plan)?,
      NodeKind::Target => {
        let source = node.command.as_ref().map(|c| c.source()).unwrap_or_default();
        self.source_fingerprint(source, node, plan)?
      }
    };

    let mut memo = self.memo.write().unwrap_or_else(|e| e.into_inner());
    memo.insert(node.id.clone(), pair.clone());
    Ok(pair)
  }

  /// Hash a file's current bytes into both classes with a single read.
  pub fn file_fingerprint_of(&self, path: &Path) -> Result<FingerprintPair, CacheError> {
    match std::fs::read(path) {
      Ok(bytes) => Ok(self.pair(&bytes)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FingerprintPair::absent()),
      Err(e) => Err(CacheError::Io {
        path: path.to_path_buf(),
        source: e,
      }),
    }
  }

  /// Combined fingerprint of a node's predecessors, in sorted id order,
  /// taken from the run's current fingerprint map. Pure: predecessors not
  /// yet resolved contribute the absent sentinel.
  pub fn dependency_fingerprint_of(
    &self,
    node: &Node,
    current: &HashMap<String, FingerprintPair>,
  ) -> FingerprintPair {
    let mut short_buf = Vec::new();
    let mut long_buf = Vec::new();
    for dep in &node.deps {
      if dep == &node.id {
        continue;
      }
      let pair = current.get(dep).cloned().unwrap_or_else(FingerprintPair::absent);
      short_buf.extend_from_slice(format!("{dep}={}\n", pair.short).as_bytes());
      long_buf.extend_from_slice(format!("{dep}={}\n", pair.long).as_bytes());
    }
    FingerprintPair {
      short: self.short_algo.hash(&short_buf),
      long: self.long_algo.hash(&long_buf),
    }
  }

  /// Combine a node's own fingerprint with its dependency fingerprint.
  ///
  /// The result is what the node contributes to its descendants' `depends`
  /// checks, so an upstream change propagates through every intermediate
  /// node even when that node's own content is unchanged.
  pub fn combine(&self, own: &FingerprintPair, deps: &FingerprintPair) -> FingerprintPair {
    FingerprintPair {
      short: self
        .short_algo
        .hash(format!("{}+{}", own.short, deps.short).as_bytes()),
      long: self
        .long_algo
        .hash(format!("{}+{}", own.long, deps.long).as_bytes()),
    }
  }

  fn source_fingerprint(
    &self,
    source: &str,
    node: &Node,
    plan: &Plan,
  ) -> Result<FingerprintPair, CacheError> {
    let normalized = normalize_source(source);
    let mut short_buf = normalized.clone().into_bytes();
    let mut long_buf = normalized.into_bytes();

    // Function imports feed the source fingerprint; plain value and file
    // imports are covered by the depends component instead.
    for dep in &node.deps {
      if dep == &node.id {
        continue;
      }
      let Some(dep_node) = plan.get(dep) else {
        continue;
      };
      if matches!(dep_node.kind, NodeKind::ImportFunction { .. }) {
        let dep_pair = self.fingerprint_of(dep_node, plan)?;
        short_buf.extend_from_slice(format!("\0{dep}={}", dep_pair.short).as_bytes());
        long_buf.extend_from_slice(format!("\0{dep}={}", dep_pair.long).as_bytes());
      }
    }

    Ok(FingerprintPair {
      short: self.short_algo.hash(&short_buf),
      long: self.long_algo.hash(&long_buf),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ember_plan::{FnCommand, Node, Plan};
  use serde_json::json;
  use std::sync::Arc;

  fn store() -> FingerprintStore {
    FingerprintStore::new(HashAlgorithm::Xxh3, HashAlgorithm::Sha256)
  }

  fn target(id: &str, deps: &[&str], source: &str) -> Node {
    Node::target(
      id,
      deps.iter().copied(),
      Arc::new(FnCommand::new(source, |_| Ok(json!(null)))),
    )
  }

  #[test]
  fn value_fingerprint_tracks_content() {
    let mut plan = Plan::new();
    plan.add(Node::import("a", json!(1))).unwrap();
    let store = store();
    let one = store.fingerprint_of(plan.get("a").unwrap(), &plan).unwrap();

    let mut plan2 = Plan::new();
    plan2.add(Node::import("a", json!(5))).unwrap();
    let five = FingerprintStore::new(HashAlgorithm::Xxh3, HashAlgorithm::Sha256)
      .fingerprint_of(plan2.get("a").unwrap(), &plan2)
      .unwrap();

    assert_ne!(one, five);
  }

  #[test]
  fn command_fingerprint_ignores_reformatting() {
    let mut plan = Plan::new();
    plan.add(target("b", &[], "a  +\n  1")).unwrap();
    let mut plan2 = Plan::new();
    plan2.add(target("b", &[], "a + 1")).unwrap();

    let a = store().fingerprint_of(plan.get("b").unwrap(), &plan).unwrap();
    let b = store().fingerprint_of(plan2.get("b").unwrap(), &plan2).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn command_fingerprint_covers_function_imports_transitively() {
    let build = |inner_source: &str| {
      let mut plan = Plan::new();
      plan
        .add(Node::function_import("inner", inner_source, Vec::<String>::new()))
        .unwrap();
      plan
        .add(Node::function_import("outer", "fn outer() { inner() }", ["inner"]))
        .unwrap();
      plan.add(target("t", &["outer"], "outer()")).unwrap();
      store().fingerprint_of(plan.get("t").unwrap(), &plan).unwrap()
    };

    let before = build("fn inner() { 1 }");
    let after = build("fn inner() { 2 }");
    assert_ne!(before, after);
  }

  #[test]
  fn value_imports_do_not_feed_the_command_fingerprint() {
    let build = |value: serde_json::Value| {
      let mut plan = Plan::new();
      plan.add(Node::import("a", value)).unwrap();
      plan.add(target("t", &["a"], "a + 1")).unwrap();
      store().fingerprint_of(plan.get("t").unwrap(), &plan).unwrap()
    };

    assert_eq!(build(json!(1)), build(json!(5)));
  }

  #[test]
  fn dependency_fingerprint_is_order_independent_and_skips_self() {
    let mut plan = Plan::new();
    plan.add(Node::import("a", json!(1))).unwrap();
    plan.add(Node::import("b", json!(2))).unwrap();
    plan.add(target("t", &["b", "a", "t"], "a + b")).unwrap();

    let store = store();
    let mut current = HashMap::new();
    current.insert(
      "a".to_string(),
      store.fingerprint_of(plan.get("a").unwrap(), &plan).unwrap(),
    );
    current.insert(
      "b".to_string(),
      store.fingerprint_of(plan.get("b").unwrap(), &plan).unwrap(),
    );

    let node = plan.get("t").unwrap();
    let with_self = store.dependency_fingerprint_of(node, &current);

    let mut plan2 = Plan::new();
    plan2.add(Node::import("a", json!(1))).unwrap();
    plan2.add(Node::import("b", json!(2))).unwrap();
    plan2.add(target("t", &["a", "b"], "a + b")).unwrap();
    let without_self = store.dependency_fingerprint_of(plan2.get("t").unwrap(), &current);

    assert_eq!(with_self, without_self);
  }

  #[test]
  fn missing_file_import_fingerprints_as_absent() {
    let mut plan = Plan::new();
    plan
      .add(Node::file_import("f", "/nonexistent/ember-input"))
      .unwrap();
    let pair = store().fingerprint_of(plan.get("f").unwrap(), &plan).unwrap();
    assert!(pair.is_absent());
  }
}
