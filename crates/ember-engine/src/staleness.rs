//! Trigger-based staleness decisions.
//!
//! Deterministic and side-effect-free: dry runs call [`StalenessEvaluator`]
//! with the same inputs the scheduler uses, without triggering builds.

use std::fmt;

use ember_cache::{FingerprintPair, Metadata};
use ember_plan::{Node, Trigger};
use serde::Serialize;

/// Why a node was considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
  /// The `always` trigger is unconditional.
  AlwaysTrigger,
  /// No metadata has ever been recorded for the node.
  NeverProcessed,
  /// The node's expected artifact (cache entry or file) is absent.
  ArtifactMissing,
  /// The command/source fingerprint changed.
  CommandChanged,
  /// The combined predecessor fingerprint changed.
  DependsChanged,
  /// The produced file's content changed.
  FileChanged,
  /// The produced file is absent.
  FileMissing,
}

impl fmt::Display for StaleReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      StaleReason::AlwaysTrigger => "always trigger",
      StaleReason::NeverProcessed => "never processed",
      StaleReason::ArtifactMissing => "artifact missing",
      StaleReason::CommandChanged => "command changed",
      StaleReason::DependsChanged => "dependencies changed",
      StaleReason::FileChanged => "file changed",
      StaleReason::FileMissing => "file missing",
    };
    f.write_str(s)
  }
}

/// Outcome of a staleness decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
  pub stale: bool,
  /// Set exactly when `stale` is true.
  pub reason: Option<StaleReason>,
}

impl Decision {
  fn stale(reason: StaleReason) -> Self {
    Self {
      stale: true,
      reason: Some(reason),
    }
  }

  fn up_to_date() -> Self {
    Self {
      stale: false,
      reason: None,
    }
  }
}

/// Everything the evaluator needs to observe about a node's current state.
#[derive(Debug)]
pub struct Observed<'a> {
  /// Freshly computed fingerprint of the node's own content.
  pub fresh: &'a FingerprintPair,
  /// Freshly combined fingerprint of the node's predecessors.
  pub fresh_deps: &'a FingerprintPair,
  /// Whether the node's cached artifact exists.
  pub artifact_present: bool,
  /// Live fingerprint of the produced file, for file-producing nodes.
  pub live_file: Option<&'a FingerprintPair>,
}

/// Compares recorded metadata against fresh fingerprints under a node's
/// trigger policy.
#[derive(Debug, Clone, Copy)]
pub struct StalenessEvaluator {
  default_trigger: Trigger,
}

impl StalenessEvaluator {
  pub fn new(default_trigger: Trigger) -> Self {
    Self { default_trigger }
  }

  /// Decide whether a node must rebuild.
  ///
  /// Components are evaluated short-circuit in priority order: always,
  /// missing, command, depends, file. `Any` activates the latter four;
  /// each named trigger activates only its own component. First firing
  /// component wins; if none fires the node is up to date.
  pub fn decide(&self, node: &Node, metadata: Option<&Metadata>, observed: &Observed<'_>) -> Decision {
    let trigger = node.trigger.unwrap_or(self.default_trigger);

    if trigger == Trigger::Always {
      return Decision::stale(StaleReason::AlwaysTrigger);
    }

    let any = trigger == Trigger::Any;

    if any || trigger == Trigger::Missing {
      let Some(meta) = metadata else {
        return Decision::stale(StaleReason::NeverProcessed);
      };
      if meta.fingerprint.is_none() {
        // A record exists but no attempt ever succeeded.
        return Decision::stale(StaleReason::NeverProcessed);
      }
      if !observed.artifact_present {
        return Decision::stale(StaleReason::ArtifactMissing);
      }
    }

    if any || trigger == Trigger::Command {
      let recorded = metadata.and_then(|m| m.fingerprint.as_ref());
      if recorded != Some(observed.fresh) {
        return Decision::stale(StaleReason::CommandChanged);
      }
    }

    if any || trigger == Trigger::Depends {
      let recorded = metadata.and_then(|m| m.dependency_fingerprint.as_ref());
      if recorded != Some(observed.fresh_deps) {
        return Decision::stale(StaleReason::DependsChanged);
      }
    }

    if any || trigger == Trigger::File {
      if let Some(live) = observed.live_file {
        if live.is_absent() {
          return Decision::stale(StaleReason::FileMissing);
        }
        let recorded = metadata.and_then(|m| m.file_fingerprint.as_ref());
        if recorded != Some(live) {
          return Decision::stale(StaleReason::FileChanged);
        }
      }
    }

    Decision::up_to_date()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ember_cache::{HashAlgorithm, Metadata};
  use ember_plan::{FnCommand, Node};
  use serde_json::json;
  use std::sync::Arc;

  fn pair(bytes: &[u8]) -> FingerprintPair {
    FingerprintPair {
      short: HashAlgorithm::Xxh3.hash(bytes),
      long: HashAlgorithm::Sha256.hash(bytes),
    }
  }

  fn target(trigger: Option<Trigger>) -> Node {
    let node = Node::target(
      "t",
      Vec::<String>::new(),
      Arc::new(FnCommand::new("work()", |_| Ok(json!(null)))),
    );
    match trigger {
      Some(t) => node.with_trigger(t),
      None => node,
    }
  }

  fn recorded(fresh: &FingerprintPair, deps: &FingerprintPair) -> Metadata {
    let mut meta = Metadata::default();
    meta.record_success(fresh.clone(), deps.clone(), None, Some("work()".to_string()));
    meta
  }

  fn observed<'a>(fresh: &'a FingerprintPair, deps: &'a FingerprintPair) -> Observed<'a> {
    Observed {
      fresh,
      fresh_deps: deps,
      artifact_present: true,
      live_file: None,
    }
  }

  #[test]
  fn always_trigger_is_always_stale() {
    let node = target(Some(Trigger::Always));
    let fresh = pair(b"fp");
    let deps = pair(b"deps");
    let meta = recorded(&fresh, &deps);
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let decision = evaluator.decide(&node, Some(&meta), &observed(&fresh, &deps));
    assert!(decision.stale);
    assert_eq!(decision.reason, Some(StaleReason::AlwaysTrigger));
  }

  #[test]
  fn missing_trigger_fires_iff_never_processed() {
    let node = target(Some(Trigger::Missing));
    let fresh = pair(b"fp");
    let deps = pair(b"deps");
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let decision = evaluator.decide(&node, None, &observed(&fresh, &deps));
    assert_eq!(decision.reason, Some(StaleReason::NeverProcessed));

    // Content changes are invisible to the missing trigger.
    let meta = recorded(&pair(b"other"), &pair(b"other-deps"));
    let decision = evaluator.decide(&node, Some(&meta), &observed(&fresh, &deps));
    assert!(!decision.stale);
  }

  #[test]
  fn missing_component_sees_absent_artifact() {
    let node = target(None);
    let fresh = pair(b"fp");
    let deps = pair(b"deps");
    let meta = recorded(&fresh, &deps);
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let mut obs = observed(&fresh, &deps);
    obs.artifact_present = false;
    let decision = evaluator.decide(&node, Some(&meta), &obs);
    assert_eq!(decision.reason, Some(StaleReason::ArtifactMissing));
  }

  #[test]
  fn any_fires_on_command_change_before_depends() {
    let node = target(None);
    let old_fresh = pair(b"old");
    let deps = pair(b"deps");
    let meta = recorded(&old_fresh, &deps);
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let new_fresh = pair(b"new");
    let new_deps = pair(b"new-deps");
    let decision = evaluator.decide(&node, Some(&meta), &observed(&new_fresh, &new_deps));
    assert_eq!(decision.reason, Some(StaleReason::CommandChanged));
  }

  #[test]
  fn command_trigger_ignores_dependency_changes() {
    let node = target(Some(Trigger::Command));
    let fresh = pair(b"fp");
    let deps = pair(b"deps");
    let meta = recorded(&fresh, &deps);
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let new_deps = pair(b"changed-deps");
    let decision = evaluator.decide(&node, Some(&meta), &observed(&fresh, &new_deps));
    assert!(!decision.stale);

    let new_fresh = pair(b"new");
    let decision = evaluator.decide(&node, Some(&meta), &observed(&new_fresh, &deps));
    assert_eq!(decision.reason, Some(StaleReason::CommandChanged));
  }

  #[test]
  fn file_component_distinguishes_missing_and_changed() {
    let node = target(None).with_file("/tmp/out");
    let fresh = pair(b"fp");
    let deps = pair(b"deps");
    let mut meta = recorded(&fresh, &deps);
    meta.file_fingerprint = Some(pair(b"file-v1"));
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let absent = FingerprintPair::absent();
    let mut obs = observed(&fresh, &deps);
    obs.live_file = Some(&absent);
    assert_eq!(
      evaluator.decide(&node, Some(&meta), &obs).reason,
      Some(StaleReason::FileMissing)
    );

    let live = pair(b"file-v2");
    obs.live_file = Some(&live);
    assert_eq!(
      evaluator.decide(&node, Some(&meta), &obs).reason,
      Some(StaleReason::FileChanged)
    );

    let unchanged = pair(b"file-v1");
    obs.live_file = Some(&unchanged);
    assert!(!evaluator.decide(&node, Some(&meta), &obs).stale);
  }

  #[test]
  fn up_to_date_when_no_component_fires() {
    let node = target(None);
    let fresh = pair(b"fp");
    let deps = pair(b"deps");
    let meta = recorded(&fresh, &deps);
    let evaluator = StalenessEvaluator::new(Trigger::Any);

    let decision = evaluator.decide(&node, Some(&meta), &observed(&fresh, &deps));
    assert!(!decision.stale);
    assert_eq!(decision.reason, None);
  }
}
