//! Run-level outputs.

use std::collections::HashMap;

use serde::Serialize;

use crate::staleness::StaleReason;

/// Final status of one node after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeStatus {
  /// Stale; rebuilt successfully.
  Built { reason: StaleReason },
  /// Up to date; not rebuilt.
  Skipped,
  /// Attempted and failed after exhausting retries, or failed to
  /// fingerprint.
  Failed { error: String },
  /// Never attempted because an ancestor failed.
  UpstreamFailed { upstream: String },
}

/// Per-run report: a final status for every node in the plan, consumable
/// by reporting/visualization collaborators.
#[derive(Debug, Serialize)]
pub struct RunReport {
  pub run_id: String,
  pub statuses: HashMap<String, NodeStatus>,
}

impl RunReport {
  pub fn status(&self, node_id: &str) -> Option<&NodeStatus> {
    self.statuses.get(node_id)
  }

  pub fn built(&self) -> Vec<&str> {
    self.by(|s| matches!(s, NodeStatus::Built { .. }))
  }

  pub fn skipped(&self) -> Vec<&str> {
    self.by(|s| matches!(s, NodeStatus::Skipped))
  }

  pub fn failed(&self) -> Vec<&str> {
    self.by(|s| matches!(s, NodeStatus::Failed { .. }))
  }

  pub fn upstream_failed(&self) -> Vec<&str> {
    self.by(|s| matches!(s, NodeStatus::UpstreamFailed { .. }))
  }

  fn by(&self, pred: impl Fn(&NodeStatus) -> bool) -> Vec<&str> {
    let mut ids: Vec<&str> = self
      .statuses
      .iter()
      .filter(|(_, s)| pred(s))
      .map(|(id, _)| id.as_str())
      .collect();
    ids.sort_unstable();
    ids
  }
}
