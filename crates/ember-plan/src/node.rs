use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::PlanError;

/// Policy deciding which conditions mark a node stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
  /// Rebuild unconditionally.
  Always,
  /// Rebuild if any of the missing/command/depends/file components fires.
  Any,
  /// Rebuild if the command text changed.
  Command,
  /// Rebuild if the combined predecessor fingerprint changed.
  Depends,
  /// Rebuild if the produced file changed or is absent.
  File,
  /// Rebuild if the node has never been processed or its artifact is absent.
  Missing,
}

impl Default for Trigger {
  fn default() -> Self {
    Trigger::Any
  }
}

impl FromStr for Trigger {
  type Err = PlanError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "always" => Ok(Trigger::Always),
      "any" => Ok(Trigger::Any),
      "command" => Ok(Trigger::Command),
      "depends" => Ok(Trigger::Depends),
      "file" => Ok(Trigger::File),
      "missing" => Ok(Trigger::Missing),
      other => Err(PlanError::UnknownTrigger(other.to_string())),
    }
  }
}

/// What a node is: a built target or one of the import flavors.
#[derive(Debug, Clone)]
pub enum NodeKind {
  /// Built by running a command.
  Target,
  /// A plain value supplied by the plan.
  ImportValue(serde_json::Value),
  /// A file on disk supplied by the plan.
  ImportFile(PathBuf),
  /// A function the plan depends on, identified by its source text.
  /// Its fingerprint also covers its declared predecessors transitively.
  ImportFunction { source: String },
}

/// One unit of the plan: a target or an import.
#[derive(Clone)]
pub struct Node {
  pub id: String,
  pub kind: NodeKind,
  /// The work to perform. Present exactly for targets.
  pub command: Option<Arc<dyn Command>>,
  /// Declared predecessor ids. Self-references are stripped during
  /// graph construction, never treated as an error.
  pub deps: BTreeSet<String>,
  /// Per-node trigger override; the run default applies when `None`.
  pub trigger: Option<Trigger>,
  /// Per-node retry override; the run default applies when `None`.
  pub retries: Option<u32>,
  /// Per-node CPU-time ceiling override.
  pub timeout_cpu: Option<Duration>,
  /// Per-node wall-clock ceiling override.
  pub timeout_elapsed: Option<Duration>,
  /// Output path for file-producing targets.
  pub file: Option<PathBuf>,
}

impl Node {
  fn new(id: impl Into<String>, kind: NodeKind) -> Self {
    Self {
      id: id.into(),
      kind,
      command: None,
      deps: BTreeSet::new(),
      trigger: None,
      retries: None,
      timeout_cpu: None,
      timeout_elapsed: None,
      file: None,
    }
  }

  /// A value import.
  pub fn import(id: impl Into<String>, value: serde_json::Value) -> Self {
    Self::new(id, NodeKind::ImportValue(value))
  }

  /// A file import.
  pub fn file_import(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    Self::new(id, NodeKind::ImportFile(path.into()))
  }

  /// A function import identified by its source text.
  pub fn function_import(
    id: impl Into<String>,
    source: impl Into<String>,
    deps: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    let mut node = Self::new(
      id,
      NodeKind::ImportFunction {
        source: source.into(),
      },
    );
    node.deps = deps.into_iter().map(Into::into).collect();
    node
  }

  /// A target built by the given command.
  pub fn target(
    id: impl Into<String>,
    deps: impl IntoIterator<Item = impl Into<String>>,
    command: Arc<dyn Command>,
  ) -> Self {
    let mut node = Self::new(id, NodeKind::Target);
    node.deps = deps.into_iter().map(Into::into).collect();
    node.command = Some(command);
    node
  }

  /// A target that writes its output to a file at the given path.
  pub fn file_target(
    id: impl Into<String>,
    deps: impl IntoIterator<Item = impl Into<String>>,
    command: Arc<dyn Command>,
    path: impl Into<PathBuf>,
  ) -> Self {
    Self::target(id, deps, command).with_file(path)
  }

  /// Override the trigger policy for this node.
  pub fn with_trigger(mut self, trigger: Trigger) -> Self {
    self.trigger = Some(trigger);
    self
  }

  /// Override the retry budget for this node.
  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = Some(retries);
    self
  }

  /// Override the wall-clock ceiling for this node.
  pub fn with_timeout_elapsed(mut self, timeout: Duration) -> Self {
    self.timeout_elapsed = Some(timeout);
    self
  }

  /// Override the CPU-time ceiling for this node.
  pub fn with_timeout_cpu(mut self, timeout: Duration) -> Self {
    self.timeout_cpu = Some(timeout);
    self
  }

  /// Declare that this target produces a file at the given path.
  pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.file = Some(path.into());
    self
  }

  /// Whether this node runs a command (targets) or is resolved by
  /// fingerprinting alone (imports).
  pub fn is_target(&self) -> bool {
    matches!(self.kind, NodeKind::Target)
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node")
      .field("id", &self.id)
      .field("kind", &self.kind)
      .field("command", &self.command.as_ref().map(|c| c.source()))
      .field("deps", &self.deps)
      .field("trigger", &self.trigger)
      .field("retries", &self.retries)
      .field("timeout_cpu", &self.timeout_cpu)
      .field("timeout_elapsed", &self.timeout_elapsed)
      .field("file", &self.file)
      .finish()
  }
}
