use thiserror::Error;

/// Configuration errors raised while assembling or validating a plan.
///
/// All of these are fatal and surface before any node is scheduled.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("node '{node_id}' depends on unknown node '{dep}'")]
  UnknownDependency { node_id: String, dep: String },

  #[error("dependency cycle involving nodes: {}", .0.join(", "))]
  Cycle(Vec<String>),

  #[error("unknown trigger name: {0}")]
  UnknownTrigger(String),

  #[error("target '{0}' has no command")]
  MissingCommand(String),
}
