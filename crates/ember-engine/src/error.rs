use ember_cache::CacheError;
use ember_plan::PlanError;
use thiserror::Error;

/// Run-fatal errors.
///
/// Node-level failures (command errors, timeouts, unreadable content) never
/// surface here; they end up as per-node statuses in the run report. Only a
/// malformed plan, an unusable backend, cancellation, or a failure under
/// `fail_fast` aborts the run.
#[derive(Debug, Error)]
pub enum EngineError {
  /// The plan is malformed: unknown predecessor, cycle, missing command.
  #[error("invalid plan: {0}")]
  Plan(#[from] PlanError),

  /// The cache backend is unavailable or corrupt.
  #[error(transparent)]
  Cache(#[from] CacheError),

  /// The run was cancelled.
  #[error("run cancelled")]
  Cancelled,

  /// A node failed while `fail_fast` was set.
  #[error("node '{node_id}' failed: {error}")]
  NodeFailed { node_id: String, error: String },

  /// A spawned execution task could not be joined.
  #[error("task join error: {0}")]
  Join(String),
}
