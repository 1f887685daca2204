use std::time::Duration;

use ember_plan::CommandError;
use thiserror::Error;

/// Ways a single execution attempt can fail.
#[derive(Debug, Error)]
pub enum ExecError {
  /// The command itself raised an error.
  #[error("command failed: {0}")]
  Command(#[from] CommandError),

  /// The attempt exceeded its wall-clock ceiling.
  #[error("timed out after {}ms of wall-clock time", .limit.as_millis())]
  ElapsedTimeout { limit: Duration },

  /// The attempt exceeded its CPU-time ceiling.
  #[error("exceeded CPU-time ceiling of {}ms", .limit.as_millis())]
  CpuTimeout { limit: Duration },

  /// The run was cancelled while the attempt was in flight.
  #[error("execution cancelled")]
  Cancelled,
}
