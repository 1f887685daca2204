//! Execution outcomes and captured diagnostics.

use ember_cache::Timings;

/// Diagnostic payload captured from the final attempt.
#[derive(Debug, Clone)]
pub struct Diagnostics {
  pub error: Option<String>,
  pub warnings: Vec<String>,
  pub messages: Vec<String>,
  pub timings: Timings,
}

/// Result of running one node's work through the envelope.
#[derive(Debug)]
pub enum Outcome {
  /// The work produced a value within the attempt budget.
  Success {
    value: serde_json::Value,
    diagnostics: Diagnostics,
  },
  /// Every allowed attempt failed; diagnostics are from the last one.
  Failure { diagnostics: Diagnostics },
}

impl Outcome {
  pub fn diagnostics(&self) -> &Diagnostics {
    match self {
      Outcome::Success { diagnostics, .. } => diagnostics,
      Outcome::Failure { diagnostics } => diagnostics,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::Success { .. })
  }
}
