use std::time::Duration;

use ember_cache::HashAlgorithm;
use ember_plan::Trigger;

/// Run-level configuration, constructed once per run and threaded through
/// every component explicitly.
#[derive(Debug, Clone)]
pub struct RunConfig {
  /// Upper bound on concurrently executing nodes.
  pub workers: usize,
  /// Default retry budget; per-node overrides win.
  pub retries: u32,
  /// Default wall-clock ceiling per attempt; per-node overrides win.
  pub timeout_elapsed: Option<Duration>,
  /// Default CPU-time ceiling per attempt; per-node overrides win.
  pub timeout_cpu: Option<Duration>,
  /// Default trigger policy; per-node overrides win.
  pub trigger: Trigger,
  /// Abort the whole run on the first node failure instead of skipping
  /// that node's subtree and continuing.
  pub fail_fast: bool,
  /// Algorithm for the short fingerprint class.
  pub short_algo: HashAlgorithm,
  /// Algorithm for the long fingerprint class.
  pub long_algo: HashAlgorithm,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      workers: 4,
      retries: 0,
      timeout_elapsed: None,
      timeout_cpu: None,
      trigger: Trigger::Any,
      fail_fast: false,
      short_algo: HashAlgorithm::Xxh3,
      long_algo: HashAlgorithm::Sha256,
    }
  }
}
