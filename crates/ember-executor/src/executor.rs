//! The execution envelope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ember_cache::Timings;
use ember_plan::{Command, CommandContext};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::ExecError;
use crate::outcome::{Diagnostics, Outcome};

/// Per-node execution limits, resolved from node overrides and run defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
  /// Retries after the first attempt; total attempts = retries + 1.
  pub retries: u32,
  /// Wall-clock ceiling per attempt.
  pub timeout_elapsed: Option<Duration>,
  /// CPU-time ceiling per attempt.
  pub timeout_cpu: Option<Duration>,
}

/// Runs one node's opaque work under retry and timeout ceilings.
#[derive(Debug, Default)]
pub struct Executor;

impl Executor {
  pub fn new() -> Self {
    Self
  }

  /// Execute a command with the given upstream values.
  ///
  /// Retries immediately on failure; each retry is a fresh attempt with
  /// the same per-attempt timeout budget, not a cumulative one. The
  /// returned diagnostics are always those of the final attempt.
  #[instrument(name = "node_execute", skip(self, command, upstream, cancel), fields(node_id = %node_id))]
  pub async fn run(
    &self,
    node_id: &str,
    command: Arc<dyn Command>,
    upstream: HashMap<String, serde_json::Value>,
    limits: Limits,
    cancel: &CancellationToken,
  ) -> Outcome {
    let attempts_allowed = limits.retries + 1;
    let mut last = None;

    for attempt in 1..=attempts_allowed {
      let started_at = Utc::now();
      let clock = Instant::now();
      let mut ctx = CommandContext::new(node_id, upstream.clone());

      let result = run_attempt(command.as_ref(), &mut ctx, &limits, cancel).await;

      let (warnings, messages) = ctx.take_diagnostics();
      let timings = Timings {
        started_at,
        elapsed_ms: clock.elapsed().as_millis() as u64,
        attempts: attempt,
      };

      match result {
        Ok(value) => {
          info!(attempt, elapsed_ms = timings.elapsed_ms, "node completed");
          return Outcome::Success {
            value,
            diagnostics: Diagnostics {
              error: None,
              warnings,
              messages,
              timings,
            },
          };
        }
        Err(e) => {
          let cancelled = matches!(e, ExecError::Cancelled);
          warn!(attempt, error = %e, "attempt failed");
          last = Some(Diagnostics {
            error: Some(e.to_string()),
            warnings,
            messages,
            timings,
          });
          // A cancelled run gets no further attempts.
          if cancelled {
            break;
          }
        }
      }
    }

    let diagnostics = last.expect("at least one attempt ran");
    Outcome::Failure { diagnostics }
  }
}

/// Run one attempt, racing the work against its ceilings and cancellation.
async fn run_attempt(
  command: &dyn Command,
  ctx: &mut CommandContext,
  limits: &Limits,
  cancel: &CancellationToken,
) -> Result<serde_json::Value, ExecError> {
  let work = async {
    match limits.timeout_elapsed {
      Some(limit) => match tokio::time::timeout(limit, command.run(ctx)).await {
        Ok(result) => result.map_err(ExecError::Command),
        Err(_) => Err(ExecError::ElapsedTimeout { limit }),
      },
      None => command.run(ctx).await.map_err(ExecError::Command),
    }
  };

  tokio::select! {
    result = work => result,
    limit = cpu_ceiling_breached(limits.timeout_cpu) => Err(ExecError::CpuTimeout { limit }),
    _ = cancel.cancelled() => Err(ExecError::Cancelled),
  }
}

/// Resolves when the process CPU time consumed since the attempt started
/// exceeds the ceiling. Process-wide, so concurrent nodes make the ceiling
/// conservative. Never resolves when no ceiling is set or CPU time is
/// unavailable on this platform.
async fn cpu_ceiling_breached(ceiling: Option<Duration>) -> Duration {
  let (Some(limit), Some(start)) = (ceiling, process_cpu_time()) else {
    return std::future::pending().await;
  };
  loop {
    tokio::time::sleep(Duration::from_millis(25)).await;
    match process_cpu_time() {
      Some(now) if now.saturating_sub(start) > limit => return limit,
      Some(_) => {}
      None => return std::future::pending().await,
    }
  }
}

#[cfg(unix)]
fn process_cpu_time() -> Option<Duration> {
  let mut ts = libc::timespec {
    tv_sec: 0,
    tv_nsec: 0,
  };
  let rc = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut ts) };
  (rc == 0).then(|| Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
fn process_cpu_time() -> Option<Duration> {
  None
}
