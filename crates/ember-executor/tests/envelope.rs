//! Envelope behavior: retries, timeouts, diagnostics capture.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ember_executor::{Executor, Limits, Outcome};
use ember_plan::{Command, CommandContext, CommandError};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Fails the first `fails` attempts, then succeeds with the attempt number.
struct FlakyCommand {
  fails: u32,
  attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Command for FlakyCommand {
  fn source(&self) -> &str {
    "flaky()"
  }

  async fn run(&self, ctx: &mut CommandContext) -> Result<serde_json::Value, CommandError> {
    let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.message(format!("attempt {n}"));
    if n <= self.fails {
      ctx.warn(format!("attempt {n} about to fail"));
      Err(CommandError::Failed(format!("attempt {n} failed")))
    } else {
      Ok(json!(n))
    }
  }
}

/// Sleeps long enough to breach any reasonable wall-clock ceiling.
struct SleepyCommand {
  attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Command for SleepyCommand {
  fn source(&self) -> &str {
    "sleep_forever()"
  }

  async fn run(&self, _ctx: &mut CommandContext) -> Result<serde_json::Value, CommandError> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3600)).await;
    Ok(json!(null))
  }
}

/// Burns CPU in short slices, yielding between them so ceilings can fire.
#[cfg(unix)]
struct BusyCommand;

#[cfg(unix)]
#[async_trait]
impl Command for BusyCommand {
  fn source(&self) -> &str {
    "spin()"
  }

  async fn run(&self, _ctx: &mut CommandContext) -> Result<serde_json::Value, CommandError> {
    loop {
      let slice = std::time::Instant::now();
      while slice.elapsed() < Duration::from_millis(5) {
        std::hint::black_box(());
      }
      tokio::task::yield_now().await;
    }
  }
}

#[cfg(unix)]
#[tokio::test]
async fn cpu_ceiling_fails_a_busy_command() {
  let limits = Limits {
    retries: 0,
    timeout_elapsed: None,
    timeout_cpu: Some(Duration::from_millis(100)),
  };
  let outcome = Executor::new()
    .run(
      "busy",
      Arc::new(BusyCommand),
      HashMap::new(),
      limits,
      &CancellationToken::new(),
    )
    .await;

  assert!(!outcome.is_success());
  let error = outcome.diagnostics().error.as_deref().unwrap();
  assert!(error.contains("CPU-time ceiling"));
  assert_eq!(outcome.diagnostics().timings.attempts, 1);
}

#[tokio::test]
async fn always_timing_out_uses_exactly_retries_plus_one_attempts() {
  let attempts = Arc::new(AtomicU32::new(0));
  let command = Arc::new(SleepyCommand {
    attempts: attempts.clone(),
  });

  let limits = Limits {
    retries: 2,
    timeout_elapsed: Some(Duration::from_millis(20)),
    timeout_cpu: None,
  };
  let outcome = Executor::new()
    .run(
      "slow",
      command,
      HashMap::new(),
      limits,
      &CancellationToken::new(),
    )
    .await;

  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  match outcome {
    Outcome::Failure { diagnostics } => {
      assert_eq!(diagnostics.timings.attempts, 3);
      assert!(diagnostics.error.as_deref().unwrap().contains("timed out"));
    }
    Outcome::Success { .. } => panic!("expected failure"),
  }
}

#[tokio::test]
async fn retries_until_success_and_reports_final_attempt_diagnostics() {
  let attempts = Arc::new(AtomicU32::new(0));
  let command = Arc::new(FlakyCommand {
    fails: 2,
    attempts: attempts.clone(),
  });

  let limits = Limits {
    retries: 2,
    ..Limits::default()
  };
  let outcome = Executor::new()
    .run(
      "flaky",
      command,
      HashMap::new(),
      limits,
      &CancellationToken::new(),
    )
    .await;

  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  match outcome {
    Outcome::Success { value, diagnostics } => {
      assert_eq!(value, json!(3));
      assert_eq!(diagnostics.timings.attempts, 3);
      assert!(diagnostics.error.is_none());
      // Only the final (successful) attempt's diagnostics survive.
      assert_eq!(diagnostics.messages, vec!["attempt 3".to_string()]);
      assert!(diagnostics.warnings.is_empty());
    }
    Outcome::Failure { .. } => panic!("expected success"),
  }
}

#[tokio::test]
async fn exhausted_retries_keep_final_attempt_diagnostics_only() {
  let attempts = Arc::new(AtomicU32::new(0));
  let command = Arc::new(FlakyCommand {
    fails: u32::MAX,
    attempts: attempts.clone(),
  });

  let limits = Limits {
    retries: 1,
    ..Limits::default()
  };
  let outcome = Executor::new()
    .run(
      "doomed",
      command,
      HashMap::new(),
      limits,
      &CancellationToken::new(),
    )
    .await;

  assert_eq!(attempts.load(Ordering::SeqCst), 2);
  let diagnostics = outcome.diagnostics();
  assert_eq!(diagnostics.timings.attempts, 2);
  assert_eq!(diagnostics.error.as_deref(), Some("command failed: attempt 2 failed"));
  assert_eq!(diagnostics.messages, vec!["attempt 2".to_string()]);
}

#[tokio::test]
async fn cancellation_stops_further_attempts() {
  let attempts = Arc::new(AtomicU32::new(0));
  let command = Arc::new(SleepyCommand {
    attempts: attempts.clone(),
  });

  let cancel = CancellationToken::new();
  let executor = Executor::new();
  let run = executor.run(
    "cancelled",
    command,
    HashMap::new(),
    Limits {
      retries: 5,
      ..Limits::default()
    },
    &cancel,
  );

  let outcome = tokio::join!(run, async {
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
  })
  .0;

  // Cancellation fails the in-flight attempt and suppresses the retries.
  assert_eq!(attempts.load(Ordering::SeqCst), 1);
  assert!(!outcome.is_success());
  assert_eq!(outcome.diagnostics().error.as_deref(), Some("execution cancelled"));
}
