//! Ember Executor
//!
//! Runs one node's opaque work under a retry/timeout envelope:
//! - Wall-clock ceiling via `tokio::time::timeout`
//! - CPU-time ceiling via a watchdog polling process CPU time
//! - Immediate retry on failure, per-attempt budgets
//! - Diagnostics (error, warnings, messages, timing) captured from the
//!   final attempt

mod error;
mod executor;
mod outcome;

pub use error::ExecError;
pub use executor::{Executor, Limits};
pub use outcome::{Diagnostics, Outcome};
