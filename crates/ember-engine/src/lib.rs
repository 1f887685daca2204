//! Ember Engine
//!
//! The incremental execution core: decides which nodes of a plan are stale
//! under their trigger policies, walks the dependency graph in order while
//! running independent nodes in parallel, and persists values, fingerprints,
//! and metadata through the cache backend so that an unchanged plan rebuilds
//! nothing on the next run.
//!
//! Entry points:
//! - [`Engine::run`] — execute the stale subset of a plan
//! - [`Engine::outdated`] — side-effect-free dry run reporting what would
//!   rebuild and why
//! - [`Engine::metadata`] / [`Engine::value`] — diagnostics query surface

mod config;
mod engine;
mod error;
mod report;
mod staleness;

pub use config::RunConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use report::{NodeStatus, RunReport};
pub use staleness::{Decision, StaleReason, StalenessEvaluator};
