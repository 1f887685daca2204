//! The opaque command contract.
//!
//! A target's work is an arbitrary async callable registered by the caller.
//! Ember never introspects it; the caller supplies a canonical source text
//! alongside the callable, and that text is what the command fingerprint is
//! computed from. Predecessors are declared explicitly on the node, never
//! inferred from the callable.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a command while running.
#[derive(Debug, Error)]
pub enum CommandError {
  /// The command itself reported a failure.
  #[error("{0}")]
  Failed(String),

  /// The command asked for an upstream value that was not provided.
  #[error("node '{node_id}' has no upstream value '{dep}'")]
  MissingUpstream { node_id: String, dep: String },
}

/// Per-invocation context handed to a command.
///
/// Exposes the upstream values the node declared as predecessors, and
/// collects warnings/messages the command wants recorded in its metadata.
#[derive(Debug)]
pub struct CommandContext {
  node_id: String,
  upstream: HashMap<String, serde_json::Value>,
  warnings: Vec<String>,
  messages: Vec<String>,
}

impl CommandContext {
  pub fn new(node_id: impl Into<String>, upstream: HashMap<String, serde_json::Value>) -> Self {
    Self {
      node_id: node_id.into(),
      upstream,
      warnings: Vec::new(),
      messages: Vec::new(),
    }
  }

  /// The id of the node being executed.
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  /// Look up an upstream value by predecessor id.
  pub fn upstream(&self, dep: &str) -> Option<&serde_json::Value> {
    self.upstream.get(dep)
  }

  /// Look up an upstream value, failing if the predecessor was not declared.
  pub fn require(&self, dep: &str) -> Result<&serde_json::Value, CommandError> {
    self
      .upstream
      .get(dep)
      .ok_or_else(|| CommandError::MissingUpstream {
        node_id: self.node_id.clone(),
        dep: dep.to_string(),
      })
  }

  /// Record a warning to be persisted in the node's metadata.
  pub fn warn(&mut self, message: impl Into<String>) {
    self.warnings.push(message.into());
  }

  /// Record an informational message to be persisted in the node's metadata.
  pub fn message(&mut self, message: impl Into<String>) {
    self.messages.push(message.into());
  }

  /// Drain the collected warnings and messages.
  pub fn take_diagnostics(&mut self) -> (Vec<String>, Vec<String>) {
    (
      std::mem::take(&mut self.warnings),
      std::mem::take(&mut self.messages),
    )
  }
}

/// The opaque work behind a target.
///
/// `source` is the canonical text identifying the work; re-registering a
/// command with the same source is treated as "unchanged" by the command
/// trigger component.
#[async_trait]
pub trait Command: Send + Sync {
  /// Canonical source text, hashed to form the command fingerprint.
  fn source(&self) -> &str;

  /// Perform the work and produce the node's value.
  async fn run(&self, ctx: &mut CommandContext) -> Result<serde_json::Value, CommandError>;
}

/// A [`Command`] wrapping a synchronous closure.
///
/// Covers the common case where a target's work has no await points of its
/// own. Commands that need to await should implement [`Command`] directly.
pub struct FnCommand<F> {
  source: String,
  f: F,
}

impl<F> FnCommand<F>
where
  F: Fn(&mut CommandContext) -> Result<serde_json::Value, CommandError> + Send + Sync,
{
  pub fn new(source: impl Into<String>, f: F) -> Self {
    Self {
      source: source.into(),
      f,
    }
  }
}

#[async_trait]
impl<F> Command for FnCommand<F>
where
  F: Fn(&mut CommandContext) -> Result<serde_json::Value, CommandError> + Send + Sync,
{
  fn source(&self) -> &str {
    &self.source
  }

  async fn run(&self, ctx: &mut CommandContext) -> Result<serde_json::Value, CommandError> {
    (self.f)(ctx)
  }
}
