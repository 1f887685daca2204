//! Ember Plan
//!
//! This crate provides the plan representation for ember: nodes (targets and
//! imports), the opaque command contract, and the dependency graph built from
//! declared predecessor sets.
//!
//! A plan is the validated input to the engine:
//! - Every declared predecessor refers to a known node
//! - Self-referential edges are stripped before anything else looks at them
//! - The remaining predecessor relation is a DAG (checked by toposort)
//! - Targets carry an explicit command; imports carry their payload

mod command;
mod error;
mod graph;
mod node;
mod plan;

pub use command::{Command, CommandContext, CommandError, FnCommand};
pub use error::PlanError;
pub use graph::Graph;
pub use node::{Node, NodeKind, Trigger};
pub use plan::Plan;
