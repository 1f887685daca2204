use std::collections::HashMap;

use crate::error::PlanError;
use crate::graph::Graph;
use crate::node::Node;

/// An ordered collection of nodes, validated into a [`Graph`] before any
/// execution.
#[derive(Debug, Clone, Default)]
pub struct Plan {
  nodes: HashMap<String, Node>,
  /// Insertion order, kept for stable reporting.
  order: Vec<String>,
}

impl Plan {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a node to the plan. Targets must carry a command.
  pub fn add(&mut self, node: Node) -> Result<(), PlanError> {
    if node.is_target() && node.command.is_none() {
      return Err(PlanError::MissingCommand(node.id.clone()));
    }
    if self.nodes.contains_key(&node.id) {
      return Err(PlanError::DuplicateNode(node.id.clone()));
    }
    self.order.push(node.id.clone());
    self.nodes.insert(node.id.clone(), node);
    Ok(())
  }

  /// Get a node by id.
  pub fn get(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  /// Node ids in insertion order.
  pub fn ids(&self) -> &[String] {
    &self.order
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Build and validate the dependency graph for this plan.
  pub fn graph(&self) -> Result<Graph, PlanError> {
    Graph::new(&self.nodes)
  }
}
