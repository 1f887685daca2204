use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::error::PlanError;
use crate::node::Node;

/// Graph structure for traversal and analysis.
///
/// Built once per run from the plan's declared predecessor sets.
/// Self-referential edges are stripped before validation; everything
/// downstream of this type can assume a self-loop-free DAG.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: node_id -> list of downstream node_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> list of upstream node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Node ids in a valid dependency order.
  topo_order: Vec<String>,
}

impl Graph {
  /// Build and validate a graph from the plan's nodes.
  ///
  /// Fails on predecessor references to unknown ids and on cycles. A node
  /// listing itself as a predecessor is not an error; the edge is dropped.
  pub fn new(nodes: &HashMap<String, Node>) -> Result<Self, PlanError> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node_id in nodes.keys() {
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id.clone()).or_default();
    }

    for (id, node) in nodes {
      for dep in &node.deps {
        if dep == id {
          // Self-loop: stripped, never an error.
          continue;
        }
        if !nodes.contains_key(dep) {
          return Err(PlanError::UnknownDependency {
            node_id: id.clone(),
            dep: dep.clone(),
          });
        }
        adjacency.entry(dep.clone()).or_default().push(id.clone());
        reverse_adjacency
          .entry(id.clone())
          .or_default()
          .push(dep.clone());
      }
    }

    let topo_order = toposort(&adjacency, &reverse_adjacency)?;

    Ok(Self {
      adjacency,
      reverse_adjacency,
      topo_order,
    })
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Node ids in a valid dependency order.
  pub fn topo_order(&self) -> &[String] {
    &self.topo_order
  }

  /// All transitive downstream nodes of a given node.
  pub fn descendants(&self, node_id: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = self.downstream(node_id).iter().map(String::as_str).collect();
    while let Some(id) = queue.pop_front() {
      if seen.insert(id.to_string()) {
        queue.extend(self.downstream(id).iter().map(String::as_str));
      }
    }
    seen
  }
}

/// Kahn's algorithm. Any leftover nodes after the queue drains sit on a
/// cycle and are reported in the error, sorted for stable messages.
fn toposort(
  adjacency: &HashMap<String, Vec<String>>,
  reverse_adjacency: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, PlanError> {
  let mut in_degree: HashMap<&str, usize> = reverse_adjacency
    .iter()
    .map(|(id, ups)| (id.as_str(), ups.len()))
    .collect();

  let mut queue: VecDeque<&str> = in_degree
    .iter()
    .filter(|(_, d)| **d == 0)
    .map(|(id, _)| *id)
    .collect();

  let mut order = Vec::with_capacity(in_degree.len());
  while let Some(id) = queue.pop_front() {
    order.push(id.to_string());
    for down in adjacency.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
      let degree = in_degree
        .get_mut(down.as_str())
        .expect("adjacency references known node");
      *degree -= 1;
      if *degree == 0 {
        queue.push_back(down);
      }
    }
  }

  if order.len() < in_degree.len() {
    let mut cyclic: Vec<String> = in_degree
      .iter()
      .filter(|(_, d)| **d > 0)
      .map(|(id, _)| id.to_string())
      .collect();
    cyclic.sort();
    return Err(PlanError::Cycle(cyclic));
  }

  Ok(order)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::Node;
  use serde_json::json;

  fn plan_nodes(specs: &[(&str, &[&str])]) -> HashMap<String, Node> {
    specs
      .iter()
      .map(|(id, deps)| {
        let mut node = Node::import(*id, json!(null));
        node.deps = deps.iter().map(|d| d.to_string()).collect();
        (id.to_string(), node)
      })
      .collect()
  }

  #[test]
  fn builds_topo_order_respecting_deps() {
    let nodes = plan_nodes(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
    let graph = Graph::new(&nodes).unwrap();
    let order = graph.topo_order();
    let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("b") < pos("c"));
  }

  #[test]
  fn self_loop_is_stripped_not_an_error() {
    let nodes = plan_nodes(&[("a", &["a"]), ("b", &["a"])]);
    let graph = Graph::new(&nodes).unwrap();
    assert!(graph.upstream("a").is_empty());
    assert_eq!(graph.upstream("b"), ["a".to_string()]);
  }

  #[test]
  fn cycle_is_a_configuration_error() {
    let nodes = plan_nodes(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
    let err = Graph::new(&nodes).unwrap_err();
    match err {
      PlanError::Cycle(ids) => assert_eq!(ids, vec!["a".to_string(), "b".to_string()]),
      other => panic!("expected cycle error, got {other}"),
    }
  }

  #[test]
  fn unknown_dependency_is_rejected() {
    let nodes = plan_nodes(&[("a", &["ghost"])]);
    assert!(matches!(
      Graph::new(&nodes),
      Err(PlanError::UnknownDependency { .. })
    ));
  }

  #[test]
  fn descendants_are_transitive() {
    let nodes = plan_nodes(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
    let graph = Graph::new(&nodes).unwrap();
    let down = graph.descendants("a");
    assert!(down.contains("b"));
    assert!(down.contains("c"));
    assert!(!down.contains("d"));
  }
}
