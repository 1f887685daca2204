//! The incremental execution engine.
//!
//! Walks the dependency graph in batches of ready nodes (every predecessor
//! resolved), evaluates staleness per node, executes the stale targets in
//! parallel under a bounded worker pool, and commits values, fingerprints,
//! and metadata back through the cache backend. A node never starts before
//! all of its predecessors' post-execution fingerprints are committed;
//! batches only begin after the previous batch is fully written back.

use std::collections::HashMap;
use std::sync::Arc;

use ember_cache::{
  CacheBackend, CacheError, FingerprintPair, FingerprintStore, Inventory, Metadata, namespace,
};
use ember_executor::{Diagnostics, Executor, Limits, Outcome};
use ember_plan::{Graph, Node, NodeKind, Plan};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::RunConfig;
use crate::error::EngineError;
use crate::report::{NodeStatus, RunReport};
use crate::staleness::{Decision, Observed, StaleReason, StalenessEvaluator};

/// The incremental build engine.
pub struct Engine {
  backend: Arc<dyn CacheBackend>,
  config: RunConfig,
  executor: Arc<Executor>,
}

/// Mutable per-run bookkeeping, owned by the coordinator loop.
#[derive(Default)]
struct RunState {
  statuses: HashMap<String, NodeStatus>,
  /// Closure fingerprints (own + deps) of resolved nodes.
  current: HashMap<String, FingerprintPair>,
  /// Values of resolved nodes, handed to downstream commands.
  values: HashMap<String, serde_json::Value>,
}

/// Everything observed about a node while deciding its staleness, kept for
/// the write-back after execution.
struct Observation {
  fresh: FingerprintPair,
  fresh_deps: FingerprintPair,
  closure: FingerprintPair,
  metadata: Option<Metadata>,
}

/// What to do with a ready node.
enum Prepared {
  /// Up to date: publish the fingerprint and cached value, rebuild nothing.
  Skip { value: serde_json::Value },
  /// Stale import: re-record fingerprint and metadata, no execution.
  Refresh { reason: StaleReason },
  /// Stale target: run its command through the envelope.
  Execute { reason: StaleReason },
}

impl Engine {
  pub fn new(backend: Arc<dyn CacheBackend>, config: RunConfig) -> Self {
    Self {
      backend,
      config,
      executor: Arc::new(Executor::new()),
    }
  }

  /// Execute the stale subset of a plan.
  ///
  /// Node-local failures (command errors, timeouts, unreadable content)
  /// mark that node `Failed` and its descendants `UpstreamFailed`;
  /// unrelated siblings continue. Only a malformed plan, a backend
  /// failure, cancellation, or `fail_fast` aborts the run.
  #[instrument(name = "engine_run", skip_all, fields(nodes = plan.len()))]
  pub async fn run(&self, plan: &Plan, cancel: CancellationToken) -> Result<RunReport, EngineError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let graph = plan.graph()?;
    let store = FingerprintStore::new(self.config.short_algo, self.config.long_algo);
    let evaluator = StalenessEvaluator::new(self.config.trigger);

    let inventory = Inventory::new();
    for ns in [namespace::OBJECTS, namespace::KERNELS, namespace::META] {
      inventory.refresh(self.backend.as_ref(), ns)?;
    }

    info!(run_id = %run_id, "run started");

    let mut state = RunState::default();
    let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));

    loop {
      if cancel.is_cancelled() {
        warn!(run_id = %run_id, "run cancelled");
        return Err(EngineError::Cancelled);
      }

      let ready = find_ready(plan, &graph, &state);
      if ready.is_empty() {
        break;
      }

      let mut handles = Vec::new();
      let mut pending: HashMap<String, (Observation, StaleReason)> = HashMap::new();

      for id in ready {
        let node = plan.get(&id).expect("ready node exists in plan");
        let (observation, prepared) = match self.prepare(node, plan, &store, &evaluator, &inventory, &state) {
          Ok(pair) => pair,
          Err(CacheError::Backend(message)) => return Err(CacheError::Backend(message).into()),
          Err(e) => {
            // Fingerprint failures are build failures of this node.
            self.fail_node(&graph, &mut state, &id, e.to_string(), None, &inventory)?;
            continue;
          }
        };

        match prepared {
          Prepared::Skip { value } => {
            state.current.insert(id.clone(), observation.closure);
            state.values.insert(id.clone(), value);
            state.statuses.insert(id, NodeStatus::Skipped);
          }
          Prepared::Refresh { reason } => {
            self.commit_import(node, observation, reason, &mut state, &inventory)?;
          }
          Prepared::Execute { reason } => {
            let command = node.command.clone().expect("validated target has a command");
            let upstream: HashMap<String, serde_json::Value> = node
              .deps
              .iter()
              .filter(|dep| *dep != &id)
              .map(|dep| (dep.clone(), state.values.get(dep).cloned().unwrap_or_default()))
              .collect();
            let limits = Limits {
              retries: node.retries.unwrap_or(self.config.retries),
              timeout_elapsed: node.timeout_elapsed.or(self.config.timeout_elapsed),
              timeout_cpu: node.timeout_cpu.or(self.config.timeout_cpu),
            };

            pending.insert(id.clone(), (observation, reason));
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
              let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
              let outcome = executor.run(&id, command, upstream, limits, &cancel).await;
              (id, outcome)
            }));
          }
        }
      }

      // Every fingerprint write of this batch happens before the next
      // batch computes its staleness decisions.
      for joined in futures::future::join_all(handles).await {
        let (id, outcome) = joined.map_err(|e| EngineError::Join(e.to_string()))?;
        let (observation, reason) = pending.remove(&id).expect("pending entry for spawned node");
        self.commit_target(plan, &graph, &mut state, &store, &inventory, &id, outcome, observation, reason)?;
      }
    }

    let report = RunReport {
      run_id,
      statuses: std::mem::take(&mut state.statuses),
    };
    info!(
      run_id = %report.run_id,
      built = report.built().len(),
      skipped = report.skipped().len(),
      failed = report.failed().len(),
      upstream_failed = report.upstream_failed().len(),
      "run completed"
    );
    Ok(report)
  }

  /// Side-effect-free dry run: which nodes would rebuild, and why.
  ///
  /// Assumes stale ancestors rebuild, so a node downstream of a change is
  /// reported through its `depends` component.
  pub fn outdated(&self, plan: &Plan) -> Result<Vec<(String, StaleReason)>, EngineError> {
    let graph = plan.graph()?;
    let store = FingerprintStore::new(self.config.short_algo, self.config.long_algo);
    let evaluator = StalenessEvaluator::new(self.config.trigger);
    let inventory = Inventory::new();
    inventory.refresh(self.backend.as_ref(), namespace::OBJECTS)?;

    let mut current: HashMap<String, FingerprintPair> = HashMap::new();
    let mut stale = Vec::new();

    for id in graph.topo_order() {
      let node = plan.get(id).expect("topo order contains plan nodes");
      let decision;
      let closure;
      match self.observe(node, plan, &store, &inventory, &current) {
        Ok((observation, metadata, live_file, artifact_present)) => {
          let observed = Observed {
            fresh: &observation.fresh,
            fresh_deps: &observation.fresh_deps,
            artifact_present,
            live_file: live_file.as_ref(),
          };
          decision = evaluator.decide(node, metadata.as_ref(), &observed);
          closure = observation.closure;
        }
        Err(CacheError::Backend(message)) => return Err(CacheError::Backend(message).into()),
        Err(_) => {
          // Unreadable content would fail (and thus rebuild) this node.
          decision = Decision {
            stale: true,
            reason: Some(StaleReason::ArtifactMissing),
          };
          closure = FingerprintPair::absent();
        }
      }

      if decision.stale {
        stale.push((id.clone(), decision.reason.expect("stale decision has a reason")));
      }
      current.insert(id.clone(), closure);
    }

    Ok(stale)
  }

  /// Full metadata record for a node, including diagnostics from the
  /// latest attempt.
  pub fn metadata(&self, node_id: &str) -> Result<Option<Metadata>, EngineError> {
    Ok(Metadata::load(self.backend.as_ref(), node_id)?)
  }

  /// A node's cached value, if it has one.
  pub fn value(&self, node_id: &str) -> Result<Option<serde_json::Value>, EngineError> {
    match self.backend.get(namespace::OBJECTS, node_id)? {
      Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
      None => Ok(None),
    }
  }

  /// Evict a node's cached value, fingerprint, and metadata.
  pub fn forget(&self, node_id: &str) -> Result<(), EngineError> {
    for ns in [namespace::OBJECTS, namespace::KERNELS, namespace::META] {
      self.backend.delete(ns, node_id)?;
    }
    Ok(())
  }

  /// Compute everything the staleness decision needs for one node.
  fn observe(
    &self,
    node: &Node,
    plan: &Plan,
    store: &FingerprintStore,
    inventory: &Inventory,
    current: &HashMap<String, FingerprintPair>,
  ) -> Result<(Observation, Option<Metadata>, Option<FingerprintPair>, bool), CacheError> {
    let mut metadata = Metadata::load(self.backend.as_ref(), &node.id)?;

    let fresh = store.fingerprint_of(node, plan)?;
    let fresh_deps = store.dependency_fingerprint_of(node, current);
    let closure = store.combine(&fresh, &fresh_deps);

    let artifact_present = match &node.kind {
      NodeKind::Target | NodeKind::ImportValue(_) => {
        inventory.contains(self.backend.as_ref(), namespace::OBJECTS, &node.id)?
      }
      NodeKind::ImportFile(_) => !fresh.is_absent(),
      NodeKind::ImportFunction { .. } => true,
    };
    if let Some(meta) = metadata.as_mut() {
      meta.missing = !artifact_present;
    }

    let live_file = match &node.file {
      Some(path) => Some(store.file_fingerprint_of(path)?),
      None => None,
    };

    let observation = Observation {
      fresh,
      fresh_deps,
      closure,
      metadata: metadata.clone(),
    };
    Ok((observation, metadata, live_file, artifact_present))
  }

  /// Decide what to do with a ready node.
  fn prepare(
    &self,
    node: &Node,
    plan: &Plan,
    store: &FingerprintStore,
    evaluator: &StalenessEvaluator,
    inventory: &Inventory,
    state: &RunState,
  ) -> Result<(Observation, Prepared), CacheError> {
    let (observation, metadata, live_file, artifact_present) =
      self.observe(node, plan, store, inventory, &state.current)?;

    let observed = Observed {
      fresh: &observation.fresh,
      fresh_deps: &observation.fresh_deps,
      artifact_present,
      live_file: live_file.as_ref(),
    };
    let mut decision = evaluator.decide(node, metadata.as_ref(), &observed);

    if !decision.stale {
      let value = match &node.kind {
        NodeKind::Target => self.load_cached_value(&node.id)?,
        _ => Some(import_value(node)),
      };
      match value {
        Some(value) => return Ok((observation, Prepared::Skip { value })),
        None => {
          // The cached value is gone or unreadable; there is nothing to
          // skip to, so the target rebuilds.
          decision = Decision {
            stale: true,
            reason: Some(StaleReason::ArtifactMissing),
          };
        }
      }
    }

    let reason = decision.reason.expect("stale decision has a reason");
    let prepared = if node.is_target() {
      Prepared::Execute { reason }
    } else {
      Prepared::Refresh { reason }
    };
    Ok((observation, prepared))
  }

  fn load_cached_value(&self, node_id: &str) -> Result<Option<serde_json::Value>, CacheError> {
    match self.backend.get(namespace::OBJECTS, node_id)? {
      Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
      None => Ok(None),
    }
  }

  /// Re-record a stale import: fingerprint, kernel, and metadata, but no
  /// execution.
  fn commit_import(
    &self,
    node: &Node,
    observation: Observation,
    reason: StaleReason,
    state: &mut RunState,
    inventory: &Inventory,
  ) -> Result<(), EngineError> {
    let value = import_value(node);

    if matches!(node.kind, NodeKind::ImportValue(_)) {
      let bytes = serde_json::to_vec(&value).map_err(|e| CacheError::Serialization {
        context: format!("value of '{}'", node.id),
        source: e,
      })?;
      self.backend.put(namespace::OBJECTS, &node.id, &bytes)?;
      inventory.record(namespace::OBJECTS, &node.id);
    }

    self.put_kernel(&node.id, &observation.closure, inventory)?;

    let mut meta = observation.metadata.unwrap_or_default();
    let file_fingerprint = match &node.kind {
      NodeKind::ImportFile(_) => Some(observation.fresh.clone()),
      _ => None,
    };
    meta.record_success(observation.fresh, observation.fresh_deps, file_fingerprint, None);
    meta.warnings.clear();
    meta.messages.clear();
    meta.store(self.backend.as_ref(), &node.id)?;
    inventory.record(namespace::META, &node.id);

    state.current.insert(node.id.clone(), observation.closure);
    state.values.insert(node.id.clone(), value);
    state.statuses.insert(node.id.clone(), NodeStatus::Built { reason });
    Ok(())
  }

  /// Write back an executed target.
  #[allow(clippy::too_many_arguments)]
  fn commit_target(
    &self,
    plan: &Plan,
    graph: &Graph,
    state: &mut RunState,
    store: &FingerprintStore,
    inventory: &Inventory,
    node_id: &str,
    outcome: Outcome,
    observation: Observation,
    reason: StaleReason,
  ) -> Result<(), EngineError> {
    let node = plan.get(node_id).expect("executed node exists in plan");

    let (value, diagnostics) = match outcome {
      Outcome::Success { value, diagnostics } => (value, diagnostics),
      Outcome::Failure { diagnostics } => {
        let message = diagnostics
          .error
          .clone()
          .unwrap_or_else(|| "unknown failure".to_string());
        return self.fail_node(
          graph,
          state,
          node_id,
          message,
          Some((diagnostics, observation.metadata)),
          inventory,
        );
      }
    };

    let bytes = serde_json::to_vec(&value).map_err(|e| CacheError::Serialization {
      context: format!("value of '{node_id}'"),
      source: e,
    })?;
    self.backend.put(namespace::OBJECTS, node_id, &bytes)?;
    inventory.record(namespace::OBJECTS, node_id);

    self.put_kernel(node_id, &observation.closure, inventory)?;

    // The output file is fingerprinted after the command ran.
    let file_fingerprint = match &node.file {
      Some(path) => match store.file_fingerprint_of(path) {
        Ok(pair) => Some(pair),
        Err(e) => {
          return self.fail_node(graph, state, node_id, e.to_string(), Some((diagnostics, observation.metadata)), inventory);
        }
      },
      None => None,
    };

    let mut meta = observation.metadata.unwrap_or_default();
    meta.record_success(
      observation.fresh,
      observation.fresh_deps,
      file_fingerprint,
      node.command.as_ref().map(|c| c.source().to_string()),
    );
    meta.timings = Some(diagnostics.timings);
    meta.warnings = diagnostics.warnings;
    meta.messages = diagnostics.messages;
    meta.store(self.backend.as_ref(), node_id)?;
    inventory.record(namespace::META, node_id);

    info!(node_id = %node_id, reason = %reason, "node built");
    state.current.insert(node_id.to_string(), observation.closure);
    state.values.insert(node_id.to_string(), value);
    state
      .statuses
      .insert(node_id.to_string(), NodeStatus::Built { reason });
    Ok(())
  }

  /// Record a node failure and propagate it to every descendant.
  ///
  /// Diagnostics come from the final attempt; the last-good success fields
  /// in the metadata are left untouched.
  fn fail_node(
    &self,
    graph: &Graph,
    state: &mut RunState,
    node_id: &str,
    message: String,
    attempt: Option<(Diagnostics, Option<Metadata>)>,
    inventory: &Inventory,
  ) -> Result<(), EngineError> {
    let mut meta = match &attempt {
      Some((_, prior)) => prior.clone().unwrap_or_default(),
      None => Metadata::load(self.backend.as_ref(), node_id)?.unwrap_or_default(),
    };
    match attempt {
      Some((diagnostics, _)) => {
        meta.error = diagnostics.error.clone().or(Some(message.clone()));
        meta.warnings = diagnostics.warnings;
        meta.messages = diagnostics.messages;
        meta.timings = Some(diagnostics.timings);
      }
      None => {
        meta.error = Some(message.clone());
      }
    }
    meta.store(self.backend.as_ref(), node_id)?;
    inventory.record(namespace::META, node_id);

    error!(node_id = %node_id, error = %message, "node failed");
    state
      .statuses
      .insert(node_id.to_string(), NodeStatus::Failed { error: message.clone() });
    for descendant in graph.descendants(node_id) {
      state
        .statuses
        .entry(descendant)
        .or_insert_with(|| NodeStatus::UpstreamFailed {
          upstream: node_id.to_string(),
        });
    }

    if self.config.fail_fast {
      return Err(EngineError::NodeFailed {
        node_id: node_id.to_string(),
        error: message,
      });
    }
    Ok(())
  }

  fn put_kernel(
    &self,
    node_id: &str,
    closure: &FingerprintPair,
    inventory: &Inventory,
  ) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(closure).map_err(|e| CacheError::Serialization {
      context: format!("kernel of '{node_id}'"),
      source: e,
    })?;
    self.backend.put(namespace::KERNELS, node_id, &bytes)?;
    inventory.record(namespace::KERNELS, node_id);
    Ok(())
  }
}

/// Nodes with no status yet whose predecessors are all resolved.
fn find_ready(plan: &Plan, graph: &Graph, state: &RunState) -> Vec<String> {
  plan
    .ids()
    .iter()
    .filter(|id| !state.statuses.contains_key(*id))
    .filter(|id| {
      graph.upstream(id).iter().all(|up| {
        matches!(
          state.statuses.get(up),
          Some(NodeStatus::Built { .. } | NodeStatus::Skipped)
        )
      })
    })
    .cloned()
    .collect()
}

/// The value an import contributes to downstream commands.
fn import_value(node: &Node) -> serde_json::Value {
  match &node.kind {
    NodeKind::ImportValue(value) => value.clone(),
    NodeKind::ImportFile(path) => serde_json::Value::String(path.display().to_string()),
    NodeKind::ImportFunction { .. } | NodeKind::Target => serde_json::Value::Null,
  }
}
