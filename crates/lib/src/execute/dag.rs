//! Stage DAG.
//!
//! Validates stage declarations and groups stages into waves: every stage in
//! a wave depends only on stages in earlier waves, so a wave's members can run
//! concurrently.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::config::ConfigError;

use super::types::{StageDef, StageId};

pub struct StageDag {
  /// Edges run from dependency to dependent.
  graph: DiGraph<StageId, ()>,
  nodes: HashMap<StageId, NodeIndex>,
  /// Declaration order, used to order stages within a wave.
  order: Vec<StageId>,
}

impl StageDag {
  /// Build the DAG, rejecting duplicate ids, unknown dependencies and cycles.
  pub fn new(stages: &[StageDef]) -> Result<Self, ConfigError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    let mut order = Vec::with_capacity(stages.len());

    for stage in stages {
      if nodes.contains_key(&stage.id) {
        return Err(ConfigError::DuplicateStage(stage.id.clone()));
      }
      let idx = graph.add_node(stage.id.clone());
      nodes.insert(stage.id.clone(), idx);
      order.push(stage.id.clone());
    }

    for stage in stages {
      let dependent = nodes[&stage.id];
      let mut seen = HashSet::new();
      for dep in &stage.depends_on {
        let Some(&dependency) = nodes.get(dep) else {
          return Err(ConfigError::MissingDependency {
            stage: stage.id.clone(),
            dependency: dep.clone(),
          });
        };
        if seen.insert(dep) {
          graph.add_edge(dependency, dependent, ());
        }
      }
    }

    let dag = Self { graph, nodes, order };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), ConfigError> {
    toposort(&self.graph, None).map_err(|cycle| ConfigError::CycleDetected(self.graph[cycle.node_id()].clone()))?;
    Ok(())
  }

  /// Stages grouped into waves, each wave in declaration order.
  pub fn waves(&self) -> Vec<Vec<StageId>> {
    // Kahn's algorithm, one level at a time
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: Vec<&StageId> = self.order.iter().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let (ready, rest): (Vec<&StageId>, Vec<&StageId>) =
        remaining.into_iter().partition(|id| in_degree[&self.nodes[*id]] == 0);

      // unreachable for a verified DAG
      if ready.is_empty() {
        break;
      }

      for id in &ready {
        for neighbor in self.graph.neighbors_directed(self.nodes[*id], Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      waves.push(ready.into_iter().cloned().collect());
      remaining = rest;
    }

    waves
  }

  /// Direct dependencies of `id`, in declaration order.
  pub fn dependencies(&self, id: &str) -> Vec<StageId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let deps: HashSet<&StageId> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| &self.graph[dep])
      .collect();
    self.order.iter().filter(|id| deps.contains(id)).cloned().collect()
  }

  pub fn stage_count(&self) -> usize {
    self.order.len()
  }
}
