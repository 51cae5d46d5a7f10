// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered-parallel execution planning over a [`StaticStructure`]:
//! turning a node/edge graph into ordered layers a Controlled DAG
//! Executor can run one layer at a time.

use crate::structure::{EdgeKind, StaticStructure};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Errors building an [`ExecutionPlan`] from a [`StaticStructure`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    /// The structure's precedence edges form a cycle, so no topological
    /// layering exists.
    #[error("static structure contains a cycle reachable from node `{0}`")]
    Cycle(String),
    /// An edge referenced a node id not present in `nodes`.
    #[error("edge references unknown node `{0}`")]
    UnknownNode(String),
}

/// One layer of node ids that can execute concurrently: every node in a
/// layer has had all of its precedence edges satisfied by an earlier
/// layer.
pub type Layer = Vec<String>;

/// A topologically layered execution plan derived from a capability's
/// static structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPlan {
    /// Layers in execution order.
    pub layers: Vec<Layer>,
}

impl ExecutionPlan {
    /// Build a plan from `structure` using Kahn's algorithm over the
    /// structure's `sequence` and `conditional` edges (precedence edges);
    /// `provides` and `contains` edges carry data/structural information
    /// only and do not constrain ordering beyond what a `sequence` or
    /// `conditional` edge already implies.
    pub fn build(structure: &StaticStructure) -> Result<Self, DagError> {
        let node_ids: BTreeSet<&str> = structure.nodes.iter().map(|n| n.id()).collect();
        let mut indegree: BTreeMap<&str, usize> = node_ids.iter().map(|id| (*id, 0)).collect();
        let mut successors: BTreeMap<&str, Vec<&str>> = node_ids.iter().map(|id| (*id, Vec::new())).collect();

        for edge in &structure.edges {
            if !matches!(edge.kind, EdgeKind::Sequence | EdgeKind::Conditional { .. }) {
                continue;
            }
            if !node_ids.contains(edge.from.as_str()) {
                return Err(DagError::UnknownNode(edge.from.clone()));
            }
            if !node_ids.contains(edge.to.as_str()) {
                return Err(DagError::UnknownNode(edge.to.clone()));
            }
            successors.get_mut(edge.from.as_str()).unwrap().push(edge.to.as_str());
            *indegree.get_mut(edge.to.as_str()).unwrap() += 1;
        }

        let mut layers = Vec::new();
        let mut remaining = indegree.clone();
        let mut emitted = 0usize;

        loop {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, &deg)| deg == 0)
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in &ready {
                remaining.remove(id);
            }
            let mut queue: VecDeque<&str> = ready.iter().copied().collect();
            while let Some(id) = queue.pop_front() {
                for succ in &successors[id] {
                    if let Some(deg) = remaining.get_mut(succ) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
            emitted += ready.len();
            let mut layer: Layer = ready.into_iter().map(str::to_string).collect();
            layer.sort();
            layers.push(layer);
        }

        if emitted != node_ids.len() {
            let stuck = remaining.keys().next().copied().unwrap_or("?");
            return Err(DagError::Cycle(stuck.to_string()));
        }

        Ok(Self { layers })
    }

    /// Holds when every precedence edge's `from` appears in an earlier
    /// (or equal-index-impossible, since a node cannot precede itself)
    /// layer than its `to`.
    #[must_use]
    pub fn respects_precedence(&self, structure: &StaticStructure) -> bool {
        let layer_of: BTreeMap<&str, usize> = self
            .layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| layer.iter().map(move |id| (id.as_str(), i)))
            .collect();
        structure.edges.iter().filter(|e| matches!(e.kind, EdgeKind::Sequence | EdgeKind::Conditional { .. })).all(|e| {
            match (layer_of.get(e.from.as_str()), layer_of.get(e.to.as_str())) {
                (Some(from_layer), Some(to_layer)) => from_layer < to_layer,
                _ => false,
            }
        })
    }

    /// Total number of nodes across all layers.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Edge, Node};

    fn linear_structure() -> StaticStructure {
        StaticStructure {
            nodes: vec![
                Node::Task { id: "a".into(), tool: "fs:read".into(), arguments: Default::default(), safe_to_fail: false },
                Node::Task { id: "b".into(), tool: "fs:write".into(), arguments: Default::default(), safe_to_fail: false },
            ],
            edges: vec![Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Sequence }],
        }
    }

    fn forked_structure() -> StaticStructure {
        StaticStructure {
            nodes: vec![
                Node::Fork { id: "fork_0".into() },
                Node::Task { id: "a".into(), tool: "fs:read".into(), arguments: Default::default(), safe_to_fail: false },
                Node::Task { id: "b".into(), tool: "net:fetch".into(), arguments: Default::default(), safe_to_fail: false },
                Node::Join { id: "join_0".into() },
            ],
            edges: vec![
                Edge { from: "fork_0".into(), to: "a".into(), kind: EdgeKind::Sequence },
                Edge { from: "fork_0".into(), to: "b".into(), kind: EdgeKind::Sequence },
                Edge { from: "a".into(), to: "join_0".into(), kind: EdgeKind::Sequence },
                Edge { from: "b".into(), to: "join_0".into(), kind: EdgeKind::Sequence },
            ],
        }
    }

    #[test]
    fn linear_structure_builds_two_layers() {
        let plan = ExecutionPlan::build(&linear_structure()).unwrap();
        assert_eq!(plan.layers, vec![vec!["a".to_string()], vec!["b".to_string()]]);
        assert!(plan.respects_precedence(&linear_structure()));
    }

    #[test]
    fn fork_join_puts_parallel_tasks_in_one_layer() {
        let structure = forked_structure();
        let plan = ExecutionPlan::build(&structure).unwrap();
        assert_eq!(plan.layers.len(), 3);
        assert_eq!(plan.layers[1], vec!["a".to_string(), "b".to_string()]);
        assert!(plan.respects_precedence(&structure));
    }

    #[test]
    fn cycle_is_rejected() {
        let structure = StaticStructure {
            nodes: vec![
                Node::Task { id: "a".into(), tool: "fs:read".into(), arguments: Default::default(), safe_to_fail: false },
                Node::Task { id: "b".into(), tool: "fs:write".into(), arguments: Default::default(), safe_to_fail: false },
            ],
            edges: vec![
                Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Sequence },
                Edge { from: "b".into(), to: "a".into(), kind: EdgeKind::Sequence },
            ],
        };
        assert!(matches!(ExecutionPlan::build(&structure), Err(DagError::Cycle(_))));
    }

    #[test]
    fn unknown_node_reference_is_rejected() {
        let structure = StaticStructure {
            nodes: vec![Node::Task { id: "a".into(), tool: "fs:read".into(), arguments: Default::default(), safe_to_fail: false }],
            edges: vec![Edge { from: "a".into(), to: "ghost".into(), kind: EdgeKind::Sequence }],
        };
        assert!(matches!(ExecutionPlan::build(&structure), Err(DagError::UnknownNode(_))));
    }

    #[test]
    fn node_count_matches_structure_size() {
        let plan = ExecutionPlan::build(&forked_structure()).unwrap();
        assert_eq!(plan.node_count(), 4);
    }
}
