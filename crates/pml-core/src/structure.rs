// SPDX-License-Identifier: MIT OR Apache-2.0
//! `StaticStructure`: the capability-intrinsic `{nodes, edges}` graph produced
//! by static analysis.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A node in a [`StaticStructure`] graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// A single tool invocation.
    Task {
        /// Node id, unique within the structure.
        id: String,
        /// `server:action` tool identifier.
        tool: String,
        /// Resolved argument specs, keyed by parameter name.
        #[serde(default)]
        arguments: std::collections::BTreeMap<String, ArgumentValue>,
        /// If true, this task's failure is recorded but does not cancel
        /// its siblings or fail the enclosing workflow.
        #[serde(default)]
        safe_to_fail: bool,
    },
    /// A call into another capability.
    Capability {
        /// Node id, unique within the structure.
        id: String,
        /// FQDN string of the referenced capability.
        capability_id: String,
    },
    /// An `if`/`switch`/ternary branch point.
    Decision {
        /// Node id, unique within the structure.
        id: String,
        /// Source-level condition expression, for observability only.
        condition: String,
    },
    /// The start of a `Promise.all`/`allSettled` parallel region.
    Fork {
        /// Node id, unique within the structure.
        id: String,
    },
    /// The end of a `Promise.all`/`allSettled` parallel region.
    Join {
        /// Node id, unique within the structure.
        id: String,
    },
}

impl Node {
    /// The node's id, regardless of variant.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Node::Task { id, .. } | Node::Capability { id, .. } | Node::Decision { id, .. } | Node::Fork { id } | Node::Join { id } => id,
        }
    }
}

/// Data-flow/control-flow coverage classification for a `provides` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Consumer's required input keys are a subset of the producer's output keys.
    Strict,
    /// Intersection with required keys is non-empty but not a superset.
    Partial,
    /// Only optional keys intersect.
    Optional,
}

/// One field-level mapping carried by a `provides` edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldMapping {
    /// Field name on the producer's output schema.
    pub from_field: String,
    /// Field name on the consumer's input schema.
    pub to_field: String,
    /// Whether the two fields' inferred types are compatible.
    pub type_compatible: bool,
}

/// The type of edge-specific payload carried by an [`Edge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeKind {
    /// A plain `await` chain ordering edge.
    Sequence,
    /// A decision branch edge, labeled with the taken outcome/case.
    Conditional {
        /// The branch outcome this edge represents (e.g. `"true"`, `"false"`, a `switch` case).
        outcome: String,
    },
    /// A data-flow edge from a producer's output schema to a consumer's input schema.
    Provides {
        /// Coverage classification of the data-flow relationship.
        coverage: Coverage,
        /// Field-level mappings backing the coverage classification.
        field_mapping: Vec<FieldMapping>,
    },
    /// A structural containment edge (e.g. a capability node containing a sub-structure).
    Contains,
}

/// A directed edge in a [`StaticStructure`] graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    /// Source node id.
    pub from: String,
    /// Destination node id.
    pub to: String,
    /// Edge-kind-specific payload.
    #[serde(flatten)]
    pub kind: EdgeKind,
}

/// A resolved argument specification attached to a [`Node::Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgumentValue {
    /// A literal JSON value taken verbatim from the source.
    Literal {
        /// The literal value.
        value: JsonValue,
    },
    /// A dotted-path reference into an earlier task's result.
    Reference {
        /// Dotted expression, e.g. `"task_0.content"`.
        expression: String,
    },
    /// A reference to a capability/workflow parameter.
    Parameter {
        /// The parameter name as it appears in `initialContext`.
        parameter_name: String,
    },
}

/// The capability-intrinsic, immutable-per-hash static structure: the
/// output of the Static Structure Builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StaticStructure {
    /// All nodes in the graph.
    pub nodes: Vec<Node>,
    /// All edges in the graph.
    pub edges: Vec<Edge>,
}

impl StaticStructure {
    /// Create an empty structure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// All `fork` node ids.
    #[must_use]
    pub fn forks(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Fork { id } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All `join` node ids.
    #[must_use]
    pub fn joins(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Join { id } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Invariant: every `fork` has a matching `join` (and vice versa).
    #[must_use]
    pub fn forks_and_joins_balanced(&self) -> bool {
        self.forks().len() == self.joins().len()
    }

    /// All outgoing `conditional` edges from a given decision node.
    #[must_use]
    pub fn conditional_edges_from(&self, decision_id: &str) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.from == decision_id && matches!(e.kind, EdgeKind::Conditional { .. }))
            .collect()
    }
}
