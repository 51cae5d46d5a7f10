// SPDX-License-Identifier: MIT OR Apache-2.0
//! Schema Inferrer: a pure function deriving a capability's
//! `input_schema`/`output_schema` from the parameter references and
//! final task found in its `StaticStructure`.

use pml_core::{ArgumentValue, Node, StaticStructure};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Collect every `parameter` argument reference anywhere in `structure`.
#[must_use]
pub fn referenced_parameters(structure: &StaticStructure) -> BTreeSet<String> {
    let mut params = BTreeSet::new();
    for node in &structure.nodes {
        if let Node::Task { arguments, .. } = node {
            for value in arguments.values() {
                if let ArgumentValue::Parameter { parameter_name } = value {
                    params.insert(parameter_name.clone());
                }
            }
        }
    }
    params
}

/// Infer a minimal JSON Schema object listing every referenced
/// parameter as an untyped, required property. Types are left open
/// (`{}`) since the AST walk alone cannot pin a parameter's type
/// without a surrounding type annotation; downstream callers that hold
/// a TypeScript type checker may refine this further.
#[must_use]
pub fn infer_input_schema(structure: &StaticStructure) -> Value {
    let params = referenced_parameters(structure);
    if params.is_empty() {
        return json!({ "type": "object" });
    }
    let properties: serde_json::Map<String, Value> = params.iter().map(|name| (name.clone(), json!({}))).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": params,
    })
}

/// Infer an output schema from the structure's terminal nodes: nodes
/// with no outgoing `sequence`/`conditional` edge are assumed to
/// produce the capability's final result. With no terminal task the
/// output shape is left opaque.
#[must_use]
pub fn infer_output_schema(structure: &StaticStructure) -> Value {
    use pml_core::EdgeKind;
    let has_successor = |id: &str| structure.edges.iter().any(|e| e.from == id && matches!(e.kind, EdgeKind::Sequence | EdgeKind::Conditional { .. }));
    let terminal_tools: Vec<&str> = structure
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Task { id, tool, .. } if !has_successor(id) => Some(tool.as_str()),
            _ => None,
        })
        .collect();
    if terminal_tools.is_empty() {
        return json!({ "type": "object" });
    }
    json!({ "type": "object", "x-terminal-tools": terminal_tools })
}
