// SPDX-License-Identifier: MIT OR Apache-2.0
//! `provides` edge synthesis: data-flow from an earlier node's output
//! schema keys to a newly emitted node's required/optional input keys.

use crate::catalog::{Catalog, CatalogEntry, FieldType};
use pml_core::{ArgumentValue, Coverage, Edge, EdgeKind, FieldMapping, Node};
use std::collections::BTreeSet;

fn catalog_key(node: &Node) -> Option<&str> {
    match node {
        Node::Task { tool, .. } => Some(tool),
        Node::Capability { capability_id, .. } => Some(capability_id),
        _ => None,
    }
}

/// The consumer's resolved `reference` arguments that name `producer_id`
/// directly, as `(argument key, referenced field path)` pairs. This is
/// ground truth for cross-name mappings (`{json: a.content}` names
/// `content` as the source for `json` regardless of what either side is
/// called), unlike the same-name fallback below.
fn reference_mappings<'a>(consumer_node: &'a Node, producer_id: &str) -> Vec<(&'a str, &'a str)> {
    let Node::Task { arguments, .. } = consumer_node else { return Vec::new() };
    arguments
        .iter()
        .filter_map(|(to_field, value)| match value {
            ArgumentValue::Reference { expression } => {
                let (ref_producer, field_path) = expression.split_once('.')?;
                (ref_producer == producer_id).then_some((to_field.as_str(), field_path))
            }
            _ => None,
        })
        .collect()
}

/// Match one producer against the consumer's still-unclaimed keys. A
/// `reference` argument naming this exact producer field is authoritative
/// (the `fs:read` `content` → `json:parse` `json` case); any required or
/// optional key left over falls back to a same-name lookup in the
/// producer's output schema.
fn match_producer(consumer_node: &Node, consumer_entry: &CatalogEntry, producer_id: &str, producer_entry: &CatalogEntry, claimed: &BTreeSet<String>) -> (Vec<FieldMapping>, usize) {
    let mut field_mapping = Vec::new();
    let mut matched_required = 0usize;

    for (to_field, from_field) in reference_mappings(consumer_node, producer_id) {
        if claimed.contains(to_field) {
            continue;
        }
        let required = consumer_entry.required_input_keys.get(to_field);
        let optional = consumer_entry.optional_input_keys.get(to_field);
        let Some(to_type) = required.or(optional) else { continue };
        let from_type = producer_entry.output_keys.get(from_field).copied().unwrap_or(FieldType::Any);
        field_mapping.push(FieldMapping { from_field: from_field.to_string(), to_field: to_field.to_string(), type_compatible: from_type.compatible_with(*to_type) });
        if required.is_some() {
            matched_required += 1;
        }
    }

    for (key, to_type) in &consumer_entry.required_input_keys {
        if claimed.contains(key) || field_mapping.iter().any(|m| &m.to_field == key) {
            continue;
        }
        if let Some(from_type) = producer_entry.output_keys.get(key) {
            field_mapping.push(FieldMapping { from_field: key.clone(), to_field: key.clone(), type_compatible: from_type.compatible_with(*to_type) });
            matched_required += 1;
        }
    }
    for (key, to_type) in &consumer_entry.optional_input_keys {
        if claimed.contains(key) || field_mapping.iter().any(|m| &m.to_field == key) {
            continue;
        }
        if let Some(from_type) = producer_entry.output_keys.get(key) {
            field_mapping.push(FieldMapping { from_field: key.clone(), to_field: key.clone(), type_compatible: from_type.compatible_with(*to_type) });
        }
    }

    (field_mapping, matched_required)
}

/// Emit `provides` edges into `earlier` nodes for the just-appended node
/// `new_id`, nearest producer first: a consumer key already claimed by a
/// nearer producer is never reassigned to a farther one.
pub fn emit_provides_edges(nodes: &[Node], edges: &mut Vec<Edge>, catalog: &Catalog, new_id: &str) {
    let Some(consumer_node) = nodes.iter().find(|n| n.id() == new_id) else { return };
    let Some(consumer_key) = catalog_key(consumer_node) else { return };
    let Some(consumer_entry) = catalog.entry(consumer_key) else { return };
    if consumer_entry.required_input_keys.is_empty() && consumer_entry.optional_input_keys.is_empty() {
        return;
    }

    let mut claimed: BTreeSet<String> = BTreeSet::new();
    for earlier in nodes.iter().rev() {
        if earlier.id() == new_id {
            continue;
        }
        let Some(producer_key) = catalog_key(earlier) else { continue };
        let Some(producer_entry) = catalog.entry(producer_key) else { continue };

        let (field_mapping, matched_required) = match_producer(consumer_node, consumer_entry, earlier.id(), producer_entry, &claimed);
        if field_mapping.is_empty() {
            continue;
        }

        let coverage = if matched_required > 0 && matched_required == consumer_entry.required_input_keys.len() {
            Coverage::Strict
        } else if matched_required > 0 {
            Coverage::Partial
        } else {
            Coverage::Optional
        };

        for mapping in &field_mapping {
            claimed.insert(mapping.to_field.clone());
        }
        edges.push(Edge { from: earlier.id().to_string(), to: new_id.to_string(), kind: EdgeKind::Provides { coverage, field_mapping } });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use std::collections::BTreeMap;

    fn task(id: &str, tool: &str) -> Node {
        Node::Task { id: id.into(), tool: tool.into(), arguments: BTreeMap::new(), safe_to_fail: false }
    }

    fn task_with_args(id: &str, tool: &str, arguments: BTreeMap<String, ArgumentValue>) -> Node {
        Node::Task { id: id.into(), tool: tool.into(), arguments, safe_to_fail: false }
    }

    #[test]
    fn strict_coverage_when_producer_covers_all_required_keys() {
        let catalog = Catalog::new().with_tool("fs:read", CatalogEntry::minimal().with_outputs([("content", FieldType::String)])).with_tool("fs:write", CatalogEntry::minimal().with_required([("content", FieldType::String)]));
        let nodes = vec![task("task_0", "fs:read"), task("task_1", "fs:write")];
        let mut edges = Vec::new();
        emit_provides_edges(&nodes, &mut edges, &catalog, "task_1");
        assert_eq!(edges.len(), 1);
        assert!(matches!(&edges[0].kind, EdgeKind::Provides { coverage: Coverage::Strict, .. }));
    }

    #[test]
    fn nearest_producer_wins_on_duplicate_keys() {
        let catalog = Catalog::new()
            .with_tool("a:x", CatalogEntry::minimal().with_outputs([("content", FieldType::String)]))
            .with_tool("b:y", CatalogEntry::minimal().with_outputs([("content", FieldType::String)]))
            .with_tool("c:z", CatalogEntry::minimal().with_required([("content", FieldType::String)]));
        let nodes = vec![task("task_0", "a:x"), task("task_1", "b:y"), task("task_2", "c:z")];
        let mut edges = Vec::new();
        emit_provides_edges(&nodes, &mut edges, &catalog, "task_2");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "task_1");
    }

    #[test]
    fn no_edge_when_no_keys_overlap() {
        let catalog = Catalog::new().with_tool("fs:read", CatalogEntry::minimal().with_outputs([("content", FieldType::String)])).with_tool("net:ping", CatalogEntry::minimal().with_required([("host", FieldType::String)]));
        let nodes = vec![task("task_0", "fs:read"), task("task_1", "net:ping")];
        let mut edges = Vec::new();
        emit_provides_edges(&nodes, &mut edges, &catalog, "task_1");
        assert!(edges.is_empty());
    }

    #[test]
    fn cross_name_field_mapping_follows_resolved_reference_argument() {
        let catalog = Catalog::new()
            .with_tool("fs:read", CatalogEntry::minimal().with_outputs([("content", FieldType::String)]))
            .with_tool("json:parse", CatalogEntry::minimal().with_required([("json", FieldType::Any), ("encoding", FieldType::String)]));
        let mut arguments = BTreeMap::new();
        arguments.insert("json".to_string(), ArgumentValue::Reference { expression: "task_0.content".into() });
        let nodes = vec![task("task_0", "fs:read"), task_with_args("task_1", "json:parse", arguments)];
        let mut edges = Vec::new();
        emit_provides_edges(&nodes, &mut edges, &catalog, "task_1");
        assert_eq!(edges.len(), 1);
        match &edges[0].kind {
            EdgeKind::Provides { coverage, field_mapping } => {
                assert_eq!(*coverage, Coverage::Partial);
                assert_eq!(field_mapping, &vec![FieldMapping { from_field: "content".into(), to_field: "json".into(), type_compatible: true }]);
            }
            other => panic!("expected a Provides edge, got {other:?}"),
        }
    }

    #[test]
    fn partial_coverage_when_only_some_required_keys_found() {
        let catalog = Catalog::new()
            .with_tool("fs:read", CatalogEntry::minimal().with_outputs([("content", FieldType::String)]))
            .with_tool("http:post", CatalogEntry::minimal().with_required([("content", FieldType::String), ("url", FieldType::String)]));
        let nodes = vec![task("task_0", "fs:read"), task("task_1", "http:post")];
        let mut edges = Vec::new();
        emit_provides_edges(&nodes, &mut edges, &catalog, "task_1");
        assert_eq!(edges.len(), 1);
        assert!(matches!(&edges[0].kind, EdgeKind::Provides { coverage: Coverage::Partial, .. }));
    }
}
