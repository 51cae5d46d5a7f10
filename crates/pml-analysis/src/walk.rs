// SPDX-License-Identifier: MIT OR Apache-2.0
//! The AST visitor itself: a `match node.kind()` walk over the
//! TypeScript grammar building a [`StaticStructure`] incrementally,
//! structured like `ConaryLabs-Mira`'s `TypeScriptParser::walk` but
//! emitting graph nodes/edges instead of indexer symbols.

use crate::argument::{extract_arguments, flatten_member_chain, node_text};
use crate::catalog::Catalog;
use crate::provides::emit_provides_edges;
use crate::BuildError;
use pml_core::{Edge, EdgeKind, Node as GraphNode, StaticStructure};
use std::collections::{BTreeMap, BTreeSet};
use tree_sitter::{Node, Parser};

const ROOT_BINDING: &str = "mcp";

struct Builder<'a> {
    catalog: &'a Catalog,
    strict: bool,
    nodes: Vec<GraphNode>,
    edges: Vec<Edge>,
    counter: usize,
    bindings: BTreeMap<String, String>,
    parameter_names: BTreeSet<String>,
    /// Depth of `Promise.allSettled` nesting; tasks built at depth > 0
    /// are tolerant of their own failure.
    allow_failure_depth: usize,
}

impl<'a> Builder<'a> {
    fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}_{}", self.counter);
        self.counter += 1;
        id
    }

    fn append(&mut self, node: GraphNode, prev: &mut Option<String>) -> String {
        let id = node.id().to_string();
        if let Some(previous) = prev.take() {
            self.edges.push(Edge { from: previous, to: id.clone(), kind: EdgeKind::Sequence });
        }
        self.nodes.push(node);
        emit_provides_edges(&self.nodes, &mut self.edges, self.catalog, &id);
        *prev = Some(id.clone());
        id
    }
}

fn find_error_offset(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_byte());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(offset) = find_error_offset(child) {
            return Some(offset);
        }
    }
    None
}

/// Walk `code` as TypeScript, producing a [`StaticStructure`].
pub(crate) fn build_structure(code: &str, catalog: &Catalog, strict: bool) -> Result<StaticStructure, BuildError> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()).map_err(|_| BuildError::ParseError { offset: 0 })?;
    let tree = parser.parse(code, None).ok_or(BuildError::ParseError { offset: 0 })?;
    if let Some(offset) = find_error_offset(tree.root_node()) {
        return Err(BuildError::ParseError { offset });
    }

    let mut builder = Builder { catalog, strict, nodes: Vec::new(), edges: Vec::new(), counter: 0, bindings: BTreeMap::new(), parameter_names: BTreeSet::new(), allow_failure_depth: 0 };
    let source = code.as_bytes();
    let mut prev = None;
    walk_statement(&mut builder, tree.root_node(), source, &mut prev)?;
    Ok(StaticStructure { nodes: builder.nodes, edges: builder.edges })
}

fn collect_parameter_names(builder: &mut Builder, params_node: Node, source: &[u8]) {
    let mut cursor = params_node.walk();
    for param in params_node.named_children(&mut cursor) {
        match param.kind() {
            "required_parameter" | "optional_parameter" => {
                if let Some(pattern) = param.child_by_field_name("pattern") {
                    collect_pattern_names(builder, pattern, source);
                }
            }
            "identifier" | "object_pattern" | "array_pattern" => collect_pattern_names(builder, param, source),
            _ => {}
        }
    }
}

fn collect_pattern_names(builder: &mut Builder, pattern: Node, source: &[u8]) {
    match pattern.kind() {
        "identifier" => {
            builder.parameter_names.insert(node_text(pattern, source));
        }
        "object_pattern" => {
            let mut cursor = pattern.walk();
            for entry in pattern.named_children(&mut cursor) {
                match entry.kind() {
                    "shorthand_property_identifier_pattern" => {
                        builder.parameter_names.insert(node_text(entry, source));
                    }
                    "pair_pattern" => {
                        if let Some(value) = entry.child_by_field_name("value") {
                            collect_pattern_names(builder, value, source);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn walk_statement(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    match node.kind() {
        "expression_statement" => {
            if let Some(expr) = node.named_child(0) {
                walk_expression(builder, expr, source, prev)?;
            }
            Ok(())
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "variable_declarator" {
                    handle_variable_declarator(builder, child, source, prev)?;
                }
            }
            Ok(())
        }
        "if_statement" => handle_if(builder, node, source, prev),
        "switch_statement" => handle_switch(builder, node, source, prev),
        "return_statement" => {
            if let Some(expr) = node.named_child(0) {
                walk_expression(builder, expr, source, prev)?;
            }
            Ok(())
        }
        "function_declaration" | "function" | "arrow_function" | "method_definition" => {
            if let Some(params) = node.child_by_field_name("parameters") {
                collect_parameter_names(builder, params, source);
            } else if node.kind() == "arrow_function" {
                if let Some(single) = node.child_by_field_name("parameter") {
                    collect_pattern_names(builder, single, source);
                }
            }
            if let Some(body) = node.child_by_field_name("body") {
                let mut inner_prev = None;
                if body.kind() == "statement_block" {
                    walk_statement(builder, body, source, &mut inner_prev)?;
                } else {
                    walk_expression(builder, body, source, &mut inner_prev)?;
                }
            }
            Ok(())
        }
        "export_statement" | "program" | "statement_block" | "try_statement" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                walk_statement(builder, child, source, prev)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn handle_variable_declarator(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    let Some(name_node) = node.child_by_field_name("name") else { return Ok(()) };
    let Some(value_node) = node.child_by_field_name("value") else { return Ok(()) };

    match name_node.kind() {
        "identifier" => {
            let var_name = node_text(name_node, source);
            let before = builder.nodes.len();
            walk_expression(builder, value_node, source, prev)?;
            if builder.nodes.len() > before {
                let emitted_id = builder.nodes[before..].last().unwrap().id().to_string();
                builder.bindings.insert(var_name, emitted_id);
            }
        }
        "object_pattern" => {
            let root_is_parameter = value_node.kind() == "identifier" && builder.parameter_names.contains(&node_text(value_node, source));
            if root_is_parameter {
                collect_pattern_names(builder, name_node, source);
            }
        }
        _ => {}
    }
    Ok(())
}

fn walk_expression(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    match node.kind() {
        "await_expression" | "parenthesized_expression" => {
            if let Some(inner) = node.named_child(0) {
                walk_expression(builder, inner, source, prev)?;
            }
            Ok(())
        }
        "call_expression" => handle_call(builder, node, source, prev),
        "ternary_expression" => handle_ternary(builder, node, source, prev),
        _ => Ok(()),
    }
}

fn handle_call(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    let Some(callee) = node.child_by_field_name("function") else { return Ok(()) };
    let args_node = node.child_by_field_name("arguments");

    let Some(chain) = flatten_member_chain(callee, source) else {
        // dynamic member access (e.g. mcp[name](...)): opaque, no node.
        return Ok(());
    };

    if chain.len() >= 2 && chain[0] == "Promise" && (chain[1] == "all" || chain[1] == "allSettled") {
        return handle_promise_all(builder, args_node, source, prev, chain[1] == "allSettled");
    }

    if chain.len() < 3 || chain[0] != ROOT_BINDING {
        return Ok(());
    }

    let arguments = extract_arguments(args_node, source, &builder.bindings, &builder.parameter_names);

    if chain[1] == "capability" {
        let display_name = &chain[2];
        match builder.catalog.capability_by_name(display_name) {
            Some((fqdn, _)) => {
                let fqdn = fqdn.to_string();
                let id = builder.next_id("cap");
                builder.append(GraphNode::Capability { id, capability_id: fqdn }, prev);
            }
            None if builder.strict => {
                return Err(BuildError::UnknownReference { reference: display_name.clone() });
            }
            None => {}
        }
        return Ok(());
    }

    let tool_id = format!("{}:{}", chain[1], chain[2]);
    if builder.catalog.tool(&tool_id).is_none() && builder.strict {
        return Err(BuildError::UnknownReference { reference: tool_id });
    }
    let id = builder.next_id("task");
    let safe_to_fail = builder.allow_failure_depth > 0;
    builder.append(GraphNode::Task { id, tool: tool_id, arguments, safe_to_fail }, prev);
    Ok(())
}

fn handle_promise_all(builder: &mut Builder, args_node: Option<Node>, source: &[u8], prev: &mut Option<String>, allow_failure: bool) -> Result<(), BuildError> {
    let Some(args_node) = args_node else { return Ok(()) };
    let mut cursor = args_node.walk();
    let Some(array_node) = args_node.named_children(&mut cursor).find(|n| n.kind() == "array") else { return Ok(()) };

    let fork_id = builder.next_id("fork");
    builder.append(GraphNode::Fork { id: fork_id.clone() }, prev);

    if allow_failure {
        builder.allow_failure_depth += 1;
    }
    let join_id = builder.next_id("join");
    let mut branch_cursor = array_node.walk();
    let mut result = Ok(());
    for element in array_node.named_children(&mut branch_cursor) {
        let mut branch_prev = Some(fork_id.clone());
        if let Err(e) = walk_expression(builder, element, source, &mut branch_prev) {
            result = Err(e);
            break;
        }
        if let Some(last) = branch_prev {
            if last != fork_id {
                builder.edges.push(Edge { from: last, to: join_id.clone(), kind: EdgeKind::Sequence });
            }
        }
    }
    if allow_failure {
        builder.allow_failure_depth -= 1;
    }
    result?;
    builder.nodes.push(GraphNode::Join { id: join_id.clone() });
    *prev = Some(join_id);
    Ok(())
}

fn handle_if(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    let condition = node.child_by_field_name("condition").map(|n| node_text(n, source)).unwrap_or_default();
    let decision_id = builder.next_id("decision");
    let id = builder.append(GraphNode::Decision { id: decision_id.clone(), condition }, prev);
    debug_assert_eq!(id, decision_id);

    if let Some(consequence) = node.child_by_field_name("consequence") {
        emit_conditional_branch(builder, source, &decision_id, consequence, "true")?;
    }
    if let Some(alternative) = node.child_by_field_name("alternative") {
        let branch = alternative.named_child(0).unwrap_or(alternative);
        emit_conditional_branch(builder, source, &decision_id, branch, "false")?;
    }
    *prev = Some(decision_id);
    Ok(())
}

fn emit_conditional_branch(builder: &mut Builder, source: &[u8], decision_id: &str, branch_node: Node, outcome: &str) -> Result<(), BuildError> {
    let before = builder.nodes.len();
    let mut branch_prev = None;
    walk_statement(builder, branch_node, source, &mut branch_prev)?;
    if let Some(first) = builder.nodes.get(before) {
        let first_id = first.id().to_string();
        builder.edges.push(Edge { from: decision_id.to_string(), to: first_id, kind: EdgeKind::Conditional { outcome: outcome.to_string() } });
    }
    Ok(())
}

fn handle_switch(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    let discriminant = node.child_by_field_name("value").map(|n| node_text(n, source)).unwrap_or_default();
    let decision_id = builder.next_id("decision");
    builder.append(GraphNode::Decision { id: decision_id.clone(), condition: discriminant }, prev);

    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for case in body.children(&mut cursor) {
            match case.kind() {
                "switch_case" => {
                    let outcome = case.child_by_field_name("value").map(|n| node_text(n, source)).unwrap_or_default();
                    emit_switch_branch(builder, source, &decision_id, case, &outcome)?;
                }
                "switch_default" => emit_switch_branch(builder, source, &decision_id, case, "default")?,
                _ => {}
            }
        }
    }
    *prev = Some(decision_id);
    Ok(())
}

fn emit_switch_branch(builder: &mut Builder, source: &[u8], decision_id: &str, case_node: Node, outcome: &str) -> Result<(), BuildError> {
    let before = builder.nodes.len();
    let mut branch_prev = None;
    let mut cursor = case_node.walk();
    for child in case_node.named_children(&mut cursor) {
        walk_statement(builder, child, source, &mut branch_prev)?;
    }
    if let Some(first) = builder.nodes.get(before) {
        let first_id = first.id().to_string();
        builder.edges.push(Edge { from: decision_id.to_string(), to: first_id, kind: EdgeKind::Conditional { outcome: outcome.to_string() } });
    }
    Ok(())
}

fn handle_ternary(builder: &mut Builder, node: Node, source: &[u8], prev: &mut Option<String>) -> Result<(), BuildError> {
    let condition = node.child_by_field_name("condition").map(|n| node_text(n, source)).unwrap_or_default();
    let decision_id = builder.next_id("decision");
    builder.append(GraphNode::Decision { id: decision_id.clone(), condition }, prev);

    if let Some(consequence) = node.child_by_field_name("consequence") {
        emit_conditional_expr_branch(builder, source, &decision_id, consequence, "true")?;
    }
    if let Some(alternative) = node.child_by_field_name("alternative") {
        emit_conditional_expr_branch(builder, source, &decision_id, alternative, "false")?;
    }
    *prev = Some(decision_id);
    Ok(())
}

fn emit_conditional_expr_branch(builder: &mut Builder, source: &[u8], decision_id: &str, branch_node: Node, outcome: &str) -> Result<(), BuildError> {
    let before = builder.nodes.len();
    let mut branch_prev = None;
    walk_expression(builder, branch_node, source, &mut branch_prev)?;
    if let Some(first) = builder.nodes.get(before) {
        let first_id = first.id().to_string();
        builder.edges.push(Edge { from: decision_id.to_string(), to: first_id, kind: EdgeKind::Conditional { outcome: outcome.to_string() } });
    }
    Ok(())
}
