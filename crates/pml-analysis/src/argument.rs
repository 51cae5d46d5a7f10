// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument extraction: classify each call-site argument expression as
//! `literal`, `reference`, or `parameter`.

use pml_core::ArgumentValue;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tree_sitter::Node;

pub(crate) fn node_text(node: Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'' || first == b'`') && first == last {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Follow a chain of `member_expression`s down to its root identifier,
/// returning `[root, prop1, prop2, ...]`. Returns `None` on any
/// computed (`a[b]`) or call-expression segment, treating the access as
/// dynamic.
pub(crate) fn flatten_member_chain(node: Node, source: &[u8]) -> Option<Vec<String>> {
    match node.kind() {
        "identifier" | "this" => Some(vec![node_text(node, source)]),
        "member_expression" => {
            let object = node.child_by_field_name("object")?;
            let property = node.child_by_field_name("property")?;
            if property.kind() != "property_identifier" && property.kind() != "identifier" {
                return None;
            }
            let mut chain = flatten_member_chain(object, source)?;
            chain.push(node_text(property, source));
            Some(chain)
        }
        _ => None,
    }
}

fn classify_value(node: Node, source: &[u8], bindings: &BTreeMap<String, String>, parameter_names: &BTreeSet<String>) -> ArgumentValue {
    match node.kind() {
        "identifier" => {
            let name = node_text(node, source);
            if let Some(task_id) = bindings.get(&name) {
                ArgumentValue::Reference { expression: task_id.clone() }
            } else {
                ArgumentValue::Parameter { parameter_name: name }
            }
        }
        "member_expression" => match flatten_member_chain(node, source) {
            Some(chain) if chain.len() > 1 => {
                let root = &chain[0];
                if let Some(task_id) = bindings.get(root) {
                    ArgumentValue::Reference { expression: format!("{task_id}.{}", chain[1..].join(".")) }
                } else if parameter_names.contains(root) {
                    ArgumentValue::Parameter { parameter_name: chain[1].clone() }
                } else {
                    ArgumentValue::Literal { value: Value::String(node_text(node, source)) }
                }
            }
            _ => ArgumentValue::Literal { value: Value::String(node_text(node, source)) },
        },
        "string" | "template_string" => ArgumentValue::Literal { value: Value::String(strip_quotes(&node_text(node, source))) },
        "number" => {
            let value = node_text(node, source).parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number).unwrap_or(Value::Null);
            ArgumentValue::Literal { value }
        }
        "true" => ArgumentValue::Literal { value: Value::Bool(true) },
        "false" => ArgumentValue::Literal { value: Value::Bool(false) },
        "null" | "undefined" => ArgumentValue::Literal { value: Value::Null },
        _ => ArgumentValue::Literal { value: Value::String(node_text(node, source)) },
    }
}

/// Extract a task call's arguments. A single object-literal argument is
/// destructured into one entry per property; anything else falls back
/// to positional `arg0`, `arg1`, ... keys.
pub(crate) fn extract_arguments(args_node: Option<Node>, source: &[u8], bindings: &BTreeMap<String, String>, parameter_names: &BTreeSet<String>) -> BTreeMap<String, ArgumentValue> {
    let mut result = BTreeMap::new();
    let Some(args_node) = args_node else { return result };
    let mut cursor = args_node.walk();
    let positional: Vec<Node> = args_node.named_children(&mut cursor).collect();

    if positional.len() == 1 && positional[0].kind() == "object" {
        let mut obj_cursor = positional[0].walk();
        for entry in positional[0].named_children(&mut obj_cursor) {
            match entry.kind() {
                "pair" => {
                    let Some(key_node) = entry.child_by_field_name("key") else { continue };
                    let key = strip_quotes(&node_text(key_node, source));
                    if let Some(value_node) = entry.child_by_field_name("value") {
                        result.insert(key, classify_value(value_node, source, bindings, parameter_names));
                    }
                }
                "shorthand_property_identifier" => {
                    let name = node_text(entry, source);
                    result.insert(name, classify_value(entry, source, bindings, parameter_names));
                }
                _ => {}
            }
        }
        return result;
    }

    for (index, node) in positional.iter().enumerate() {
        result.insert(format!("arg{index}"), classify_value(*node, source, bindings, parameter_names));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> tree_sitter::Tree {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()).unwrap();
        parser.parse(code, None).unwrap()
    }

    fn find_arguments(tree: &tree_sitter::Tree) -> tree_sitter::Node<'_> {
        fn go<'a>(node: tree_sitter::Node<'a>) -> Option<tree_sitter::Node<'a>> {
            if node.kind() == "arguments" {
                return Some(node);
            }
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if let Some(found) = go(child) {
                    return Some(found);
                }
            }
            None
        }
        go(tree.root_node()).unwrap()
    }

    #[test]
    fn object_literal_argument_destructures_into_literals() {
        let code = "mcp.fs.read({path: \"a.txt\", count: 3});";
        let tree = parse(code);
        let args = find_arguments(&tree);
        let result = extract_arguments(Some(args), code.as_bytes(), &BTreeMap::new(), &BTreeSet::new());
        assert_eq!(result.get("path"), Some(&ArgumentValue::Literal { value: Value::String("a.txt".into()) }));
        assert_eq!(result.get("count"), Some(&ArgumentValue::Literal { value: Value::from(3.0) }));
    }

    #[test]
    fn member_expression_referencing_binding_becomes_reference() {
        let code = "mcp.fs.write({content: task0.content});";
        let tree = parse(code);
        let args = find_arguments(&tree);
        let mut bindings = BTreeMap::new();
        bindings.insert("task0".to_string(), "task_0".to_string());
        let result = extract_arguments(Some(args), code.as_bytes(), &bindings, &BTreeSet::new());
        assert_eq!(result.get("content"), Some(&ArgumentValue::Reference { expression: "task_0.content".into() }));
    }

    #[test]
    fn identifier_matching_known_parameter_becomes_parameter() {
        let code = "mcp.fs.write({path: filePath});";
        let tree = parse(code);
        let args = find_arguments(&tree);
        let result = extract_arguments(Some(args), code.as_bytes(), &BTreeMap::new(), &BTreeSet::new());
        assert_eq!(result.get("path"), Some(&ArgumentValue::Parameter { parameter_name: "filePath".into() }));
    }

    #[test]
    fn dynamic_member_access_falls_back_to_opaque_literal() {
        let code = "mcp[server][action]({});";
        let tree = parse(code);
        assert!(flatten_member_chain(tree.root_node().named_child(0).unwrap().named_child(0).unwrap().child_by_field_name("function").unwrap(), code.as_bytes()).is_none());
    }
}
