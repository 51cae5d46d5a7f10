// SPDX-License-Identifier: MIT OR Apache-2.0
//! Argument Resolver: a pure function of `(argSpec, initialContext,
//! context)` with no side effects.

use pml_core::ArgumentValue;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors resolving an [`ArgumentValue`] at task launch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A `parameter` argument named a key absent from `initial_context`.
    #[error("missing parameter `{0}` in initial context")]
    MissingParameter(String),
    /// A `reference` argument's dotted path did not resolve against `context`.
    #[error("unresolvable reference `{0}`")]
    Unresolvable(String),
}

fn walk_path<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, segment| match value {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve one [`ArgumentValue`] against the run's accumulated node
/// results (`context`, keyed by node id) and its `initial_context`
/// (the workflow's `initialContext`/parameters).
pub fn resolve_argument(arg: &ArgumentValue, initial_context: &Value, context: &BTreeMap<String, Value>) -> Result<Value, ResolveError> {
    match arg {
        ArgumentValue::Literal { value } => Ok(value.clone()),
        ArgumentValue::Parameter { parameter_name } => initial_context.get(parameter_name).cloned().ok_or_else(|| ResolveError::MissingParameter(parameter_name.clone())),
        ArgumentValue::Reference { expression } => {
            let mut segments = expression.split('.');
            let Some(node_id) = segments.next() else {
                return Err(ResolveError::Unresolvable(expression.clone()));
            };
            let root = context.get(node_id).ok_or_else(|| ResolveError::Unresolvable(expression.clone()))?;
            let rest: Vec<&str> = segments.collect();
            if rest.is_empty() {
                return Ok(root.clone());
            }
            walk_path(root, &rest).cloned().ok_or_else(|| ResolveError::Unresolvable(expression.clone()))
        }
    }
}

/// Resolve every entry of a task node's argument map, short-circuiting
/// on the first unresolvable argument.
pub fn resolve_arguments(args: &BTreeMap<String, ArgumentValue>, initial_context: &Value, context: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, ResolveError> {
    args.iter().map(|(key, value)| resolve_argument(value, initial_context, context).map(|resolved| (key.clone(), resolved))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_passes_through_unchanged() {
        let arg = ArgumentValue::Literal { value: json!(42) };
        assert_eq!(resolve_argument(&arg, &json!({}), &BTreeMap::new()).unwrap(), json!(42));
    }

    #[test]
    fn parameter_looks_up_initial_context() {
        let arg = ArgumentValue::Parameter { parameter_name: "path".into() };
        let initial = json!({"path": "a.txt"});
        assert_eq!(resolve_argument(&arg, &initial, &BTreeMap::new()).unwrap(), json!("a.txt"));
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let arg = ArgumentValue::Parameter { parameter_name: "ghost".into() };
        let err = resolve_argument(&arg, &json!({}), &BTreeMap::new()).unwrap_err();
        assert_eq!(err, ResolveError::MissingParameter("ghost".into()));
    }

    #[test]
    fn reference_walks_dotted_path_into_context() {
        let arg = ArgumentValue::Reference { expression: "task_0.content.text".into() };
        let mut context = BTreeMap::new();
        context.insert("task_0".to_string(), json!({"content": {"text": "hi"}}));
        assert_eq!(resolve_argument(&arg, &json!({}), &context).unwrap(), json!("hi"));
    }

    #[test]
    fn reference_to_whole_node_result_with_no_path() {
        let arg = ArgumentValue::Reference { expression: "task_0".into() };
        let mut context = BTreeMap::new();
        context.insert("task_0".to_string(), json!({"content": "x"}));
        assert_eq!(resolve_argument(&arg, &json!({}), &context).unwrap(), json!({"content": "x"}));
    }

    #[test]
    fn unresolvable_reference_is_an_error() {
        let arg = ArgumentValue::Reference { expression: "task_0.missing".into() };
        let mut context = BTreeMap::new();
        context.insert("task_0".to_string(), json!({"content": "x"}));
        assert!(resolve_argument(&arg, &json!({}), &context).is_err());
    }

    #[test]
    fn resolve_arguments_resolves_every_entry() {
        let mut args = BTreeMap::new();
        args.insert("path".to_string(), ArgumentValue::Literal { value: json!("a.txt") });
        args.insert("count".to_string(), ArgumentValue::Parameter { parameter_name: "n".into() });
        let resolved = resolve_arguments(&args, &json!({"n": 3}), &BTreeMap::new()).unwrap();
        assert_eq!(resolved.get("path"), Some(&json!("a.txt")));
        assert_eq!(resolved.get("count"), Some(&json!(3)));
    }
}
