// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern-based redaction applied to span arguments/results before a
//! [`pml_core::TraceTree`] is persisted or sent over `history`/`whois`.

/// Replaces every occurrence of a configured literal or key-name
/// pattern with `[REDACTED]`, recursively over a JSON value.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// Literal substrings to redact wherever they appear in a string
    /// value.
    literal_patterns: Vec<String>,
    /// Object keys whose entire value is redacted regardless of
    /// content (e.g. `"apiKey"`, `"token"`, `"authorization"`).
    sensitive_keys: Vec<String>,
}

impl Redactor {
    /// A redactor with no patterns configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a literal substring to redact in any string value.
    #[must_use]
    pub fn with_literal(mut self, pattern: impl Into<String>) -> Self {
        self.literal_patterns.push(pattern.into());
        self
    }

    /// Register an object key whose value is always fully redacted.
    #[must_use]
    pub fn with_sensitive_key(mut self, key: impl Into<String>) -> Self {
        self.sensitive_keys.push(key.into());
        self
    }

    /// The default redactor: commonly sensitive key names, no literal
    /// patterns (callers add project-specific secrets as they're
    /// discovered).
    #[must_use]
    pub fn defaults() -> Self {
        Self::new().with_sensitive_key("apiKey").with_sensitive_key("api_key").with_sensitive_key("token").with_sensitive_key("authorization").with_sensitive_key("password").with_sensitive_key("secret")
    }

    fn redact_string(&self, s: &str) -> String {
        let mut result = s.to_string();
        for pattern in &self.literal_patterns {
            if !pattern.is_empty() {
                result = result.replace(pattern.as_str(), "[REDACTED]");
            }
        }
        result
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        self.sensitive_keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Redact `value` in place, recursing into arrays and objects.
    pub fn redact_value(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) => *s = self.redact_string(s),
            serde_json::Value::Array(items) => {
                for item in items {
                    self.redact_value(item);
                }
            }
            serde_json::Value::Object(map) => {
                for (key, v) in map.iter_mut() {
                    if self.is_sensitive_key(key) {
                        *v = serde_json::Value::String("[REDACTED]".to_string());
                    } else {
                        self.redact_value(v);
                    }
                }
            }
            _ => {}
        }
    }

    /// Redact a clone of `value`, leaving the original untouched.
    #[must_use]
    pub fn redacted(&self, value: &serde_json::Value) -> serde_json::Value {
        let mut clone = value.clone();
        self.redact_value(&mut clone);
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_pattern_redacted_in_nested_strings() {
        let redactor = Redactor::new().with_literal("sk-secret-123");
        let value = json!({"headers": {"authorization_hint": "uses sk-secret-123 internally"}});
        let redacted = redactor.redacted(&value);
        assert_eq!(redacted["headers"]["authorization_hint"], json!("uses [REDACTED] internally"));
    }

    #[test]
    fn sensitive_key_fully_redacts_value_regardless_of_type() {
        let redactor = Redactor::defaults();
        let value = json!({"apiKey": "sk-live-abc", "count": 3});
        let redacted = redactor.redacted(&value);
        assert_eq!(redacted["apiKey"], json!("[REDACTED]"));
        assert_eq!(redacted["count"], json!(3));
    }

    #[test]
    fn sensitive_key_match_is_case_insensitive() {
        let redactor = Redactor::defaults();
        let value = json!({"Authorization": "Bearer xyz"});
        let redacted = redactor.redacted(&value);
        assert_eq!(redacted["Authorization"], json!("[REDACTED]"));
    }

    #[test]
    fn arrays_are_redacted_element_wise() {
        let redactor = Redactor::new().with_literal("leak");
        let value = json!(["contains leak here", "clean"]);
        let redacted = redactor.redacted(&value);
        assert_eq!(redacted, json!(["contains [REDACTED] here", "clean"]));
    }

    #[test]
    fn redacted_leaves_original_value_untouched() {
        let redactor = Redactor::new().with_literal("leak");
        let original = json!({"msg": "leak here"});
        let _ = redactor.redacted(&original);
        assert_eq!(original["msg"], json!("leak here"));
    }
}
