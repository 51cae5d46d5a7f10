// SPDX-License-Identifier: MIT OR Apache-2.0
//! Permission enforcement for RPC calls a worker proxies back to the
//! host, against the capability's [`PermissionMatrix`].

use pml_core::{OperationClass, PermissionMatrix};

/// Classifies a `server:action` tool id into the [`OperationClass`] it
/// performs, so the host can check it against the active
/// [`PermissionMatrix`] before the tool is actually invoked.
pub trait ToolClassifier: Send + Sync {
    /// The operation class `tool_id` performs.
    fn classify(&self, tool_id: &str) -> OperationClass;
}

/// A [`ToolClassifier`] driven by a static prefix table, the common
/// case: tool servers group related actions under one prefix
/// (`fs:`, `net:`, `proc:`, ...).
#[derive(Debug, Clone)]
pub struct PrefixClassifier {
    rules: Vec<(String, OperationClass)>,
    default: OperationClass,
}

impl PrefixClassifier {
    /// Build a classifier with a fallback class for unmatched tool ids.
    #[must_use]
    pub fn new(default: OperationClass) -> Self {
        Self { rules: Vec::new(), default }
    }

    /// Register a `prefix -> class` rule. Rules are checked in
    /// registration order; the first matching prefix wins.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>, class: OperationClass) -> Self {
        self.rules.push((prefix.into(), class));
        self
    }
}

impl ToolClassifier for PrefixClassifier {
    fn classify(&self, tool_id: &str) -> OperationClass {
        self.rules.iter().find(|(prefix, _)| tool_id.starts_with(prefix.as_str())).map_or(self.default, |(_, class)| *class)
    }
}

/// Check whether `tool_id` is permitted under `matrix`, consulting
/// `classifier` to determine its operation class.
#[must_use]
pub fn is_permitted(matrix: &PermissionMatrix, classifier: &dyn ToolClassifier, tool_id: &str) -> bool {
    matrix.permits(classifier.classify(tool_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pml_core::PermissionTier;

    fn default_classifier() -> PrefixClassifier {
        PrefixClassifier::new(OperationClass::Process).with_prefix("fs:read", OperationClass::Read).with_prefix("fs:", OperationClass::Write).with_prefix("net:", OperationClass::Network)
    }

    #[test]
    fn classifies_by_longest_relevant_prefix_match() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify("fs:read_json"), OperationClass::Read);
        assert_eq!(classifier.classify("fs:write"), OperationClass::Write);
        assert_eq!(classifier.classify("net:fetch"), OperationClass::Network);
    }

    #[test]
    fn unmatched_tool_falls_back_to_default() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify("proc:spawn"), OperationClass::Process);
    }

    #[test]
    fn readonly_tier_permits_read_but_not_write() {
        let matrix = PermissionMatrix::for_tier(PermissionTier::Readonly);
        let classifier = default_classifier();
        assert!(is_permitted(&matrix, &classifier, "fs:read_json"));
        assert!(!is_permitted(&matrix, &classifier, "fs:write"));
    }

    #[test]
    fn minimal_tier_denies_everything() {
        let matrix = PermissionMatrix::for_tier(PermissionTier::Minimal);
        let classifier = default_classifier();
        assert!(!is_permitted(&matrix, &classifier, "fs:read_json"));
    }
}
