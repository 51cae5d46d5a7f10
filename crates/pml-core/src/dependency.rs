// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declared tool dependencies and compatibility checking for a capability,
//! used by discovery to decide whether a capability can run in the
//! caller's current environment.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One tool a capability's static structure depends on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct ToolRequirement {
    /// `server:action` tool identifier.
    pub tool_id: String,
    /// Whether execution can proceed (skipping the dependent branch) if
    /// this tool is unavailable.
    pub optional: bool,
}

/// The full set of tools a capability's static structure references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DependencySet {
    /// Declared tool requirements, derived from `tools_used` at build time.
    pub requirements: Vec<ToolRequirement>,
}

/// Whether a single [`ToolRequirement`] is satisfied by the caller's
/// available tool set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    /// The tool is available.
    Satisfied,
    /// The tool is missing but the requirement is optional.
    MissingOptional,
    /// The tool is missing and required.
    MissingRequired,
}

/// The result of checking one [`ToolRequirement`] against an available
/// tool set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RequirementCheck {
    /// The checked requirement.
    pub tool_id: String,
    /// The support level found.
    pub level: SupportLevel,
}

/// A full compatibility report for a capability against an available
/// tool set, analogous to a capability negotiation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompatibilityReport {
    /// Per-requirement check results.
    pub checks: Vec<RequirementCheck>,
}

impl CompatibilityReport {
    /// Whether the capability can be executed as-is: no required tool is
    /// missing. Missing optional tools only prune branches at runtime.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        !self.checks.iter().any(|c| c.level == SupportLevel::MissingRequired)
    }

    /// Tool ids that are missing, required or not.
    #[must_use]
    pub fn missing_tool_ids(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.level != SupportLevel::Satisfied)
            .map(|c| c.tool_id.as_str())
            .collect()
    }
}

impl DependencySet {
    /// Build a dependency set from a capability's referenced tool ids,
    /// treating all of them as required. Callers that know a tool is only
    /// used on a conditional branch may mark individual requirements
    /// optional after construction.
    #[must_use]
    pub fn from_tool_ids(tool_ids: impl IntoIterator<Item = String>) -> Self {
        let mut seen = BTreeSet::new();
        let requirements = tool_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .map(|tool_id| ToolRequirement { tool_id, optional: false })
            .collect();
        Self { requirements }
    }

    /// Check this dependency set against the caller's available tools.
    #[must_use]
    pub fn check(&self, available: &BTreeSet<String>) -> CompatibilityReport {
        let checks = self
            .requirements
            .iter()
            .map(|req| {
                let level = if available.contains(&req.tool_id) {
                    SupportLevel::Satisfied
                } else if req.optional {
                    SupportLevel::MissingOptional
                } else {
                    SupportLevel::MissingRequired
                };
                RequirementCheck { tool_id: req.tool_id.clone(), level }
            })
            .collect();
        CompatibilityReport { checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_tool_ids_deduplicates() {
        let set = DependencySet::from_tool_ids(["fs:read".to_string(), "fs:read".to_string(), "fs:write".to_string()]);
        assert_eq!(set.requirements.len(), 2);
    }

    #[test]
    fn check_reports_satisfied_and_missing() {
        let set = DependencySet::from_tool_ids(["fs:read".to_string(), "net:fetch".to_string()]);
        let available = BTreeSet::from(["fs:read".to_string()]);
        let report = set.check(&available);
        assert!(!report.is_runnable());
        assert_eq!(report.missing_tool_ids(), vec!["net:fetch"]);
    }

    #[test]
    fn optional_missing_tool_still_runnable() {
        let mut set = DependencySet::from_tool_ids(["fs:read".to_string()]);
        set.requirements.push(ToolRequirement { tool_id: "net:fetch".into(), optional: true });
        let available = BTreeSet::from(["fs:read".to_string()]);
        let report = set.check(&available);
        assert!(report.is_runnable());
        assert_eq!(report.missing_tool_ids(), vec!["net:fetch"]);
    }

    #[test]
    fn fully_satisfied_report_has_no_missing() {
        let set = DependencySet::from_tool_ids(["fs:read".to_string()]);
        let available = BTreeSet::from(["fs:read".to_string()]);
        let report = set.check(&available);
        assert!(report.is_runnable());
        assert!(report.missing_tool_ids().is_empty());
    }
}
