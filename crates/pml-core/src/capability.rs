// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `Capability` record and its supporting enums.

use crate::fqdn::Fqdn;
use crate::structure::StaticStructure;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a capability record describes a derived capability or a
/// directly-registered MCP server/tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// A capability learned from an executed workflow.
    Capability,
    /// A directly registered MCP server or tool.
    McpServer,
}

/// Where a capability's static structure is interpreted: on the client
/// (orchestrator) or delegated to a remote server implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTarget {
    /// Executed locally by the Controlled DAG Executor.
    Client,
    /// Delegated to a remote MCP server implementation.
    Server,
}

/// Coarse-grained permission tier inferred for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    /// No filesystem, network, or process access.
    Minimal,
    /// Filesystem or data reads only.
    Readonly,
    /// Filesystem writes permitted.
    Filesystem,
    /// Outbound network calls to a fixed API surface.
    NetworkApi,
    /// The full set of standard MCP tool permissions.
    McpStandard,
    /// Explicitly elevated by an operator; bypasses confidence gating.
    Trusted,
}

/// A capability's inferred permission tier, with the confidence that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PermissionSet {
    /// The inferred tier.
    pub tier: PermissionTier,
    /// Confidence in `[0.0, 1.0]` that `tier` is correct.
    pub confidence: f64,
}

impl PermissionSet {
    /// A minimal, fully-confident permission set, the safe default for a
    /// brand-new capability with no observed tool usage.
    #[must_use]
    pub fn minimal() -> Self {
        Self { tier: PermissionTier::Minimal, confidence: 1.0 }
    }
}

/// Sharing scope for a capability record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible only to the creating user.
    Private,
    /// Visible to all users of the local project.
    Project,
    /// Visible across all projects under the same org.
    Org,
    /// Visible to any caller that can resolve the FQDN.
    Public,
}

/// Running usage statistics for a capability, backing the Bayesian
/// cold-start success rate used by the Speculator's safety predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityStats {
    /// Total number of times this capability has been invoked.
    pub usage_count: u64,
    /// Number of those invocations that completed without a fatal error.
    pub success_count: u64,
    /// Sum of observed latencies across all invocations, in milliseconds.
    pub total_latency_ms: u64,
}

impl CapabilityStats {
    /// Record the outcome of one invocation.
    pub fn record(&mut self, succeeded: bool, latency_ms: u64) {
        self.usage_count += 1;
        if succeeded {
            self.success_count += 1;
        }
        self.total_latency_ms += latency_ms;
    }

    /// Mean latency across all recorded invocations, or `0` if unused.
    #[must_use]
    pub fn mean_latency_ms(&self) -> u64 {
        if self.usage_count == 0 {
            0
        } else {
            self.total_latency_ms / self.usage_count
        }
    }

    /// Bayesian cold-start success rate: below 3 observations, blend the
    /// observed rate with a neutral `0.5` prior weighted by the shortfall
    /// in observation count; at 3 or more, the plain observed rate.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        const COLD_START_THRESHOLD: u64 = 3;
        const PRIOR: f64 = 0.5;
        if self.usage_count == 0 {
            return PRIOR;
        }
        if self.usage_count >= COLD_START_THRESHOLD {
            return self.success_count as f64 / self.usage_count as f64;
        }
        let observed = self.success_count as f64 / self.usage_count as f64;
        let weight = self.usage_count as f64 / COLD_START_THRESHOLD as f64;
        observed * weight + PRIOR * (1.0 - weight)
    }
}

/// A learned or registered capability: the unit of memory in the
/// procedural-memory execution core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Capability {
    /// Immutable identity.
    pub fqdn: Fqdn,
    /// Human-readable name, unique within `fqdn.scope()`.
    pub display_name: String,
    /// Whether this is a learned capability or a registered MCP server.
    pub record_type: RecordType,
    /// The source code this capability's `fqdn` hash was computed from.
    pub code: String,
    /// JSON Schema describing accepted invocation arguments.
    pub input_schema: serde_json::Value,
    /// JSON Schema describing the invocation result shape.
    pub output_schema: serde_json::Value,
    /// The capability's static structure graph.
    pub static_structure: StaticStructure,
    /// Tool ids (`server:action`) referenced anywhere in `static_structure`.
    pub tools_used: BTreeSet<String>,
    /// Where this capability's structure is interpreted.
    pub routing: RoutingTarget,
    /// Inferred permission tier and confidence.
    pub permission_set: PermissionSet,
    /// Sharing scope.
    pub visibility: Visibility,
    /// Usage statistics.
    #[serde(default)]
    pub stats: CapabilityStats,
    /// Monotonically increasing version counter (optimistic concurrency).
    pub version: u32,
    /// Optional human-assigned version tag (e.g. `"v2-retry-fix"`).
    pub version_tag: Option<String>,
    /// User or agent id that created this record.
    pub created_by: String,
    /// User or agent id that last updated this record.
    pub updated_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Capability {
    /// Whether `tool_id` appears in this capability's static structure.
    #[must_use]
    pub fn uses_tool(&self, tool_id: &str) -> bool {
        self.tools_used.contains(tool_id)
    }

    /// Bump `version` and refresh `updated_by`/`updated_at`, as happens on
    /// every mutating store operation (rename, re-permission, stats update).
    pub fn touch(&mut self, updated_by: impl Into<String>, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_by = updated_by.into();
        self.updated_at = now;
    }
}
