// SPDX-License-Identifier: MIT OR Apache-2.0
//! Speculative execution cache and safety predicate.

use crate::capability::{Capability, PermissionTier};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Minimum Bayesian success rate (see [`crate::capability::CapabilityStats::success_rate`])
/// required before a capability is eligible for speculative execution.
pub const SPECULATION_SUCCESS_THRESHOLD: f64 = 0.8;

/// Key identifying one speculative computation: a capability plus the
/// hash of the arguments it was run with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CacheKey {
    /// The speculated capability's FQDN string.
    pub fqdn: String,
    /// SHA-256 hex digest of the canonical JSON of the arguments.
    pub args_hash: String,
}

impl CacheKey {
    /// Build a cache key from an FQDN string and a canonical argument
    /// JSON value.
    #[must_use]
    pub fn new(fqdn: impl Into<String>, arguments: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(arguments.to_string().as_bytes());
        let digest = hasher.finalize();
        Self { fqdn: fqdn.into(), args_hash: format!("{digest:x}") }
    }
}

/// One cached speculative result, with the TTL it was stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpeculationCacheEntry {
    /// The speculatively computed result.
    pub result: serde_json::Value,
    /// When the speculation was computed.
    pub computed_at: DateTime<Utc>,
    /// How long the entry remains valid after `computed_at`.
    pub ttl_seconds: u64,
}

impl SpeculationCacheEntry {
    /// Whether this entry is still valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.computed_at);
        age >= chrono::Duration::zero() && age.num_seconds() < self.ttl_seconds as i64
    }
}

/// Speculation must never have an observable side effect beyond
/// populating the cache, so only capabilities whose
/// permission tier has no write/network/env/process access, and whose
/// observed reliability clears [`SPECULATION_SUCCESS_THRESHOLD`], are
/// eligible.
#[must_use]
pub fn can_speculate(capability: &Capability) -> bool {
    let side_effect_free = matches!(capability.permission_set.tier, PermissionTier::Minimal | PermissionTier::Readonly);
    side_effect_free && capability.stats.success_rate() >= SPECULATION_SUCCESS_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityStats, PermissionSet, RecordType, RoutingTarget, Visibility};
    use crate::fqdn::Fqdn;
    use crate::structure::StaticStructure;
    use std::collections::BTreeSet;

    fn capability_with(tier: PermissionTier, stats: CapabilityStats) -> Capability {
        let now = Utc::now();
        Capability {
            fqdn: Fqdn::new("local", "default", "fs", "read_json", "code"),
            display_name: "readJson".into(),
            record_type: RecordType::Capability,
            code: "code".into(),
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            static_structure: StaticStructure::new(),
            tools_used: BTreeSet::new(),
            routing: RoutingTarget::Client,
            permission_set: PermissionSet { tier, confidence: 1.0 },
            visibility: Visibility::Private,
            stats,
            version: 1,
            version_tag: None,
            created_by: "user".into(),
            updated_by: "user".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn reliable_stats() -> CapabilityStats {
        let mut stats = CapabilityStats::default();
        for _ in 0..10 {
            stats.record(true, 5);
        }
        stats
    }

    #[test]
    fn cache_key_is_deterministic() {
        let args = serde_json::json!({"path": "a.json"});
        let a = CacheKey::new("local.default.fs.read_json.ab12", &args);
        let b = CacheKey::new("local.default.fs.read_json.ab12", &args);
        assert_eq!(a, b);
    }

    #[test]
    fn different_args_differ_in_hash() {
        let a = CacheKey::new("fqdn", &serde_json::json!({"path": "a"}));
        let b = CacheKey::new("fqdn", &serde_json::json!({"path": "b"}));
        assert_ne!(a.args_hash, b.args_hash);
    }

    #[test]
    fn readonly_reliable_capability_can_speculate() {
        let cap = capability_with(PermissionTier::Readonly, reliable_stats());
        assert!(can_speculate(&cap));
    }

    #[test]
    fn write_capability_never_speculates_regardless_of_reliability() {
        let cap = capability_with(PermissionTier::Filesystem, reliable_stats());
        assert!(!can_speculate(&cap));
    }

    #[test]
    fn unreliable_readonly_capability_does_not_speculate() {
        let cap = capability_with(PermissionTier::Readonly, CapabilityStats::default());
        assert!(!can_speculate(&cap));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let entry = SpeculationCacheEntry { result: serde_json::json!(null), computed_at: Utc::now() - chrono::Duration::seconds(120), ttl_seconds: 60 };
        assert!(!entry.is_valid_at(Utc::now()));
    }

    #[test]
    fn entry_valid_within_ttl() {
        let entry = SpeculationCacheEntry { result: serde_json::json!(null), computed_at: Utc::now(), ttl_seconds: 60 };
        assert!(entry.is_valid_at(Utc::now()));
    }
}
