// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Speculator: TTL-cached, safety-gated speculative execution of
//! side-effect-free, reliable capabilities.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use pml_core::{can_speculate, CacheKey, Capability, SpeculationCacheEntry};
use std::sync::Arc;
use std::time::Duration;

/// Default TTL applied to a freshly stored speculation, absent a
/// capability-specific override.
pub const DEFAULT_TTL_SECONDS: u64 = 30;

/// Runs a capability speculatively, outside the request path that
/// actually needs its result. Implemented by `pml-executor` so this
/// crate never depends on the executor (avoiding a dependency cycle).
#[async_trait]
pub trait SpeculativeRunner: Send + Sync {
    /// Execute `capability` with `arguments`, returning its result.
    async fn run_speculatively(&self, capability: &Capability, arguments: &serde_json::Value) -> Result<serde_json::Value, String>;
}

/// A concurrent, TTL-evicting cache of speculative results, keyed by
/// `(fqdn, args_hash)`.
#[derive(Clone)]
pub struct SpeculationCache {
    entries: Arc<DashMap<CacheKey, SpeculationCacheEntry>>,
}

impl SpeculationCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()) }
    }

    /// Look up a still-valid cached result for `key`, evicting it first
    /// if its TTL has expired.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = Utc::now();
        let hit = self.entries.get(key).filter(|entry| entry.is_valid_at(now)).map(|entry| entry.result.clone());
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    /// Store a speculative result under `key` with the given TTL.
    pub fn put(&self, key: CacheKey, result: serde_json::Value, ttl: Duration) {
        self.entries.insert(key, SpeculationCacheEntry { result, computed_at: Utc::now(), ttl_seconds: ttl.as_secs() });
    }

    /// Number of entries currently cached, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SpeculationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the safety predicate and the cache together: if
/// `capability` is eligible and `arguments` is not already cached, run
/// it speculatively via `runner` and cache the result. No-side-effect
/// safety holds because [`can_speculate`] only admits capabilities with
/// no observable side effects.
pub async fn speculate(cache: &SpeculationCache, capability: &Capability, arguments: &serde_json::Value, runner: &dyn SpeculativeRunner) {
    if !can_speculate(capability) {
        return;
    }
    let key = CacheKey::new(capability.fqdn.to_string(), arguments);
    if cache.get(&key).is_some() {
        return;
    }
    match runner.run_speculatively(capability, arguments).await {
        Ok(result) => cache.put(key, result, Duration::from_secs(DEFAULT_TTL_SECONDS)),
        Err(error) => tracing::debug!(target: "pml.speculator", fqdn = %capability.fqdn, %error, "speculative run failed, not caching"),
    }
}
