// SPDX-License-Identifier: MIT OR Apache-2.0
//! Chain-free aliasing: every alias resolves in exactly one hop to a live
//! `fqdn`.

use crate::fqdn::Fqdn;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One recorded alias: a display name or previous FQDN that now resolves
/// directly to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Alias {
    /// The alias key, either a prior `display_name` or a prior `Fqdn`.
    pub from: String,
    /// The capability this alias currently resolves to.
    pub target: Fqdn,
    /// When this alias was recorded.
    pub created_at: DateTime<Utc>,
}

/// Errors raised while recording or resolving aliases.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AliasError {
    /// Adding this alias would create a chain (alias pointing at another
    /// alias's `from` key) rather than a direct resolution.
    #[error("alias `{0}` would chain through an existing alias instead of resolving directly")]
    WouldChain(String),
    /// The alias key collides with a currently live FQDN.
    #[error("alias `{0}` collides with a live fqdn")]
    CollidesWithLive(String),
}

/// An append-only, chain-free alias table for one scope (an `(org,
/// project)` pair). Renaming a capability appends an alias here rather
/// than mutating history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AliasTable {
    entries: BTreeMap<String, Alias>,
}

impl AliasTable {
    /// An empty alias table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` now resolves to `target`. If `from` was already
    /// aliased, it is repointed in place (still a single hop, never a
    /// chain) rather than appended as a new link.
    ///
    /// Returns [`AliasError::WouldChain`] if `from` is itself the target
    /// of an existing alias entry, which would make resolution take two
    /// hops.
    pub fn record(&mut self, from: impl Into<String>, target: Fqdn, now: DateTime<Utc>) -> Result<(), AliasError> {
        let from = from.into();
        if self.entries.values().any(|a| a.target.to_string() == from) {
            return Err(AliasError::WouldChain(from));
        }
        self.entries.insert(from.clone(), Alias { from, target, created_at: now });
        Ok(())
    }

    /// Resolve `key` to its current target, if aliased.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<&Fqdn> {
        self.entries.get(key).map(|a| &a.target)
    }

    /// All aliases whose `target` is `fqdn`, i.e. every name this
    /// capability is still reachable under.
    #[must_use]
    pub fn aliases_for(&self, fqdn: &Fqdn) -> Vec<&Alias> {
        self.entries.values().filter(|a| &a.target == fqdn).collect()
    }

    /// Holds when no alias entry's `from` key is itself the target of
    /// another entry (chain-freedom holds for the whole table).
    #[must_use]
    pub fn is_chain_free(&self) -> bool {
        self.entries.keys().all(|from| !self.entries.values().any(|a| &a.target.to_string() == from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fqdn(action: &str) -> Fqdn {
        Fqdn::new("local", "default", "fs", action, "code")
    }

    #[test]
    fn record_and_resolve_single_hop() {
        let mut table = AliasTable::new();
        let target = fqdn("read_json");
        table.record("readJson", target.clone(), Utc::now()).unwrap();
        assert_eq!(table.resolve("readJson"), Some(&target));
    }

    #[test]
    fn rename_repoints_rather_than_chains() {
        let mut table = AliasTable::new();
        let v1 = fqdn("read_json");
        let v2 = fqdn("read_json_v2");
        table.record("readJson", v1, Utc::now()).unwrap();
        table.record("readJson", v2.clone(), Utc::now()).unwrap();
        assert_eq!(table.resolve("readJson"), Some(&v2));
        assert!(table.is_chain_free());
    }

    #[test]
    fn rejects_alias_that_would_chain() {
        let mut table = AliasTable::new();
        let target = fqdn("read_json");
        table.record("readJson", target, Utc::now()).unwrap();
        let old_fqdn_str = fqdn("read_json").to_string();
        let err = table.record(old_fqdn_str, fqdn("read_json_v3"), Utc::now()).unwrap_err();
        assert!(matches!(err, AliasError::WouldChain(_)));
    }

    #[test]
    fn aliases_for_finds_all_names_pointing_at_target() {
        let mut table = AliasTable::new();
        let target = fqdn("read_json");
        table.record("readJson", target.clone(), Utc::now()).unwrap();
        table.record("loadJson", target.clone(), Utc::now()).unwrap();
        assert_eq!(table.aliases_for(&target).len(), 2);
    }

    #[test]
    fn empty_table_is_chain_free() {
        assert!(AliasTable::new().is_chain_free());
    }
}
