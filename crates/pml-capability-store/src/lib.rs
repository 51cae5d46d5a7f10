// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Capability Store & Resolver: FQDN-keyed persistence with optimistic
//! per-row versioning and chain-free aliasing.
//!
//! Capabilities are stored one file per `fqdn` under the store root,
//! and an in-memory index (guarded by an `RwLock`) is rebuilt from disk
//! at open time and kept in sync on every mutation. This mirrors the
//! file-backed, directory-per-record persistence style the rest of the
//! ambient stack uses for receipts, without pulling in a database
//! dependency the rest of the stack doesn't otherwise need.

use chrono::Utc;
use pml_core::{Alias, AliasError, AliasTable, Capability, Fqdn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from capability store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A capability with this `display_name` already exists in scope.
    #[error("display name `{0}` already exists in this scope")]
    NameCollision(String),
    /// Recording an alias would create a chain.
    #[error(transparent)]
    Alias(#[from] AliasError),
    /// The caller's expected `version` did not match the stored version
    /// (optimistic concurrency conflict).
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict {
        /// The version the caller expected to update.
        expected: u32,
        /// The version actually stored.
        found: u32,
    },
    /// No capability exists for the given key.
    #[error("capability `{0}` not found")]
    NotFound(String),
    /// Underlying I/O error persisting or loading a record.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Underlying JSON error persisting or loading a record.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

struct Index {
    capabilities: BTreeMap<Fqdn, Capability>,
    aliases: AliasTable,
}

/// A file-backed, FQDN-keyed capability store.
pub struct CapabilityStore {
    root: PathBuf,
    index: RwLock<Index>,
}

impl CapabilityStore {
    /// Open (or create) a store rooted at `root`, loading any
    /// previously persisted capability records into the in-memory
    /// index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let mut capabilities = BTreeMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = std::fs::read_to_string(&path)?;
            let capability: Capability = serde_json::from_str(&json)?;
            capabilities.insert(capability.fqdn.clone(), capability);
        }
        Ok(Self { root, index: RwLock::new(Index { capabilities, aliases: AliasTable::new() }) })
    }

    fn record_path(&self, fqdn: &Fqdn) -> PathBuf {
        self.root.join(format!("{fqdn}.json"))
    }

    fn persist(&self, capability: &Capability) -> Result<(), StoreError> {
        let path = self.record_path(&capability.fqdn);
        let json = serde_json::to_string_pretty(capability)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Create a new capability record. Rejects the write if
    /// `display_name` collides with an existing record in the same
    /// `(org, project)` scope.
    pub fn create(&self, capability: Capability) -> Result<(), StoreError> {
        let mut index = self.index.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let collides = index.capabilities.values().any(|c| c.display_name == capability.display_name && c.fqdn.scope() == capability.fqdn.scope());
        if collides {
            return Err(StoreError::NameCollision(capability.display_name));
        }
        self.persist(&capability)?;
        index.capabilities.insert(capability.fqdn.clone(), capability);
        Ok(())
    }

    /// Fetch a capability by its current `fqdn`.
    #[must_use]
    pub fn get(&self, fqdn: &Fqdn) -> Option<Capability> {
        let index = self.index.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        index.capabilities.get(fqdn).cloned()
    }

    /// Resolve `key` (a display name or a historical FQDN string) to its
    /// live capability, following at most one alias hop.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<Capability> {
        let index = self.index.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Ok(fqdn) = key.parse::<Fqdn>() {
            if let Some(cap) = index.capabilities.get(&fqdn) {
                return Some(cap.clone());
            }
        }
        if let Some(target) = index.aliases.resolve(key) {
            return index.capabilities.get(target).cloned();
        }
        index.capabilities.values().find(|c| c.display_name == key).cloned()
    }

    /// List all capabilities in a given `(org, project)` scope.
    #[must_use]
    pub fn list_scope(&self, org: &str, project: &str) -> Vec<Capability> {
        let index = self.index.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        index.capabilities.values().filter(|c| c.fqdn.scope() == (org, project)).cloned().collect()
    }

    /// Every capability currently in the store, regardless of scope.
    /// Backs the daemon's `discover`/`search_capabilities`/`list`
    /// surface, which searches across the whole store rather than one
    /// scope at a time.
    #[must_use]
    pub fn all(&self) -> Vec<Capability> {
        let index = self.index.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        index.capabilities.values().cloned().collect()
    }

    /// Apply an update to the capability at `fqdn`, failing with
    /// [`StoreError::VersionConflict`] if `expected_version` does not
    /// match the currently stored version (optimistic concurrency).
    pub fn update(&self, fqdn: &Fqdn, expected_version: u32, updated_by: impl Into<String>, mutate: impl FnOnce(&mut Capability)) -> Result<Capability, StoreError> {
        let mut index = self.index.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let capability = index.capabilities.get_mut(fqdn).ok_or_else(|| StoreError::NotFound(fqdn.to_string()))?;
        if capability.version != expected_version {
            return Err(StoreError::VersionConflict { expected: expected_version, found: capability.version });
        }
        mutate(capability);
        capability.touch(updated_by, Utc::now());
        let snapshot = capability.clone();
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    /// Rename a capability, recording an alias so inbound lookups by
    /// the old `display_name` keep resolving.
    pub fn rename(&self, fqdn: &Fqdn, new_display_name: impl Into<String>, renamed_by: impl Into<String>) -> Result<Capability, StoreError> {
        let new_display_name = new_display_name.into();
        let mut index = self.index.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let old_name = {
            let capability = index.capabilities.get(fqdn).ok_or_else(|| StoreError::NotFound(fqdn.to_string()))?;
            capability.display_name.clone()
        };
        index.aliases.record(old_name, fqdn.clone(), Utc::now())?;
        let renamed_by = renamed_by.into();
        let capability = index.capabilities.get_mut(fqdn).ok_or_else(|| StoreError::NotFound(fqdn.to_string()))?;
        capability.display_name = new_display_name;
        capability.touch(renamed_by, Utc::now());
        let snapshot = capability.clone();
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    /// All aliases currently pointing at `fqdn`.
    #[must_use]
    pub fn aliases_for(&self, fqdn: &Fqdn) -> Vec<Alias> {
        let index = self.index.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        index.aliases.aliases_for(fqdn).into_iter().cloned().collect()
    }

    /// Remove a capability record, deleting its on-disk file. Aliases
    /// that still point at `fqdn` are left in place; they simply stop
    /// resolving to anything.
    pub fn remove(&self, fqdn: &Fqdn) -> Result<Capability, StoreError> {
        let mut index = self.index.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let capability = index.capabilities.remove(fqdn).ok_or_else(|| StoreError::NotFound(fqdn.to_string()))?;
        let path = self.record_path(fqdn);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pml_core::{CapabilityStats, PermissionSet, RecordType, RoutingTarget, StaticStructure, Visibility};
    use std::collections::BTreeSet;

    fn sample(action: &str, display_name: &str) -> Capability {
        let now = Utc::now();
        Capability {
            fqdn: Fqdn::new("local", "default", "fs", action, action),
            display_name: display_name.into(),
            record_type: RecordType::Capability,
            code: action.into(),
            input_schema: serde_json::json!({}),
            output_schema: serde_json::json!({}),
            static_structure: StaticStructure::new(),
            tools_used: BTreeSet::new(),
            routing: RoutingTarget::Client,
            permission_set: PermissionSet::minimal(),
            visibility: Visibility::Private,
            stats: CapabilityStats::default(),
            version: 1,
            version_tag: None,
            created_by: "user".into(),
            updated_by: "user".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn create_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        let cap = sample("read_json", "readJson");
        store.create(cap.clone()).unwrap();
        assert_eq!(store.get(&cap.fqdn), Some(cap));
    }

    #[test]
    fn create_rejects_display_name_collision_in_scope() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        store.create(sample("read_json", "readJson")).unwrap();
        let err = store.create(sample("read_json_2", "readJson")).unwrap_err();
        assert!(matches!(err, StoreError::NameCollision(_)));
    }

    #[test]
    fn update_rejects_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        let cap = sample("read_json", "readJson");
        store.create(cap.clone()).unwrap();
        let err = store.update(&cap.fqdn, 99, "user2", |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 99, found: 1 }));
    }

    #[test]
    fn update_bumps_version_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        let cap = sample("read_json", "readJson");
        store.create(cap.clone()).unwrap();
        let updated = store.update(&cap.fqdn, 1, "user2", |c| c.visibility = Visibility::Project).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.visibility, Visibility::Project);
    }

    #[test]
    fn rename_keeps_old_name_resolvable_via_alias() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        let cap = sample("read_json", "readJson");
        store.create(cap.clone()).unwrap();
        store.rename(&cap.fqdn, "loadJson", "user2").unwrap();
        let resolved = store.resolve("readJson").unwrap();
        assert_eq!(resolved.display_name, "loadJson");
        assert_eq!(resolved.fqdn, cap.fqdn);
    }

    #[test]
    fn reopening_store_reloads_persisted_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let cap = sample("read_json", "readJson");
        {
            let store = CapabilityStore::open(dir.path()).unwrap();
            store.create(cap.clone()).unwrap();
        }
        let reopened = CapabilityStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&cap.fqdn), Some(cap));
    }

    #[test]
    fn list_scope_filters_by_org_and_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        store.create(sample("read_json", "readJson")).unwrap();
        assert_eq!(store.list_scope("local", "default").len(), 1);
        assert_eq!(store.list_scope("other", "project").len(), 0);
    }

    #[test]
    fn remove_deletes_record_and_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        let cap = sample("read_json", "readJson");
        store.create(cap.clone()).unwrap();
        let removed = store.remove(&cap.fqdn).unwrap();
        assert_eq!(removed.fqdn, cap.fqdn);
        assert_eq!(store.get(&cap.fqdn), None);
        assert!(!dir.path().join(format!("{}.json", cap.fqdn)).exists());
    }

    #[test]
    fn remove_unknown_fqdn_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CapabilityStore::open(dir.path()).unwrap();
        let cap = sample("read_json", "readJson");
        assert!(matches!(store.remove(&cap.fqdn), Err(StoreError::NotFound(_))));
    }
}
