// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool/capability catalog consulted while walking an AST: what
//! `server:action` ids and capability fqdns exist, their input/output
//! schemas, and their inferred permission tier and routing.

use pml_core::{PermissionTier, RoutingTarget};
use std::collections::BTreeMap;

/// Coarse value type backing a catalog key, used to decide whether a
/// `provides` edge's field mapping is type-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// Type could not be pinned, or deliberately accepts anything.
    Any,
}

impl FieldType {
    /// `true` iff a value of type `self` may flow into a field typed `to`:
    /// identical types match; `string`/`object` widen to `any`; `number`
    /// narrows to `string`. Every other pairing is incompatible.
    #[must_use]
    pub fn compatible_with(self, to: FieldType) -> bool {
        if self == to || to == FieldType::Any {
            return true;
        }
        matches!((self, to), (FieldType::Number, FieldType::String))
    }
}

/// One catalog entry: a tool (`server:action`) or a capability (fqdn
/// string), with enough schema and policy information to drive
/// `provides` edge computation and permission/routing inference.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Input keys the consumer must supply, with their inferred type.
    pub required_input_keys: BTreeMap<String, FieldType>,
    /// Input keys the consumer may optionally supply, with their inferred type.
    pub optional_input_keys: BTreeMap<String, FieldType>,
    /// Keys present on a successful result, with their inferred type.
    pub output_keys: BTreeMap<String, FieldType>,
    /// Permission tier this entry requires when used.
    pub permission_tier: PermissionTier,
    /// Where this entry's implementation runs.
    pub routing: RoutingTarget,
}

impl CatalogEntry {
    /// A permissionless, schema-free entry (the default for an unknown
    /// capability reference registered only by id).
    #[must_use]
    pub fn minimal() -> Self {
        Self { required_input_keys: BTreeMap::new(), optional_input_keys: BTreeMap::new(), output_keys: BTreeMap::new(), permission_tier: PermissionTier::Minimal, routing: RoutingTarget::Client }
    }

    /// Builder: declare required input keys and their types.
    #[must_use]
    pub fn with_required(mut self, keys: impl IntoIterator<Item = (impl Into<String>, FieldType)>) -> Self {
        self.required_input_keys = keys.into_iter().map(|(k, t)| (k.into(), t)).collect();
        self
    }

    /// Builder: declare optional input keys and their types.
    #[must_use]
    pub fn with_optional(mut self, keys: impl IntoIterator<Item = (impl Into<String>, FieldType)>) -> Self {
        self.optional_input_keys = keys.into_iter().map(|(k, t)| (k.into(), t)).collect();
        self
    }

    /// Builder: declare output keys and their types.
    #[must_use]
    pub fn with_outputs(mut self, keys: impl IntoIterator<Item = (impl Into<String>, FieldType)>) -> Self {
        self.output_keys = keys.into_iter().map(|(k, t)| (k.into(), t)).collect();
        self
    }

    /// Builder: set the permission tier.
    #[must_use]
    pub fn with_tier(mut self, tier: PermissionTier) -> Self {
        self.permission_tier = tier;
        self
    }

    /// Builder: set the routing target.
    #[must_use]
    pub fn with_routing(mut self, routing: RoutingTarget) -> Self {
        self.routing = routing;
        self
    }
}

/// The known universe of tools and capabilities an AST walk may
/// reference, keyed by `server:action` for tools and by fqdn string for
/// capabilities. Capability calls in source (`mcp.capability.<name>`)
/// are resolved through `capability_names` to their fqdn key.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    capability_names: BTreeMap<String, String>,
}

impl Catalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under `server:action`.
    #[must_use]
    pub fn with_tool(mut self, id: impl Into<String>, entry: CatalogEntry) -> Self {
        self.entries.insert(id.into(), entry);
        self
    }

    /// Register a capability under its fqdn, resolvable in source by
    /// `display_name`.
    #[must_use]
    pub fn with_capability(mut self, fqdn: impl Into<String>, display_name: impl Into<String>, entry: CatalogEntry) -> Self {
        let fqdn = fqdn.into();
        self.capability_names.insert(display_name.into(), fqdn.clone());
        self.entries.insert(fqdn, entry);
        self
    }

    /// Look up a tool id (`server:action`).
    #[must_use]
    pub fn tool(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// Resolve a capability display name to its fqdn key and entry.
    #[must_use]
    pub fn capability_by_name(&self, display_name: &str) -> Option<(&str, &CatalogEntry)> {
        let fqdn = self.capability_names.get(display_name)?;
        self.entries.get(fqdn.as_str()).map(|entry| (fqdn.as_str(), entry))
    }

    /// Look up any catalog entry (tool or capability) by its node-level
    /// key (`server:action` or fqdn string).
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    /// Whether `id` names a known tool.
    #[must_use]
    pub fn has_tool(&self, id: &str) -> bool {
        self.entries.contains_key(id) && !self.capability_names.values().any(|v| v == id)
    }
}
