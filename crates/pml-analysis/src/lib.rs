// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Static Structure Builder: turns a code string plus a tool/capability
//! catalog into a [`pml_core::StaticStructure`] and the enclosing
//! [`pml_core::Capability`] record.

mod argument;
pub mod catalog;
pub mod permission;
pub mod provides;
pub mod routing;
pub mod schema;
mod walk;

pub use catalog::{Catalog, CatalogEntry};

use chrono::{DateTime, Utc};
use pml_core::{Capability, CapabilityStats, Fqdn, Node, RecordType, StaticStructure, Visibility};
use std::collections::BTreeSet;

/// Errors from [`build`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The source could not be parsed as TypeScript; `offset` is the
    /// byte offset of the first syntax error.
    #[error("syntax error near byte offset {offset}")]
    ParseError {
        /// Byte offset of the first syntax error node.
        offset: usize,
    },
    /// A `strict`-mode build referenced a tool or capability the
    /// catalog does not recognize.
    #[error("unknown reference `{reference}` is not registered in the catalog")]
    UnknownReference {
        /// The unresolved tool id or capability display name.
        reference: String,
    },
}

/// The fqdn components a fresh capability is identified by; the hash
/// segment is always derived from `code`.
#[derive(Debug, Clone)]
pub struct FqdnSeed {
    /// Organization segment.
    pub org: String,
    /// Project segment.
    pub project: String,
    /// Namespace segment.
    pub namespace: String,
    /// Action segment.
    pub action: String,
}

/// Every capability fqdn referenced by a `Node::Capability` in
/// `structure`, for the caller to record as a `CapabilityDependency`.
#[must_use]
pub fn capability_dependencies(structure: &StaticStructure) -> BTreeSet<String> {
    structure
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Capability { capability_id, .. } => Some(capability_id.clone()),
            _ => None,
        })
        .collect()
}

/// Every tool id (`server:action`) referenced by a `Node::Task` in
/// `structure`.
#[must_use]
pub fn tools_used(structure: &StaticStructure) -> BTreeSet<String> {
    structure
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Task { tool, .. } => Some(tool.clone()),
            _ => None,
        })
        .collect()
}

/// Build a [`StaticStructure`] plus the [`Capability`] record it
/// belongs to, from `code` and the current `catalog`. In
/// `strict` mode, any tool or capability reference the catalog does not
/// recognize fails the build with [`BuildError::UnknownReference`];
/// otherwise unresolved references are treated as opaque (no node).
pub fn build(code: &str, catalog: &Catalog, seed: FqdnSeed, strict: bool, created_by: impl Into<String>, now: DateTime<Utc>) -> Result<(StaticStructure, Capability), BuildError> {
    let structure = walk::build_structure(code, catalog, strict)?;
    let used = tools_used(&structure);
    let permission_set = permission::infer_permissions(&used, catalog);
    let routing = routing::resolve_routing(&used, catalog);
    let input_schema = schema::infer_input_schema(&structure);
    let output_schema = schema::infer_output_schema(&structure);

    let display_name = seed.action.clone();
    let fqdn = Fqdn::new(seed.org, seed.project, seed.namespace, seed.action, code);
    let created_by = created_by.into();

    let capability = Capability {
        fqdn,
        display_name,
        record_type: RecordType::Capability,
        code: code.to_string(),
        input_schema,
        output_schema,
        static_structure: structure.clone(),
        tools_used: used,
        routing,
        permission_set,
        visibility: Visibility::Private,
        stats: CapabilityStats::default(),
        version: 1,
        version_tag: None,
        created_by: created_by.clone(),
        updated_by: created_by,
        created_at: now,
        updated_at: now,
    };
    Ok((structure, capability))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, FieldType};
    use pml_core::PermissionTier;

    fn catalog() -> Catalog {
        Catalog::new().with_tool("fs:read", CatalogEntry::minimal().with_outputs([("content", FieldType::String)]).with_tier(PermissionTier::Readonly)).with_tool("fs:write", CatalogEntry::minimal().with_required([("content", FieldType::String)]).with_tier(PermissionTier::Filesystem))
    }

    fn seed() -> FqdnSeed {
        FqdnSeed { org: "local".into(), project: "default".into(), namespace: "fs".into(), action: "copy_file".into() }
    }

    #[test]
    fn build_produces_capability_with_inferred_permission_and_fqdn_hash() {
        let code = "const r0 = await mcp.fs.read({path: \"a\"}); await mcp.fs.write({content: r0.content});";
        let (structure, capability) = build(code, &catalog(), seed(), false, "user_1", Utc::now()).unwrap();
        assert_eq!(structure.nodes.len(), 2);
        assert_eq!(capability.permission_set.tier, PermissionTier::Filesystem);
        assert!(capability.fqdn.matches_code(code));
        assert_eq!(capability.tools_used.len(), 2);
    }

    #[test]
    fn strict_build_surfaces_unknown_reference() {
        let code = "await mcp.ghost.op({});";
        let err = build(code, &catalog(), seed(), true, "user_1", Utc::now()).unwrap_err();
        assert!(matches!(err, BuildError::UnknownReference { .. }));
    }

    #[test]
    fn capability_dependencies_collects_referenced_fqdns() {
        let catalog = catalog().with_capability("acme.proj.cap.summarize.ab12", "summarize", CatalogEntry::minimal());
        let code = "await mcp.capability.summarize({});";
        let (structure, _) = build(code, &catalog, seed(), true, "user_1", Utc::now()).unwrap();
        let deps = capability_dependencies(&structure);
        assert!(deps.contains("acme.proj.cap.summarize.ab12"));
    }

    #[test]
    fn parse_error_reports_offset() {
        let err = build("const x = ", &catalog(), seed(), false, "user_1", Utc::now()).unwrap_err();
        assert!(matches!(err, BuildError::ParseError { .. }));
    }
}
