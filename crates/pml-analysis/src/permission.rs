// SPDX-License-Identifier: MIT OR Apache-2.0
//! Permission Inferrer: a pure function from the set of
//! tools a capability's structure uses to a coarse [`PermissionSet`].

use crate::catalog::Catalog;
use pml_core::{PermissionSet, PermissionTier};
use std::collections::BTreeSet;

/// Infer the permission tier a capability needs as the maximum tier
/// across every tool it uses, with confidence derived from how many of
/// those tools the catalog actually recognizes.
#[must_use]
pub fn infer_permissions(tools_used: &BTreeSet<String>, catalog: &Catalog) -> PermissionSet {
    if tools_used.is_empty() {
        return PermissionSet::minimal();
    }
    let mut tier = PermissionTier::Minimal;
    let mut known = 0usize;
    for tool_id in tools_used {
        if let Some(entry) = catalog.entry(tool_id) {
            known += 1;
            if entry.permission_tier > tier {
                tier = entry.permission_tier;
            }
        }
    }
    let confidence = known as f64 / tools_used.len() as f64;
    PermissionSet { tier, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    #[test]
    fn no_tools_used_is_minimal_and_confident() {
        let result = infer_permissions(&BTreeSet::new(), &Catalog::new());
        assert_eq!(result.tier, PermissionTier::Minimal);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn tier_is_the_maximum_across_used_tools() {
        let catalog = Catalog::new().with_tool("fs:read", CatalogEntry::minimal().with_tier(PermissionTier::Readonly)).with_tool("fs:write", CatalogEntry::minimal().with_tier(PermissionTier::Filesystem));
        let used = BTreeSet::from(["fs:read".to_string(), "fs:write".to_string()]);
        let result = infer_permissions(&used, &catalog);
        assert_eq!(result.tier, PermissionTier::Filesystem);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn unknown_tools_lower_confidence() {
        let catalog = Catalog::new().with_tool("fs:read", CatalogEntry::minimal().with_tier(PermissionTier::Readonly));
        let used = BTreeSet::from(["fs:read".to_string(), "mystery:op".to_string()]);
        let result = infer_permissions(&used, &catalog);
        assert_eq!(result.tier, PermissionTier::Readonly);
        assert_eq!(result.confidence, 0.5);
    }
}
