// SPDX-License-Identifier: MIT OR Apache-2.0
//! Least-privilege permission matrix: the operation classes a sandbox
//! worker is allowed to perform, derived from a capability's
//! [`PermissionTier`].

use crate::capability::PermissionTier;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A coarse operation class a sandboxed tool call may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Reading from the filesystem.
    Read,
    /// Writing to the filesystem.
    Write,
    /// Outbound network access.
    Network,
    /// Reading process environment variables.
    Env,
    /// Spawning a child process.
    Process,
}

/// The set of [`OperationClass`]es permitted for one [`PermissionTier`].
/// A worker that attempts an operation outside this set is denied before
/// the call reaches the sandboxed tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PermissionMatrix {
    /// The tier this matrix row was derived from.
    pub tier: PermissionTier,
    /// Operation classes permitted at this tier.
    pub allowed: Vec<OperationClass>,
}

impl PermissionMatrix {
    /// Compute the permission matrix row for a given tier. `Trusted`
    /// permits everything; lower tiers are strictly additive supersets
    /// of the tier below.
    #[must_use]
    pub fn for_tier(tier: PermissionTier) -> Self {
        use OperationClass::{Env, Network, Process, Read, Write};
        let allowed = match tier {
            PermissionTier::Minimal => vec![],
            PermissionTier::Readonly => vec![Read],
            PermissionTier::Filesystem => vec![Read, Write],
            PermissionTier::NetworkApi => vec![Read, Write, Network],
            PermissionTier::McpStandard => vec![Read, Write, Network, Env],
            PermissionTier::Trusted => vec![Read, Write, Network, Env, Process],
        };
        Self { tier, allowed }
    }

    /// Whether `class` is permitted under this matrix row.
    #[must_use]
    pub fn permits(&self, class: OperationClass) -> bool {
        self.allowed.contains(&class)
    }

    /// The allowed set for `tier` is a subset of the allowed set for
    /// every tier above it. Checked pairwise against the full ordered
    /// tier list.
    #[must_use]
    pub fn is_monotonic_with(&self, higher: &PermissionMatrix) -> bool {
        if self.tier > higher.tier {
            return higher.is_monotonic_with(self);
        }
        self.allowed.iter().all(|c| higher.allowed.contains(c))
    }
}
