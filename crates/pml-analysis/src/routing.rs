// SPDX-License-Identifier: MIT OR Apache-2.0
//! Routing Resolver: a pure function deciding whether a
//! capability's structure should be interpreted on the client or
//! delegated to a remote server implementation.

use crate::catalog::Catalog;
use pml_core::RoutingTarget;
use std::collections::BTreeSet;

/// A capability routes to `Server` if any tool it uses is itself
/// server-routed; otherwise it runs on the client.
#[must_use]
pub fn resolve_routing(tools_used: &BTreeSet<String>, catalog: &Catalog) -> RoutingTarget {
    for tool_id in tools_used {
        if let Some(entry) = catalog.entry(tool_id) {
            if entry.routing == RoutingTarget::Server {
                return RoutingTarget::Server;
            }
        }
    }
    RoutingTarget::Client
}
