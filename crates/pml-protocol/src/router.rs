// SPDX-License-Identifier: MIT OR Apache-2.0
//! Message routing for dispatching envelopes to named destinations on
//! the host side of the sandbox bridge (e.g. the RPC proxy vs. the
//! trace sink).

use serde::{Deserialize, Serialize};

use crate::{envelope_type, Envelope};

/// A single routing rule mapping a pattern to a destination handler.
///
/// `pattern` matches the envelope's wire type tag (`rpc_call`, `trace`,
/// `final`, ...). Higher `priority` values are evaluated first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRoute {
    /// Matching pattern: an envelope type tag.
    pub pattern: String,
    /// Target handler name.
    pub destination: String,
    /// Higher values are evaluated first.
    pub priority: u32,
}

/// The result of successfully routing a single envelope.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The route that matched.
    pub route: MessageRoute,
    /// The envelope that was matched.
    pub envelope: Envelope,
}

/// Dispatches envelopes to destinations based on a prioritized set of
/// routes.
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    routes: Vec<MessageRoute>,
}

impl MessageRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new route, keeping the route list sorted by descending
    /// priority so [`Self::route`] always returns the highest-priority
    /// match.
    pub fn add_route(&mut self, route: MessageRoute) {
        self.routes.push(route);
        self.routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Route one envelope to the highest-priority matching destination.
    #[must_use]
    pub fn route(&self, envelope: Envelope) -> Option<RouteMatch> {
        let t = envelope_type(&envelope);
        self.routes.iter().find(|r| r.pattern == t).cloned().map(|route| RouteMatch { route, envelope })
    }
}
