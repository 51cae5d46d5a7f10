// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable data model shared by every component of the procedural-memory
//! execution core: capability identity, static structure, DAG layering,
//! workflow run state, trace spans, aliasing, dependencies, permissions,
//! and speculation.

pub mod alias;
pub mod capability;
pub mod dag;
pub mod dependency;
pub mod fqdn;
pub mod permission_matrix;
pub mod speculation;
pub mod structure;
pub mod trace;
pub mod workflow;

pub use alias::{Alias, AliasError, AliasTable};
pub use capability::{Capability, CapabilityStats, PermissionSet, PermissionTier, RecordType, RoutingTarget, Visibility};
pub use dag::{DagError, ExecutionPlan, Layer};
pub use dependency::{CompatibilityReport, DependencySet, RequirementCheck, SupportLevel, ToolRequirement};
pub use fqdn::{Fqdn, FqdnParseError};
pub use permission_matrix::{OperationClass, PermissionMatrix};
pub use speculation::{can_speculate, CacheKey, SpeculationCacheEntry, SPECULATION_SUCCESS_THRESHOLD};
pub use structure::{ArgumentValue, Coverage, Edge, EdgeKind, FieldMapping, Node, StaticStructure};
pub use trace::{SpanKind, SpanStatus, TraceSpan, TraceTree};
pub use workflow::{ApprovalDecision, GateKind, PendingGate, RunStatus, WorkflowRun};

/// Schema/wire contract version for the data model, bumped whenever a
/// breaking change is made to any serialized type in this crate.
pub const CONTRACT_VERSION: u32 = 1;
