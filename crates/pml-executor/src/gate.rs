// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-layer HIL/AIL gating: a small trait with one question ("does
//! this node need a gate before it runs?") that the executor's driving
//! loop consults once per node before launch.

use pml_core::{Node, OperationClass, PermissionMatrix};

/// Decides whether a node must pause for approval before it launches.
pub trait GateStage: Send + Sync {
    /// `Some(reason)` if `node` requires a gate under `matrix`; `None` if
    /// it can launch immediately.
    fn check(&self, node: &Node, matrix: &PermissionMatrix) -> Option<GateReason>;

    /// Human-readable name used in tracing output.
    fn name(&self) -> &str;
}

/// Why a node's gate fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    /// The node's tool writes, reaches the network, or otherwise exceeds
    /// the read-only tier; a human must approve.
    ElevatedPermission,
}

/// Classifies a `server:action` tool id into the [`OperationClass`] it
/// performs, mirroring [`pml_sandbox::permission::ToolClassifier`] (the
/// executor needs its own copy of this question to gate *before* a
/// worker is even involved, not just to proxy an in-flight RPC).
pub trait ToolRiskClassifier: Send + Sync {
    /// The operation class `tool_id` performs.
    fn classify(&self, tool_id: &str) -> OperationClass;
}

/// Gates any [`Node::Task`] whose tool requires more than read-only
/// access. `Node::Task` carries no per-node approval mode of its own,
/// so "elevated permission" stands in for it (see `DESIGN.md`).
pub struct HilGateStage<C> {
    classifier: C,
}

impl<C: ToolRiskClassifier> HilGateStage<C> {
    /// Gate tasks whose tool's operation class `classifier` resolves to
    /// anything other than a read.
    #[must_use]
    pub fn new(classifier: C) -> Self {
        Self { classifier }
    }
}

impl<C: ToolRiskClassifier> GateStage for HilGateStage<C> {
    fn check(&self, node: &Node, matrix: &PermissionMatrix) -> Option<GateReason> {
        let Node::Task { tool, .. } = node else { return None };
        let class = self.classifier.classify(tool);
        if class == OperationClass::Read {
            return None;
        }
        if matrix.permits(class) {
            return None;
        }
        Some(GateReason::ElevatedPermission)
    }

    fn name(&self) -> &str {
        "hil_gate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pml_core::PermissionTier;

    struct FixedClassifier(OperationClass);
    impl ToolRiskClassifier for FixedClassifier {
        fn classify(&self, _tool_id: &str) -> OperationClass {
            self.0
        }
    }

    #[test]
    fn read_tool_never_gates() {
        let stage = HilGateStage::new(FixedClassifier(OperationClass::Read));
        let node = Node::Task { id: "t".into(), tool: "fs:read".into(), arguments: Default::default(), safe_to_fail: false };
        let matrix = PermissionMatrix::for_tier(PermissionTier::Minimal);
        assert!(stage.check(&node, &matrix).is_none());
    }

    #[test]
    fn write_tool_gates_under_minimal_matrix() {
        let stage = HilGateStage::new(FixedClassifier(OperationClass::Write));
        let node = Node::Task { id: "t".into(), tool: "fs:write".into(), arguments: Default::default(), safe_to_fail: false };
        let matrix = PermissionMatrix::for_tier(PermissionTier::Minimal);
        assert_eq!(stage.check(&node, &matrix), Some(GateReason::ElevatedPermission));
    }

    #[test]
    fn write_tool_does_not_gate_once_matrix_already_permits_it() {
        let stage = HilGateStage::new(FixedClassifier(OperationClass::Write));
        let node = Node::Task { id: "t".into(), tool: "fs:write".into(), arguments: Default::default(), safe_to_fail: false };
        let matrix = PermissionMatrix::for_tier(PermissionTier::Filesystem);
        assert!(stage.check(&node, &matrix).is_none());
    }

    #[test]
    fn non_task_nodes_never_gate() {
        let stage = HilGateStage::new(FixedClassifier(OperationClass::Write));
        let node = Node::Fork { id: "fork_0".into() };
        let matrix = PermissionMatrix::for_tier(PermissionTier::Minimal);
        assert!(stage.check(&node, &matrix).is_none());
    }
}
