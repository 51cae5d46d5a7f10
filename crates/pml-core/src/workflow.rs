// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workflow run state: the Controlled DAG Executor's view of one
//! in-flight `execute`/`continue_workflow` session.

use crate::dag::ExecutionPlan;
use crate::trace::TraceTree;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who must approve before a gated node resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Human-in-the-loop: requires an interactive approval response.
    Hil,
    /// Agent-in-the-loop: requires a calling agent's approval response.
    Ail,
}

/// A decision recorded for one HIL/AIL approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Approved once.
    Allow,
    /// Approved for this and all future identical gates in the run.
    AllowAlways,
    /// Rejected; the run is aborted.
    Deny,
}

/// A paused gate awaiting an approval response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingGate {
    /// The node id this gate blocks.
    pub node_id: String,
    /// Which kind of approval is required.
    pub kind: GateKind,
    /// When the gate was opened.
    pub opened_at: DateTime<Utc>,
}

/// Overall status of a [`WorkflowRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Actively executing layers.
    Running,
    /// Paused at a HIL or AIL gate.
    AwaitingApproval,
    /// Paused by an explicit `pause` call.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with a fatal error.
    Failed,
    /// Cancelled by caller or cascading cancellation.
    Cancelled,
}

/// One in-flight (or completed) workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowRun {
    /// Unique id for this run.
    pub run_id: Uuid,
    /// FQDN string of the capability being executed, or a synthetic id
    /// for ad hoc (non-capability) executions.
    pub capability_fqdn: Option<String>,
    /// The layered plan being executed.
    pub plan: ExecutionPlan,
    /// Index of the next layer to execute.
    pub next_layer: usize,
    /// Current status.
    pub status: RunStatus,
    /// The gate currently blocking progress, if `status` is
    /// `AwaitingApproval`.
    pub pending_gate: Option<PendingGate>,
    /// Node ids whose HIL/AIL gate was approved with `AllowAlways`,
    /// exempting later occurrences in this run from re-prompting.
    pub always_allowed_nodes: Vec<String>,
    /// The trace tree accumulated so far.
    pub trace: TraceTree,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Start a new run at layer 0.
    #[must_use]
    pub fn new(run_id: Uuid, capability_fqdn: Option<String>, plan: ExecutionPlan, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            capability_fqdn,
            plan,
            next_layer: 0,
            status: RunStatus::Running,
            pending_gate: None,
            always_allowed_nodes: Vec::new(),
            trace: TraceTree::new(),
            started_at,
        }
    }

    /// Whether every layer has been executed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_layer >= self.plan.layers.len()
    }

    /// Open a gate, moving the run to `AwaitingApproval` unless the node
    /// was previously granted `AllowAlways`.
    pub fn request_gate(&mut self, node_id: impl Into<String>, kind: GateKind, now: DateTime<Utc>) {
        let node_id = node_id.into();
        if self.always_allowed_nodes.iter().any(|n| n == &node_id) {
            return;
        }
        self.pending_gate = Some(PendingGate { node_id, kind, opened_at: now });
        self.status = RunStatus::AwaitingApproval;
    }

    /// Resolve the pending gate with `decision`. Returns `false` if there
    /// was no pending gate.
    pub fn resolve_gate(&mut self, decision: ApprovalDecision) -> bool {
        let Some(gate) = self.pending_gate.take() else {
            return false;
        };
        match decision {
            ApprovalDecision::Allow => {
                self.status = RunStatus::Running;
            }
            ApprovalDecision::AllowAlways => {
                self.always_allowed_nodes.push(gate.node_id);
                self.status = RunStatus::Running;
            }
            ApprovalDecision::Deny => {
                self.status = RunStatus::Cancelled;
            }
        }
        true
    }

    /// Advance to the next layer after the current one completes.
    pub fn advance_layer(&mut self) {
        self.next_layer += 1;
        if self.is_complete() {
            self.status = RunStatus::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_run() -> WorkflowRun {
        let plan = ExecutionPlan { layers: vec![vec!["a".into()], vec!["b".into()]] };
        WorkflowRun::new(Uuid::new_v4(), Some("local.default.fs.read_json.ab12".into()), plan, Utc::now())
    }

    #[test]
    fn fresh_run_is_running_and_incomplete() {
        let run = new_run();
        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.is_complete());
    }

    #[test]
    fn gate_pauses_run_until_resolved() {
        let mut run = new_run();
        run.request_gate("a", GateKind::Hil, Utc::now());
        assert_eq!(run.status, RunStatus::AwaitingApproval);
        assert!(run.resolve_gate(ApprovalDecision::Allow));
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn allow_always_exempts_future_identical_gate() {
        let mut run = new_run();
        run.request_gate("a", GateKind::Hil, Utc::now());
        run.resolve_gate(ApprovalDecision::AllowAlways);
        run.request_gate("a", GateKind::Hil, Utc::now());
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.pending_gate.is_none());
    }

    #[test]
    fn deny_cancels_run() {
        let mut run = new_run();
        run.request_gate("a", GateKind::Hil, Utc::now());
        run.resolve_gate(ApprovalDecision::Deny);
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[test]
    fn advancing_past_last_layer_completes_run() {
        let mut run = new_run();
        run.advance_layer();
        assert!(!run.is_complete());
        run.advance_layer();
        assert!(run.is_complete());
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn resolve_gate_without_pending_returns_false() {
        let mut run = new_run();
        assert!(!run.resolve_gate(ApprovalDecision::Allow));
    }
}
