// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace spans: the `parentTraceId` hierarchy recorded for every task,
//! capability call, and sandboxed RPC.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work a [`TraceSpan`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A top-level workflow run.
    Workflow,
    /// One DAG node's execution.
    Task,
    /// A nested call into another capability.
    CapabilityCall,
    /// A single sandboxed tool RPC.
    ToolCall,
}

/// Terminal or in-flight status of a [`TraceSpan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Still running.
    InProgress,
    /// Finished without error.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Skipped because a dependency branch was not taken or a tool was
    /// unavailable and the requirement was optional.
    Skipped,
}

/// One span in the execution trace tree. Spans form a tree via
/// `parent_trace_id`, rooted at the workflow's own span (`parent_trace_id
/// == None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceSpan {
    /// This span's id.
    pub trace_id: Uuid,
    /// The enclosing span's id, or `None` for the workflow root span.
    pub parent_trace_id: Option<Uuid>,
    /// The node id (from a [`crate::structure::StaticStructure`]) this
    /// span corresponds to, if any.
    pub node_id: Option<String>,
    /// What kind of work this span records.
    pub kind: SpanKind,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span finished, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: SpanStatus,
    /// Sanitized, resolved arguments this span ran with (never raw
    /// secrets; redaction happens before a span is recorded).
    pub arguments: serde_json::Value,
    /// Sanitized result value, once `status` is terminal.
    pub result: Option<serde_json::Value>,
}

impl TraceSpan {
    /// Start a new in-progress span.
    #[must_use]
    pub fn start(trace_id: Uuid, parent_trace_id: Option<Uuid>, node_id: Option<String>, kind: SpanKind, started_at: DateTime<Utc>, arguments: serde_json::Value) -> Self {
        Self { trace_id, parent_trace_id, node_id, kind, started_at, ended_at: None, status: SpanStatus::InProgress, arguments, result: None }
    }

    /// Mark the span finished.
    pub fn finish(&mut self, ended_at: DateTime<Utc>, status: SpanStatus, result: Option<serde_json::Value>) {
        self.ended_at = Some(ended_at);
        self.status = status;
        self.result = result;
    }

    /// Whether this span has reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// A full trace tree for one workflow run: the root span plus all
/// descendants, in start order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceTree {
    /// All spans recorded for this run, including the root.
    pub spans: Vec<TraceSpan>,
}

impl TraceTree {
    /// An empty trace tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct children of `trace_id`.
    #[must_use]
    pub fn children_of(&self, trace_id: Uuid) -> Vec<&TraceSpan> {
        self.spans.iter().filter(|s| s.parent_trace_id == Some(trace_id)).collect()
    }

    /// The root span (no parent), if present.
    #[must_use]
    pub fn root(&self) -> Option<&TraceSpan> {
        self.spans.iter().find(|s| s.parent_trace_id.is_none())
    }

    /// Every non-terminal span whose parent is
    /// terminal would leave an incomplete checkpoint; a checkpoint is
    /// complete only when every span is either terminal or has no
    /// terminal ancestor left dangling above it. In practice this
    /// reduces to: if the root is terminal, every span must be terminal.
    #[must_use]
    pub fn checkpoint_is_complete(&self) -> bool {
        match self.root() {
            Some(root) if root.is_terminal() => self.spans.iter().all(TraceSpan::is_terminal),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace_id: Uuid, parent: Option<Uuid>, status: SpanStatus, terminal: bool) -> TraceSpan {
        let now = Utc::now();
        TraceSpan {
            trace_id,
            parent_trace_id: parent,
            node_id: None,
            kind: SpanKind::Task,
            started_at: now,
            ended_at: if terminal { Some(now) } else { None },
            status,
            arguments: serde_json::json!({}),
            result: None,
        }
    }

    #[test]
    fn children_of_filters_by_parent() {
        let root_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let tree = TraceTree {
            spans: vec![span(root_id, None, SpanStatus::InProgress, false), span(child_id, Some(root_id), SpanStatus::InProgress, false)],
        };
        assert_eq!(tree.children_of(root_id).len(), 1);
        assert_eq!(tree.root().unwrap().trace_id, root_id);
    }

    #[test]
    fn checkpoint_incomplete_when_root_done_but_child_pending() {
        let root_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let tree = TraceTree {
            spans: vec![span(root_id, None, SpanStatus::Succeeded, true), span(child_id, Some(root_id), SpanStatus::InProgress, false)],
        };
        assert!(!tree.checkpoint_is_complete());
    }

    #[test]
    fn checkpoint_complete_when_all_terminal() {
        let root_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let tree = TraceTree {
            spans: vec![span(root_id, None, SpanStatus::Succeeded, true), span(child_id, Some(root_id), SpanStatus::Succeeded, true)],
        };
        assert!(tree.checkpoint_is_complete());
    }

    #[test]
    fn checkpoint_trivially_complete_with_no_root() {
        assert!(TraceTree::new().checkpoint_is_complete());
    }

    #[test]
    fn finish_sets_terminal_fields() {
        let mut s = span(Uuid::new_v4(), None, SpanStatus::InProgress, false);
        assert!(!s.is_terminal());
        s.finish(Utc::now(), SpanStatus::Succeeded, Some(serde_json::json!({"ok": true})));
        assert!(s.is_terminal());
        assert_eq!(s.status, SpanStatus::Succeeded);
    }
}
