// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Controlled DAG Executor: drives a [`WorkflowRun`] through its
//! [`ExecutionPlan`] one layer at a time, opening HIL/AIL gates before a
//! layer launches and resuming from wherever a paused run left off.

use crate::bus::{now, EventBus, EventSubscription, WorkflowEvent};
use crate::gate::GateStage;
use crate::node_runner::NodeRunner;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use pml_capability_store::CapabilityStore;
use pml_core::{ApprovalDecision, Edge, EdgeKind, ExecutionPlan, Fqdn, GateKind, Node, PermissionMatrix, RunStatus, StaticStructure, TraceSpan, TraceTree, WorkflowRun};
use pml_dag::cancel::{CancellationReason, CancellationToken};
use pml_dag::{apply_replan, LayerRunner, LayerStep, ReplanRequest};
use pml_error::{ErrorCode, PmlError};
use pml_speculator::{speculate, SpeculationCache, SpeculativeRunner};
use pml_trace::TraceStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Inputs to [`Executor::execute`].
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// The fqdn of the capability being executed, if this run corresponds
    /// to one (absent for an ad-hoc structure handed to the executor
    /// directly, e.g. during capability learning).
    pub capability_fqdn: Option<String>,
    /// The workflow's `initialContext`, consulted by `parameter` argument
    /// references.
    pub initial_context: Value,
    /// The permission tier already granted to this run (an operator can
    /// pre-authorize a run at `Filesystem` tier, say, to avoid HIL gates
    /// for every write).
    pub permissions: PermissionMatrix,
}

/// Where a [`Executor::execute`]/`continue_workflow`/`decide`/`resume`
/// call left a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The run reached its last layer; `context` holds every node's result.
    Completed {
        /// The run id.
        run_id: Uuid,
        /// Every executed node's result, keyed by node id.
        context: BTreeMap<String, Value>,
    },
    /// A task node requires human approval before it can launch.
    AwaitingApproval {
        /// The run id.
        run_id: Uuid,
        /// The node id blocked on approval.
        node_id: String,
    },
    /// A decision node requires an external branch choice.
    AwaitingInput {
        /// The run id.
        run_id: Uuid,
        /// The decision node id.
        node_id: String,
        /// The outcomes available to choose from.
        options: Vec<String>,
    },
    /// The run was cancelled before completing.
    Cancelled {
        /// The run id.
        run_id: Uuid,
    },
}

struct RunEntry {
    run: WorkflowRun,
    structure: StaticStructure,
    initial_context: Value,
    context: BTreeMap<String, Value>,
    taken_branches: BTreeMap<String, String>,
    permissions: PermissionMatrix,
    cancel: CancellationToken,
}

/// Orchestrates layered-parallel execution of a capability's static
/// structure, proxying task nodes through a fresh sandbox worker per
/// node call and gating elevated-permission tasks and decision points
/// behind HIL/AIL approval.
pub struct Executor {
    node_runner: Arc<dyn NodeRunner>,
    gate: Arc<dyn GateStage>,
    store: Arc<CapabilityStore>,
    trace_store: Arc<TraceStore>,
    speculation: SpeculationCache,
    bus: EventBus,
    runs: DashMap<Uuid, Mutex<RunEntry>>,
}

impl Executor {
    /// Build an executor over the given node-execution, gating,
    /// capability-resolution, and trace-persistence seams.
    #[must_use]
    pub fn new(node_runner: Arc<dyn NodeRunner>, gate: Arc<dyn GateStage>, store: Arc<CapabilityStore>, trace_store: Arc<TraceStore>) -> Self {
        Self { node_runner, gate, store, trace_store, speculation: SpeculationCache::new(), bus: EventBus::new(), runs: DashMap::new() }
    }

    /// Subscribe to every run's [`WorkflowEvent`]s.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// The speculation cache backing intra-workflow `Capability` node
    /// prefetch, exposed so a daemon can report cache occupancy.
    #[must_use]
    pub fn speculation_cache(&self) -> &SpeculationCache {
        &self.speculation
    }

    /// Start a new run over `structure`.
    pub async fn execute(&self, structure: StaticStructure, options: ExecuteOptions) -> Result<ExecutionOutcome, PmlError> {
        let plan = ExecutionPlan::build(&structure).map_err(|e| PmlError::new(ErrorCode::StaticValidationError, e.to_string()))?;
        let run_id = Uuid::new_v4();
        let run = WorkflowRun::new(run_id, options.capability_fqdn.clone(), plan, Utc::now());
        let entry = RunEntry {
            run,
            structure,
            initial_context: options.initial_context,
            context: BTreeMap::new(),
            taken_branches: BTreeMap::new(),
            permissions: options.permissions,
            cancel: CancellationToken::new(),
        };
        self.runs.insert(run_id, Mutex::new(entry));
        self.bus.publish(WorkflowEvent::WorkflowStarted { run_id, capability_fqdn: options.capability_fqdn });
        self.drive(run_id).await
    }

    /// Resolve a pending HIL gate and continue driving the run.
    pub async fn continue_workflow(&self, run_id: Uuid, decision: ApprovalDecision) -> Result<ExecutionOutcome, PmlError> {
        {
            let guard = self.run_entry(run_id)?;
            let mut entry = guard.lock().await;
            if !entry.run.resolve_gate(decision) {
                return Err(PmlError::new(ErrorCode::InternalError, "no pending gate to resolve"));
            }
        }
        self.drive(run_id).await
    }

    /// Resolve a pending AIL decision point with a chosen branch
    /// outcome and continue driving the run.
    pub async fn decide(&self, run_id: Uuid, outcome: String) -> Result<ExecutionOutcome, PmlError> {
        {
            let guard = self.run_entry(run_id)?;
            let mut entry = guard.lock().await;
            let Some(pending) = entry.run.pending_gate.clone() else {
                return Err(PmlError::new(ErrorCode::InternalError, "no pending decision to resolve"));
            };
            if pending.kind != GateKind::Ail {
                return Err(PmlError::new(ErrorCode::InternalError, "pending gate is not a decision point"));
            }
            entry.taken_branches.insert(pending.node_id.clone(), outcome);
            entry.run.resolve_gate(ApprovalDecision::Allow);
        }
        self.drive(run_id).await
    }

    /// Request cancellation; takes effect at the next layer boundary.
    pub async fn cancel(&self, run_id: Uuid, reason: CancellationReason) -> Result<(), PmlError> {
        let guard = self.run_entry(run_id)?;
        let entry = guard.lock().await;
        entry.cancel.cancel(reason);
        Ok(())
    }

    /// Pause a running workflow; `resume` restarts the drive loop from
    /// wherever it left off.
    pub async fn pause(&self, run_id: Uuid) -> Result<(), PmlError> {
        let guard = self.run_entry(run_id)?;
        let mut entry = guard.lock().await;
        entry.run.status = RunStatus::Paused;
        Ok(())
    }

    /// Resume a paused workflow from its last completed layer.
    pub async fn resume(&self, run_id: Uuid) -> Result<ExecutionOutcome, PmlError> {
        {
            let guard = self.run_entry(run_id)?;
            let mut entry = guard.lock().await;
            entry.run.status = RunStatus::Running;
        }
        self.drive(run_id).await
    }

    /// Splice a freshly computed plan in after the layers already
    /// executed.
    pub async fn replan(&self, run_id: Uuid, reason: String, remaining_plan: ExecutionPlan) -> Result<(), PmlError> {
        let guard = self.run_entry(run_id)?;
        let mut entry = guard.lock().await;
        apply_replan(&mut entry.run, ReplanRequest { reason, remaining_plan }).map_err(|e| PmlError::new(ErrorCode::ReplanRejected, e.to_string()))
    }

    /// Fetch one node's already-computed result, if the run has reached it.
    pub async fn get_task_result(&self, run_id: Uuid, node_id: &str) -> Result<Option<Value>, PmlError> {
        let guard = self.run_entry(run_id)?;
        let entry = guard.lock().await;
        Ok(entry.context.get(node_id).cloned())
    }

    fn run_entry(&self, run_id: Uuid) -> Result<dashmap::mapref::one::Ref<'_, Uuid, Mutex<RunEntry>>, PmlError> {
        self.runs.get(&run_id).ok_or_else(|| PmlError::new(ErrorCode::InternalError, format!("no such run `{run_id}`")))
    }

    async fn drive(&self, run_id: Uuid) -> Result<ExecutionOutcome, PmlError> {
        let guard = self.run_entry(run_id)?;
        let mut entry = guard.lock().await;

        loop {
            let cancel = entry.cancel.clone();
            let step = LayerRunner::new(&mut entry.run, cancel).next();
            match step {
                LayerStep::Cancelled => {
                    entry.run.status = RunStatus::Cancelled;
                    self.persist_trace(run_id, &entry.run.trace);
                    self.bus.publish(WorkflowEvent::WorkflowCompleted { run_id, success: false });
                    return Ok(ExecutionOutcome::Cancelled { run_id });
                }
                LayerStep::Done => {
                    self.persist_trace(run_id, &entry.run.trace);
                    self.bus.publish(WorkflowEvent::WorkflowCompleted { run_id, success: true });
                    return Ok(ExecutionOutcome::Completed { run_id, context: entry.context.clone() });
                }
                LayerStep::Layer(layer) => {
                    let runnable: Vec<String> = layer.into_iter().filter(|id| reachable(&entry.structure, id, &entry.taken_branches)).collect();

                    if let Some(node_id) = find_pending_decision(&entry.structure, &runnable, &entry.taken_branches) {
                        let options = decision_options(&entry.structure, &node_id);
                        entry.run.request_gate(node_id.clone(), GateKind::Ail, now());
                        self.bus.publish(WorkflowEvent::AwaitingInput { run_id, node_id: node_id.clone(), options: options.clone() });
                        return Ok(ExecutionOutcome::AwaitingInput { run_id, node_id, options });
                    }

                    if let Some(node_id) = find_hil_gate(self.gate.as_ref(), &entry.structure, &runnable, &entry.permissions, &entry.run.always_allowed_nodes) {
                        entry.run.request_gate(node_id.clone(), GateKind::Hil, now());
                        self.bus.publish(WorkflowEvent::ApprovalRequired { run_id, node_id: node_id.clone() });
                        return Ok(ExecutionOutcome::AwaitingApproval { run_id, node_id });
                    }

                    self.run_layer(run_id, &mut entry, &runnable).await?;
                    entry.run.advance_layer();
                }
            }
        }
    }

    async fn run_layer(&self, run_id: Uuid, entry: &mut RunEntry, node_ids: &[String]) -> Result<(), PmlError> {
        let futures: Vec<_> = node_ids
            .iter()
            .filter_map(|node_id| entry.structure.node(node_id).map(|node| (node_id.clone(), node.clone())))
            .map(|(node_id, node)| self.run_one_node(run_id, node_id, node, &entry.initial_context, &entry.context, &entry.permissions))
            .collect();

        let mut fatal: Option<(String, String)> = None;
        for (node_id, result, spans) in join_all(futures).await {
            entry.run.trace.spans.extend(spans);
            match result {
                Ok(value) => {
                    entry.context.insert(node_id, value);
                }
                Err(message) => {
                    self.bus.publish(WorkflowEvent::Error { run_id, kind: ErrorCode::ToolError.as_str().to_string(), message: message.clone() });
                    let safe_to_fail = matches!(entry.structure.node(&node_id), Some(Node::Task { safe_to_fail: true, .. }));
                    if safe_to_fail {
                        entry.context.insert(node_id, Value::Null);
                        continue;
                    }
                    fatal.get_or_insert((node_id, message));
                }
            }
        }

        if let Some((node_id, message)) = fatal {
            entry.run.status = RunStatus::Failed;
            self.persist_trace(run_id, &entry.run.trace);
            return Err(PmlError::new(ErrorCode::ToolError, message).with_context("node_id", &node_id));
        }
        Ok(())
    }

    async fn run_one_node(&self, run_id: Uuid, node_id: String, node: Node, initial_context: &Value, context: &BTreeMap<String, Value>, permissions: &PermissionMatrix) -> (String, Result<Value, String>, Vec<TraceSpan>) {
        self.bus.publish(WorkflowEvent::TaskStarted { run_id, node_id: node_id.clone() });
        let started = std::time::Instant::now();

        let (result, spans) = match &node {
            Node::Task { tool: _, arguments, .. } => {
                let mut local_trace = TraceTree::new();
                let resolved = crate::argument::resolve_arguments(arguments, initial_context, context).map(|args| Value::Object(args.into_iter().collect()));
                let result = match resolved {
                    Ok(args) => self.node_runner.run_node(run_id, &node_id, args, permissions, &mut local_trace).await,
                    Err(e) => Err(e.to_string()),
                };
                (result, local_trace.spans)
            }
            Node::Capability { capability_id, .. } => {
                let result = self.run_capability_node(capability_id, initial_context).await;
                (result, Vec::new())
            }
            Node::Fork { .. } | Node::Join { .. } => (Ok(Value::Null), Vec::new()),
            Node::Decision { .. } => (Ok(Value::Null), Vec::new()),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.bus.publish(WorkflowEvent::TaskCompleted { run_id, node_id: node_id.clone(), success: result.is_ok(), duration_ms, cached: false });
        (node_id, result, spans)
    }

    async fn run_capability_node(&self, capability_id: &str, initial_context: &Value) -> Result<Value, String> {
        let fqdn = Fqdn::from_str(capability_id).map_err(|e| e.to_string())?;
        let capability = self.store.get(&fqdn).ok_or_else(|| format!("capability `{capability_id}` not found"))?;
        let key = pml_core::CacheKey::new(capability.fqdn.to_string(), initial_context);
        if let Some(cached) = self.speculation.get(&key) {
            return Ok(cached);
        }
        self.execute_structure_inline(&capability.static_structure, initial_context).await
    }

    /// Run a capability's structure to completion with no gating,
    /// returning its accumulated context as a single JSON object. Used
    /// for nested capability nodes and, via [`SpeculativeRunner`], for
    /// intra-workflow speculative prefetch.
    async fn execute_structure_inline(&self, structure: &StaticStructure, initial_context: &Value) -> Result<Value, String> {
        let plan = ExecutionPlan::build(structure).map_err(|e| e.to_string())?;
        let permissions = PermissionMatrix::for_tier(pml_core::PermissionTier::Readonly);
        let mut context: BTreeMap<String, Value> = BTreeMap::new();
        for layer in plan.layers {
            let futures: Vec<_> = layer
                .iter()
                .filter_map(|node_id| structure.node(node_id).map(|n| (node_id.clone(), n.clone())))
                .map(|(node_id, node)| self.run_one_node(Uuid::nil(), node_id, node, initial_context, &context, &permissions))
                .collect();
            for (node_id, result, _) in join_all(futures).await {
                context.insert(node_id, result?);
            }
        }
        Ok(Value::Object(context.into_iter().collect()))
    }

    fn persist_trace(&self, run_id: Uuid, trace: &TraceTree) {
        if let Err(error) = self.trace_store.save(run_id, trace) {
            tracing::warn!(target: "pml.executor", %run_id, %error, "failed to persist trace checkpoint");
        }
    }
}

#[async_trait]
impl SpeculativeRunner for Executor {
    async fn run_speculatively(&self, capability: &pml_core::Capability, arguments: &Value) -> Result<Value, String> {
        self.execute_structure_inline(&capability.static_structure, arguments).await
    }
}

/// Kick off speculative prefetch for `capability` in the background; the
/// result lands in the executor's cache for the next `Capability` node
/// that requests the same `(fqdn, arguments)` pair.
pub async fn speculate_capability(executor: &Executor, capability: &pml_core::Capability, arguments: &Value) {
    speculate(executor.speculation_cache(), capability, arguments, executor).await;
}

fn reachable(structure: &StaticStructure, node_id: &str, taken_branches: &BTreeMap<String, String>) -> bool {
    structure.edges.iter().filter(|e: &&Edge| e.to == node_id).all(|e| match &e.kind {
        EdgeKind::Conditional { outcome } => taken_branches.get(&e.from).is_none_or(|taken| taken == outcome),
        _ => true,
    })
}

fn find_pending_decision(structure: &StaticStructure, node_ids: &[String], taken_branches: &BTreeMap<String, String>) -> Option<String> {
    node_ids.iter().find(|id| matches!(structure.node(id), Some(Node::Decision { .. })) && !taken_branches.contains_key(*id)).cloned()
}

fn decision_options(structure: &StaticStructure, decision_id: &str) -> Vec<String> {
    structure
        .conditional_edges_from(decision_id)
        .into_iter()
        .filter_map(|edge| match &edge.kind {
            EdgeKind::Conditional { outcome } => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}

fn find_hil_gate(gate: &dyn GateStage, structure: &StaticStructure, node_ids: &[String], permissions: &PermissionMatrix, always_allowed: &[String]) -> Option<String> {
    node_ids.iter().find(|id| {
        if always_allowed.iter().any(|allowed| allowed == *id) {
            return false;
        }
        structure.node(id).is_some_and(|node| gate.check(node, permissions).is_some())
    }).cloned()
}
