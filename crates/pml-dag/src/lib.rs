// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Cancellation-aware layer traversal, and replanning support, over a
//! [`pml_core::ExecutionPlan`].

pub mod cancel;

use cancel::CancellationToken;
use pml_core::{ExecutionPlan, Layer, WorkflowRun};
use serde::{Deserialize, Serialize};

/// The outcome of asking [`LayerRunner::next`] for the next layer to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerStep {
    /// Run this layer next.
    Layer(Layer),
    /// Cancellation was observed before the next layer was dispatched.
    Cancelled,
    /// Every layer has already been dispatched.
    Done,
}

/// Drives a [`WorkflowRun`] through its [`ExecutionPlan`] one layer at a
/// time, checking a [`CancellationToken`] between layers so an
/// in-flight cancellation request takes effect at the next layer
/// boundary rather than only after the whole plan finishes.
pub struct LayerRunner<'a> {
    run: &'a mut WorkflowRun,
    cancel: CancellationToken,
}

impl<'a> LayerRunner<'a> {
    /// Wrap `run`, checking `cancel` before every layer dispatch.
    pub fn new(run: &'a mut WorkflowRun, cancel: CancellationToken) -> Self {
        Self { run, cancel }
    }

    /// Fetch the next layer to execute, advancing no state: callers
    /// must call [`WorkflowRun::advance_layer`] on `self.run_mut()` once
    /// the returned layer has finished.
    #[must_use]
    pub fn next(&self) -> LayerStep {
        if self.cancel.is_cancelled() {
            return LayerStep::Cancelled;
        }
        if self.run.is_complete() {
            return LayerStep::Done;
        }
        LayerStep::Layer(self.run.plan.layers[self.run.next_layer].clone())
    }

    /// Mutable access to the wrapped run, for advancing layers or
    /// recording gates as the caller drives execution.
    pub fn run_mut(&mut self) -> &mut WorkflowRun {
        self.run
    }
}

/// A request to replace the remaining, not-yet-executed portion of a
/// run's plan with a freshly computed one, e.g. after a tool's output
/// diverged from what static analysis predicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanRequest {
    /// Human-readable reason the replan was triggered.
    pub reason: String,
    /// The newly computed plan for all remaining work.
    pub remaining_plan: ExecutionPlan,
}

/// Errors applying a [`ReplanRequest`] to a [`WorkflowRun`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplanError {
    /// The run has already completed; there is nothing left to replan.
    #[error("cannot replan a run that has already completed")]
    AlreadyComplete,
}

/// Splice `request.remaining_plan` in after the layers already
/// executed, preserving the run's trace and checkpoint history
/// (`REPLAN_REJECTED` is the caller's concern when `request` itself is
/// judged unsafe; this function only performs the mechanical splice).
pub fn apply_replan(run: &mut WorkflowRun, request: ReplanRequest) -> Result<(), ReplanError> {
    if run.is_complete() {
        return Err(ReplanError::AlreadyComplete);
    }
    run.plan.layers.truncate(run.next_layer);
    run.plan.layers.extend(request.remaining_plan.layers);
    Ok(())
}
