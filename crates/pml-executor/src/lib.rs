// SPDX-License-Identifier: MIT OR Apache-2.0
#![warn(missing_docs)]
//! Controlled DAG Executor: drives a capability's static structure
//! through layered-parallel execution, gating elevated-permission tasks
//! and decision points behind HIL/AIL approval, and proxying every tool
//! call through a fresh sandbox worker.

pub mod argument;
pub mod bus;
pub mod executor;
pub mod gate;
pub mod node_runner;

pub use bus::{EventBus, EventBusStats, EventSubscription, RunSubscription, WorkflowEvent};
pub use executor::{speculate_capability, ExecuteOptions, ExecutionOutcome, Executor};
pub use gate::{GateReason, GateStage, HilGateStage, ToolRiskClassifier};
pub use node_runner::{NodeRunner, SandboxNodeRunner};
