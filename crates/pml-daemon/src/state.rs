// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared application state wired once at startup and handed to every
//! axum handler.

use crate::config::PmlConfig;
use crate::tool_executor::StdioToolExecutor;
use pml_capability_store::CapabilityStore;
use pml_core::PermissionMatrix;
use pml_executor::{Executor, HilGateStage, SandboxNodeRunner, ToolRiskClassifier};
use pml_core::OperationClass;
use pml_sandbox::launcher::TokioWorkerLauncher;
use pml_sandbox::permission::ToolClassifier as SandboxToolClassifier;
use pml_sandbox::process::WorkerConfig;
use pml_trace::redact::Redactor;
use pml_trace::TraceStore;
use std::path::Path;
use std::sync::Arc;

/// Classifies `server:action` tool ids by the server prefix actions
/// that are conventionally read-only, gating everything else behind
/// HIL approval. A workspace that needs finer-grained classification
/// can grow this into a config-driven table; this default matches the
/// common MCP server convention of `get`/`list`/`search`/`read` verbs
/// being safe.
struct ConventionalClassifier;

impl ConventionalClassifier {
    fn classify_inner(tool_id: &str) -> OperationClass {
        let action = tool_id.split_once(':').map_or(tool_id, |(_, action)| action);
        let read_verbs = ["get", "list", "search", "read", "lookup", "whois", "history", "describe"];
        if read_verbs.iter().any(|verb| action.starts_with(verb)) {
            OperationClass::Read
        } else {
            OperationClass::Write
        }
    }
}

impl ToolRiskClassifier for ConventionalClassifier {
    fn classify(&self, tool_id: &str) -> OperationClass {
        Self::classify_inner(tool_id)
    }
}

impl SandboxToolClassifier for ConventionalClassifier {
    fn classify(&self, tool_id: &str) -> OperationClass {
        Self::classify_inner(tool_id)
    }
}

/// Everything a running daemon needs, shared behind an `Arc` across
/// every request and SSE stream.
pub struct AppState {
    /// The Controlled DAG Executor driving every workflow run.
    pub executor: Arc<Executor>,
    /// The Capability Store & Resolver backing `discover`/`lookup`/etc.
    pub store: Arc<CapabilityStore>,
    /// Loaded workspace configuration.
    pub config: PmlConfig,
    /// Permission matrix newly executed capabilities run under absent
    /// an explicit override in the request.
    pub default_permissions: PermissionMatrix,
}

impl AppState {
    /// Build application state for `workspace`, opening its capability
    /// store and trace archive under `.pml/` and wiring the executor
    /// against the configured stdio servers and sandbox worker binary.
    pub fn open(workspace: &Path, config: PmlConfig) -> anyhow::Result<Self> {
        let pml_dir = workspace.join(".pml");
        let store = Arc::new(CapabilityStore::open(pml_dir.join("capabilities"))?);
        let trace_store = Arc::new(TraceStore::open(pml_dir.join("traces"), Redactor::new())?);

        let launcher = Arc::new(TokioWorkerLauncher);
        let worker_config = WorkerConfig { command: config.worker_command.clone(), args: config.worker_args.clone(), working_dir: None, env_vars: Default::default(), timeout_ms: None };
        let classifier: Arc<dyn SandboxToolClassifier> = Arc::new(ConventionalClassifier);
        let tool_executor = Arc::new(StdioToolExecutor::new(&config));
        let node_runner = Arc::new(SandboxNodeRunner::new(launcher, worker_config, classifier, tool_executor));
        let gate = Arc::new(HilGateStage::new(ConventionalClassifier));

        let executor = Arc::new(Executor::new(node_runner, gate, store.clone(), trace_store));
        let default_permissions = PermissionMatrix::for_tier(config.default_permission_tier);

        Ok(Self { executor, store, config, default_permissions })
    }
}
