// SPDX-License-Identifier: MIT OR Apache-2.0
//! [`NodeRunner`]: the seam between the executor's driving loop and the
//! Sandbox Worker Bridge. Production code runs a node through a fresh
//! [`pml_sandbox::WorkerClient`]; tests inject an in-process fake so the
//! driving loop can be exercised without spawning a real process.

use async_trait::async_trait;
use pml_core::{PermissionMatrix, TraceTree};
use pml_error::ErrorCode;
use pml_sandbox::launcher::WorkerLauncher;
use pml_sandbox::permission::ToolClassifier;
use pml_sandbox::process::WorkerConfig;
use pml_sandbox::{SandboxError, ToolExecutor, WorkerClient};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default bound on retries for a worker that never got the call off the
/// ground (failed to spawn, or died mid-handshake) before surfacing the
/// failure to the caller.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay before the first retry; doubles on each subsequent one.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// A worker that never delivered a result is unreachable, not wrong:
/// retry it. A protocol violation or an explicit worker panic is a real
/// failure and retrying it would just repeat it.
fn classify(error: &SandboxError) -> ErrorCode {
    match error {
        SandboxError::Spawn(_) | SandboxError::Stdout(_) | SandboxError::Stdin(_) | SandboxError::Exited { .. } => ErrorCode::ToolUnreachable,
        SandboxError::Protocol(_) | SandboxError::Violation(_) | SandboxError::Fatal(_) => ErrorCode::ToolError,
    }
}

/// Runs one DAG node's tool call to completion.
#[async_trait]
pub trait NodeRunner: Send + Sync {
    /// Execute `node_id`'s tool with `arguments`, mirroring any spans
    /// the run opens into `trace`.
    async fn run_node(&self, trace_id: Uuid, node_id: &str, arguments: Value, permissions: &PermissionMatrix, trace: &mut TraceTree) -> Result<Value, String>;
}

/// Production [`NodeRunner`]: spawns a fresh sandbox worker per node
/// call (the worker's own lifetime is one node's tool invocation, never
/// shared across nodes) and tears it down once the node finishes.
pub struct SandboxNodeRunner {
    launcher: Arc<dyn WorkerLauncher>,
    worker_config: WorkerConfig,
    classifier: Arc<dyn ToolClassifier>,
    tool_executor: Arc<dyn ToolExecutor>,
}

impl SandboxNodeRunner {
    /// Build a runner that spawns workers via `launcher`/`worker_config`,
    /// enforcing `classifier`/`permissions` before proxying a call to
    /// `tool_executor`.
    #[must_use]
    pub fn new(launcher: Arc<dyn WorkerLauncher>, worker_config: WorkerConfig, classifier: Arc<dyn ToolClassifier>, tool_executor: Arc<dyn ToolExecutor>) -> Self {
        Self { launcher, worker_config, classifier, tool_executor }
    }
}

#[async_trait]
impl NodeRunner for SandboxNodeRunner {
    async fn run_node(&self, trace_id: Uuid, node_id: &str, arguments: Value, permissions: &PermissionMatrix, trace: &mut TraceTree) -> Result<Value, String> {
        let mut attempt = 0u32;
        loop {
            let outcome = self.run_node_once(trace_id, node_id, arguments.clone(), permissions, trace).await;
            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !classify(&error).is_retryable() || attempt >= DEFAULT_MAX_RETRIES {
                return Err(match error {
                    SandboxError::Fatal(msg) => msg,
                    other => other.to_string(),
                });
            }
            tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
            attempt += 1;
        }
    }
}

impl SandboxNodeRunner {
    async fn run_node_once(&self, trace_id: Uuid, node_id: &str, arguments: Value, permissions: &PermissionMatrix, trace: &mut TraceTree) -> Result<Value, SandboxError> {
        let mut worker = WorkerClient::spawn(self.launcher.as_ref(), self.worker_config.clone()).await?;
        let result = worker.run_node(trace_id, node_id, arguments, permissions, self.classifier.as_ref(), self.tool_executor.as_ref(), trace).await;
        let _ = worker.kill().await;
        result
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// A [`NodeRunner`] returning a fixed result per `node_id`, for
    /// exercising the driving loop without a real sandbox process.
    pub struct FakeNodeRunner {
        pub results: Mutex<std::collections::BTreeMap<String, Result<Value, String>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeNodeRunner {
        pub fn new() -> Self {
            Self { results: Mutex::new(std::collections::BTreeMap::new()), calls: Mutex::new(Vec::new()) }
        }

        pub fn with_result(self, node_id: impl Into<String>, result: Result<Value, String>) -> Self {
            self.results.lock().unwrap().insert(node_id.into(), result);
            self
        }
    }

    #[async_trait]
    impl NodeRunner for FakeNodeRunner {
        async fn run_node(&self, _trace_id: Uuid, node_id: &str, _arguments: Value, _permissions: &PermissionMatrix, _trace: &mut TraceTree) -> Result<Value, String> {
            self.calls.lock().unwrap().push(node_id.to_string());
            self.results.lock().unwrap().get(node_id).cloned().unwrap_or(Ok(Value::Null))
        }
    }
}
