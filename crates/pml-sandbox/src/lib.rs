// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Sandbox Worker Bridge: process supervision and RPC proxying for the
//! zero-permission worker that runs one DAG node's tool call.
//!
//! A worker process holds no filesystem, network, or process
//! permission of its own. Every tool call it wants to make is sent
//! back to the host as an `rpc_call`; the host checks the call against
//! the capability's [`pml_core::PermissionMatrix`] before performing it
//! and proxying the result back as `rpc_result`. Every span the worker
//! opens is mirrored to the host as a `trace` message.

pub mod launcher;
pub mod permission;
pub mod process;

use async_trait::async_trait;
use chrono::Utc;
use launcher::{SpawnedWorker, WorkerLauncher};
use permission::ToolClassifier;
use pml_core::{PermissionMatrix, SpanKind, SpanStatus, TraceSpan, TraceTree};
use pml_protocol::{Envelope, JsonlCodec, ProtocolError};
use process::{WorkerConfig, WorkerInfo, WorkerStatus};
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Performs a tool call on the host's behalf once it has cleared
/// permission checking. Implemented by `pml-executor` against its
/// registered tool set; `pml-sandbox` only knows how to proxy, not how
/// to actually invoke a tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Invoke `tool_id` with `arguments`, returning the raw tool result
    /// or a human-readable failure message.
    async fn call(&self, tool_id: &str, arguments: Value) -> Result<Value, String>;
}

/// Errors from worker process management and protocol handling.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),
    /// Failed to read from the worker's stdout.
    #[error("failed to read worker stdout: {0}")]
    Stdout(#[source] io::Error),
    /// Failed to write to the worker's stdin.
    #[error("failed to write worker stdin: {0}")]
    Stdin(#[source] io::Error),
    /// A wire-protocol error occurred.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The worker violated the expected handshake/run sequence.
    #[error("worker protocol violation: {0}")]
    Violation(String),
    /// The worker reported an unrecoverable error (`WORKER_PANIC`).
    #[error("worker fatal error: {0}")]
    Fatal(String),
    /// The worker process exited before completing the run.
    #[error("worker exited unexpectedly (code={code:?})")]
    Exited {
        /// The process's exit code, if known.
        code: Option<i32>,
    },
}

/// A worker process that has completed its `hello` handshake and is
/// ready to run one or more DAG nodes, one at a time.
pub struct WorkerClient {
    spawned: SpawnedWorker,
    /// Lifecycle bookkeeping for this worker process.
    pub info: WorkerInfo,
}

impl WorkerClient {
    /// Spawn a worker via `launcher` and perform the `hello` handshake.
    /// The worker MUST emit a `hello` envelope as its first stdout line.
    pub async fn spawn(launcher: &dyn WorkerLauncher, config: WorkerConfig) -> Result<Self, SandboxError> {
        let mut info = WorkerInfo::new(config.clone());
        let mut spawned = launcher.spawn(&config).await?;

        let mut line = String::new();
        let n = spawned.stdout.read_line(&mut line).await.map_err(SandboxError::Stdout)?;
        if n == 0 {
            let status = spawned.child.wait().await.ok();
            return Err(SandboxError::Exited { code: status.and_then(|s| s.code()) });
        }

        match JsonlCodec::decode(line.trim_end())? {
            Envelope::Hello { pid, .. } => {
                info.status = WorkerStatus::Running { pid };
                info.started_at = Some(Utc::now());
            }
            other => {
                return Err(SandboxError::Protocol(ProtocolError::UnexpectedMessage { expected: "hello".into(), got: format!("{other:?}") }));
            }
        }

        Ok(Self { spawned, info })
    }

    /// Run one DAG node to completion, proxying every `rpc_call` the
    /// worker makes through `classifier`/`permissions`/`executor`, and
    /// mirroring every `trace` message into `trace`.
    pub async fn run_node(&mut self, trace_id: Uuid, node_id: &str, arguments: Value, permissions: &PermissionMatrix, classifier: &dyn ToolClassifier, executor: &dyn ToolExecutor, trace: &mut TraceTree) -> Result<Value, SandboxError> {
        self.send(Envelope::Run { trace_id, node_id: node_id.to_string(), arguments }).await?;

        loop {
            let mut line = String::new();
            let n = self.spawned.stdout.read_line(&mut line).await.map_err(SandboxError::Stdout)?;
            if n == 0 {
                let status = self.spawned.child.wait().await.ok();
                self.info.status = WorkerStatus::Exited { code: status.and_then(|s| s.code()).unwrap_or(-1) };
                self.info.ended_at = Some(Utc::now());
                return Err(SandboxError::Exited { code: status.and_then(|s| s.code()) });
            }

            match JsonlCodec::decode(line.trim_end())? {
                Envelope::RpcCall { call_id, tool_id, arguments } => {
                    let outcome = if permission::is_permitted(permissions, classifier, &tool_id) {
                        executor.call(&tool_id, arguments).await
                    } else {
                        Err(format!("SANDBOX_DENIED: `{tool_id}` is outside the granted permission tier"))
                    };
                    self.send(Envelope::RpcResult { call_id, outcome }).await?;
                }
                Envelope::Trace { trace_id, parent_trace_id, event, payload } => {
                    match event.as_str() {
                        "start" => {
                            let kind = if parent_trace_id.is_some() { SpanKind::ToolCall } else { SpanKind::Task };
                            trace.spans.push(TraceSpan::start(trace_id, parent_trace_id, Some(node_id.to_string()), kind, Utc::now(), payload));
                        }
                        "finish" => {
                            if let Some(span) = trace.spans.iter_mut().find(|s| s.trace_id == trace_id) {
                                let status = if payload.get("error").is_some() { SpanStatus::Failed } else { SpanStatus::Succeeded };
                                span.finish(Utc::now(), status, Some(payload));
                            }
                        }
                        _ => {}
                    }
                }
                Envelope::Final { node_id: returned_node, outcome } => {
                    if returned_node != node_id {
                        return Err(SandboxError::Violation(format!("worker reported final for `{returned_node}`, expected `{node_id}`")));
                    }
                    return outcome.map_err(SandboxError::Fatal);
                }
                Envelope::Fatal { error } => return Err(SandboxError::Fatal(error)),
                other => {
                    return Err(SandboxError::Violation(format!("unexpected envelope during run: {other:?}")));
                }
            }
        }
    }

    /// Forcefully terminate the worker process.
    pub async fn kill(&mut self) -> Result<(), SandboxError> {
        self.spawned.child.kill().await.map_err(SandboxError::Spawn)?;
        self.info.status = WorkerStatus::Killed;
        self.info.ended_at = Some(Utc::now());
        Ok(())
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), SandboxError> {
        let line = JsonlCodec::encode(&envelope)?;
        self.spawned.stdin.write_all(line.as_bytes()).await.map_err(SandboxError::Stdin)?;
        self.spawned.stdin.flush().await.map_err(SandboxError::Stdin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_error_formats_with_code() {
        let err = SandboxError::Exited { code: Some(137) };
        assert!(err.to_string().contains("137"));
    }

    #[test]
    fn fatal_error_carries_worker_message() {
        let err = SandboxError::Fatal("segfault".into());
        assert!(err.to_string().contains("segfault"));
    }

    #[test]
    fn sandbox_denied_message_names_the_tool() {
        let denied: Result<Value, String> = Err("SANDBOX_DENIED: `net:fetch` is outside the granted permission tier".to_string());
        assert!(denied.unwrap_err().contains("net:fetch"));
    }
}
