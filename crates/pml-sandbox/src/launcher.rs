// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`WorkerLauncher`] seam: lets the executor spawn real OS
//! processes in production while tests substitute an in-memory worker.

use crate::process::WorkerConfig;
use crate::SandboxError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// A spawned worker process's raw stdio handles, not yet handshaked.
pub struct SpawnedWorker {
    /// The child process handle, kept alive for the worker's lifetime.
    pub child: Child,
    /// The worker's stdin, for sending `run`/`rpc_result` envelopes.
    pub stdin: ChildStdin,
    /// The worker's stdout, for reading `hello`/`rpc_call`/`trace`/
    /// `final` envelopes.
    pub stdout: BufReader<ChildStdout>,
}

/// Spawns sandbox worker processes. Implemented by
/// [`TokioWorkerLauncher`] in production; tests provide an in-process
/// fake that speaks the same JSONL protocol over a pipe without an
/// actual OS process, to exercise [`crate::WorkerClient`] deterministically.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Spawn a worker process per `config`, piping its stdio.
    async fn spawn(&self, config: &WorkerConfig) -> Result<SpawnedWorker, SandboxError>;
}

/// Production [`WorkerLauncher`] backed by [`tokio::process::Command`].
///
/// The worker's environment is built entirely from `config.env_vars`;
/// the host's own environment is never inherited, so a worker process
/// starts with zero ambient permission by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioWorkerLauncher;

#[async_trait]
impl WorkerLauncher for TokioWorkerLauncher {
    async fn spawn(&self, config: &WorkerConfig) -> Result<SpawnedWorker, SandboxError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args).env_clear().envs(&config.env_vars).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| SandboxError::Violation("worker stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| SandboxError::Violation("worker stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                use tokio::io::AsyncBufReadExt;
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::warn!(target: "pml.sandbox.stderr", "{line}");
                    }
                }
            });
        }

        Ok(SpawnedWorker { child, stdin, stdout: BufReader::new(stdout) })
    }
}
