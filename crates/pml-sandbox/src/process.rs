// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process lifecycle tracking for managed sandbox worker processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for spawning a managed sandbox worker process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executable command to run.
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,
    /// Environment variables set for the process. The worker never
    /// inherits the host's environment: this map is the worker's
    /// entire environment, enforcing zero ambient permission.
    pub env_vars: BTreeMap<String, String>,
    /// Maximum time the process is allowed to run before being killed.
    pub timeout_ms: Option<u64>,
}

impl WorkerConfig {
    /// A worker config with no arguments, no environment, and no timeout.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), args: Vec::new(), working_dir: None, env_vars: BTreeMap::new(), timeout_ms: None }
    }
}

/// Runtime status of a managed worker process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerStatus {
    /// The process has not been started yet.
    NotStarted,
    /// The process is currently running.
    Running {
        /// OS process identifier.
        pid: u32,
    },
    /// The process exited normally with the given code.
    Exited {
        /// Exit code returned by the process.
        code: i32,
    },
    /// The process was forcefully killed.
    Killed,
    /// The process exceeded its configured timeout and was terminated.
    TimedOut,
}

/// Tracks the full lifecycle of a managed worker process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Configuration used to spawn the worker.
    pub config: WorkerConfig,
    /// Current status.
    pub status: WorkerStatus,
    /// When the process was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the process ended.
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkerInfo {
    /// Create a new `WorkerInfo` in the `NotStarted` state.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self { config, status: WorkerStatus::NotStarted, started_at: None, ended_at: None }
    }

    /// Whether the process is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.status, WorkerStatus::Running { .. })
    }

    /// Whether the process has terminated in any way.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self.status, WorkerStatus::Exited { .. } | WorkerStatus::Killed | WorkerStatus::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_info_is_not_started() {
        let info = WorkerInfo::new(WorkerConfig::new("worker-bin"));
        assert!(!info.is_running());
        assert!(!info.is_terminated());
    }

    #[test]
    fn running_status_is_running_not_terminated() {
        let mut info = WorkerInfo::new(WorkerConfig::new("worker-bin"));
        info.status = WorkerStatus::Running { pid: 42 };
        assert!(info.is_running());
        assert!(!info.is_terminated());
    }

    #[test]
    fn exited_killed_and_timed_out_are_terminated() {
        for status in [WorkerStatus::Exited { code: 0 }, WorkerStatus::Killed, WorkerStatus::TimedOut] {
            let mut info = WorkerInfo::new(WorkerConfig::new("worker-bin"));
            info.status = status;
            assert!(info.is_terminated());
            assert!(!info.is_running());
        }
    }
}
