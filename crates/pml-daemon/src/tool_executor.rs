// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host-side [`ToolExecutor`]: proxies a sandbox worker's `rpc_call`
//! onward to the stdio MCP server that actually owns the tool, per the
//! server registered in [`crate::config::PmlConfig`].
//!
//! Each server is a long-lived subprocess with at most one writer (this
//! executor's call path), multiplexed by request id, and idle-evicted
//! after [`ServerConfig::timeout_secs`] (or the config-wide default) of
//! inactivity, mirroring the shared-resource policy also enforced by
//! `pml_sandbox`'s per-node worker lifecycle.

use crate::config::{PmlConfig, ServerConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use pml_error::ErrorCode;
use pml_sandbox::ToolExecutor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

/// A call that never reaches a server, or never gets answered, is
/// retried this many times (default 3) before surfacing the failure.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay before the first retry; doubles on each subsequent one.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Seconds to wait for a reply when a server has no `timeout_secs` set.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// A spawn failure, a dead pipe, or an unanswered call within its
/// timeout window is the server being unreachable, not a logical
/// failure of the tool itself: retry those. A malformed reply or an
/// application-level `error` field is the tool's own answer and
/// retrying it would just repeat it.
fn classify(message: &str) -> ErrorCode {
    if message == "call timed out" {
        ErrorCode::ToolTimeout
    } else if message.starts_with("failed to spawn server")
        || message.starts_with("write to server failed")
        || message.starts_with("flush to server failed")
        || message.starts_with("read from server failed")
        || message == "server closed its stdout before replying"
        || message == "server vanished from the registry"
    {
        ErrorCode::ToolUnreachable
    } else {
        ErrorCode::ToolError
    }
}

#[derive(Serialize)]
struct StdioRequest<'a> {
    id: u64,
    action: &'a str,
    arguments: &'a Value,
}

#[derive(Deserialize)]
struct StdioResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

struct ManagedServer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    last_used: Instant,
}

impl ManagedServer {
    fn spawn(config: &ServerConfig) -> Result<Self, String> {
        let mut child = tokio::process::Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn server `{}`: {e}", config.command))?;
        let stdin = child.stdin.take().ok_or("server process has no stdin")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("server process has no stdout")?);
        Ok(Self { child, stdin, stdout, next_id: 0, last_used: Instant::now() })
    }

    async fn call(&mut self, action: &str, arguments: &Value, timeout: Duration) -> Result<Value, String> {
        self.next_id += 1;
        let request = StdioRequest { id: self.next_id, action, arguments };
        let mut line = serde_json::to_string(&request).map_err(|e| e.to_string())?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await.map_err(|e| format!("write to server failed: {e}"))?;
        self.stdin.flush().await.map_err(|e| format!("flush to server failed: {e}"))?;

        let mut reply = String::new();
        let bytes_read = tokio::time::timeout(timeout, self.stdout.read_line(&mut reply)).await.map_err(|_| "call timed out".to_string())?.map_err(|e| format!("read from server failed: {e}"))?;
        if bytes_read == 0 {
            return Err("server closed its stdout before replying".into());
        }
        let response: StdioResponse = serde_json::from_str(reply.trim_end()).map_err(|e| format!("malformed server reply: {e}"))?;
        if response.id != request.id {
            return Err(format!("server reply id {} did not match request id {}", response.id, request.id));
        }
        self.last_used = Instant::now();
        match (response.result, response.error) {
            (Some(value), _) => Ok(value),
            (None, Some(message)) => Err(message),
            (None, None) => Ok(Value::Null),
        }
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_used.elapsed() > timeout
    }
}

impl Drop for ManagedServer {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Proxies tool calls to workspace-registered stdio MCP servers,
/// parsed out of a `server:action` tool id.
pub struct StdioToolExecutor {
    servers: DashMap<String, ServerConfig>,
    idle_timeout: Duration,
    running: DashMap<String, Mutex<ManagedServer>>,
}

impl StdioToolExecutor {
    /// Build an executor from a loaded config's registered servers.
    #[must_use]
    pub fn new(config: &PmlConfig) -> Self {
        let servers = DashMap::new();
        for (name, server) in &config.servers {
            servers.insert(name.clone(), server.clone());
        }
        Self { servers, idle_timeout: Duration::from_secs(config.server_idle_timeout_secs), running: DashMap::new() }
    }

    fn split_tool_id(tool_id: &str) -> Result<(&str, &str), String> {
        tool_id.split_once(':').ok_or_else(|| format!("tool id `{tool_id}` is not in `server:action` form"))
    }

    async fn call_once(&self, server_name: &str, action: &str, arguments: &Value, server_config: &ServerConfig, timeout: Duration) -> Result<Value, String> {
        if let Some(idle) = self.running.get(server_name) {
            if idle.lock().await.is_idle(self.idle_timeout) {
                drop(idle);
                self.running.remove(server_name);
            }
        }

        if !self.running.contains_key(server_name) {
            let managed = ManagedServer::spawn(server_config)?;
            self.running.insert(server_name.to_string(), Mutex::new(managed));
        }

        let entry = self.running.get(server_name).ok_or("server vanished from the registry")?;
        let mut managed = entry.lock().await;
        managed.call(action, arguments, timeout).await
    }
}

#[async_trait]
impl ToolExecutor for StdioToolExecutor {
    async fn call(&self, tool_id: &str, arguments: Value) -> Result<Value, String> {
        let (server_name, action) = Self::split_tool_id(tool_id)?;
        let server_config = self.servers.get(server_name).ok_or_else(|| format!("no server registered for `{server_name}`"))?.clone();
        let timeout = Duration::from_secs(server_config.timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS));

        let mut attempt = 0u32;
        loop {
            match self.call_once(server_name, action, &arguments, &server_config, timeout).await {
                Ok(value) => return Ok(value),
                Err(message) => {
                    let code = classify(&message);
                    if code.is_retryable() {
                        self.running.remove(server_name);
                    }
                    if !code.is_retryable() || attempt >= DEFAULT_MAX_RETRIES {
                        return Err(message);
                    }
                    tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tool_id_requires_a_colon() {
        assert!(StdioToolExecutor::split_tool_id("notion").is_err());
        assert_eq!(StdioToolExecutor::split_tool_id("notion:search").unwrap(), ("notion", "search"));
    }

    #[test]
    fn transient_io_and_timeout_failures_are_retryable() {
        assert_eq!(classify("call timed out"), ErrorCode::ToolTimeout);
        assert_eq!(classify("failed to spawn server `notion-mcp`: not found"), ErrorCode::ToolUnreachable);
        assert_eq!(classify("write to server failed: broken pipe"), ErrorCode::ToolUnreachable);
        assert_eq!(classify("flush to server failed: broken pipe"), ErrorCode::ToolUnreachable);
        assert_eq!(classify("read from server failed: eof"), ErrorCode::ToolUnreachable);
        assert_eq!(classify("server closed its stdout before replying"), ErrorCode::ToolUnreachable);
        assert!(classify("call timed out").is_retryable());
        assert!(classify("server closed its stdout before replying").is_retryable());
    }

    #[test]
    fn application_level_failures_are_not_retryable() {
        assert_eq!(classify("no server registered for `ghost`"), ErrorCode::ToolError);
        assert_eq!(classify("permission denied: missing NOTION_API_KEY"), ErrorCode::ToolError);
        assert!(!classify("permission denied: missing NOTION_API_KEY").is_retryable());
    }
}
