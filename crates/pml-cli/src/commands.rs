// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library-level command implementations for the CLI, kept separate
//! from `main.rs` so they can be exercised without spawning the binary.

use crate::lockfile::{lock_path, LockedServer, McpLock};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use pml_core::{Capability, Fqdn, RecordType};
use pml_daemon::config::{config_path, load_config, PmlConfig, ServerConfig};
use pml_executor::ExecutionOutcome;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Exit code for a clean run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a generic, non-specific failure.
pub const EXIT_GENERIC_FAILURE: i32 = 1;
/// Exit code for a configuration error.
pub const EXIT_CONFIG_ERROR: i32 = 2;
/// Exit code for a sandbox worker timeout or panic.
pub const EXIT_SANDBOX_FAULT: i32 = 3;
/// Exit code for a run that cannot proceed without the user (approval,
/// branch decision, or explicit cancellation).
pub const EXIT_USER_ABORT: i32 = 4;

/// Scaffold `{workspace}/.pml/`: the capability store directory, the
/// trace store directory, and a default `config.toml` if one isn't
/// already there.
pub fn init_workspace(workspace: &Path) -> Result<()> {
    let pml_dir = workspace.join(".pml");
    std::fs::create_dir_all(pml_dir.join("capabilities"))?;
    std::fs::create_dir_all(pml_dir.join("traces"))?;
    let config_file = config_path(workspace);
    if config_file.exists() {
        println!("{} already exists, leaving it in place", config_file.display());
        return Ok(());
    }
    let default = PmlConfig::default();
    let toml = toml::to_string_pretty(&default)?;
    std::fs::write(&config_file, toml)?;
    println!("wrote {}", config_file.display());
    Ok(())
}

/// Map an outcome (or the error produced instead of one) to a process
/// exit code, without printing anything.
#[must_use]
pub fn exit_code_for(result: &Result<ExecutionOutcome, pml_error::PmlError>) -> i32 {
    match result {
        Ok(ExecutionOutcome::Completed { .. }) => EXIT_SUCCESS,
        Ok(ExecutionOutcome::AwaitingApproval { .. } | ExecutionOutcome::AwaitingInput { .. } | ExecutionOutcome::Cancelled { .. }) => EXIT_USER_ABORT,
        Err(err) => match err.code.category() {
            pml_error::ErrorCategory::Worker => EXIT_SANDBOX_FAULT,
            pml_error::ErrorCategory::Approval => EXIT_USER_ABORT,
            _ => EXIT_GENERIC_FAILURE,
        },
    }
}

/// Map an [`ExecutionOutcome`] (or the error produced instead of one)
/// to a process exit code, printing a short, actionable summary.
pub fn report_outcome(result: Result<ExecutionOutcome, pml_error::PmlError>) -> i32 {
    let code = exit_code_for(&result);
    match result {
        Ok(ExecutionOutcome::Completed { run_id, context }) => {
            println!("completed: run {run_id}");
            if let Ok(pretty) = serde_json::to_string_pretty(&context) {
                println!("{pretty}");
            }
        }
        Ok(ExecutionOutcome::AwaitingApproval { run_id, node_id }) => {
            eprintln!("run {run_id} is awaiting approval at `{node_id}`; resume it via the daemon's /continue endpoint");
        }
        Ok(ExecutionOutcome::AwaitingInput { run_id, node_id, options }) => {
            eprintln!("run {run_id} is awaiting a decision at `{node_id}`: {}", options.join(", "));
        }
        Ok(ExecutionOutcome::Cancelled { run_id }) => {
            eprintln!("run {run_id} was cancelled");
        }
        Err(err) => {
            eprintln!("error: {}", err.message);
        }
    }
    code
}

/// A registry server descriptor, the `application/json` shape the
/// registry protocol returns for `recordType=mcp-server`.
#[derive(Debug, Clone, serde::Deserialize)]
struct ServerDescriptor {
    fqdn: String,
    #[serde(default)]
    install: Option<InstallSpec>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct InstallSpec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env_required: Vec<String>,
}

/// Fetch an MCP server descriptor from a registry URL, register it in
/// `config.toml`'s `servers` map under its fqdn's action segment, and
/// pin the fetch in `mcp.lock`.
pub async fn add_server(workspace: &Path, source_url: &str) -> Result<String> {
    let client = reqwest::Client::new();
    let bytes = client.get(source_url).send().await.context("fetch registry entry")?.error_for_status()?.bytes().await?;
    let descriptor: ServerDescriptor = serde_json::from_slice(&bytes).context("registry response is not a valid mcp-server descriptor")?;
    let fqdn = Fqdn::from_str(&descriptor.fqdn).map_err(|e| anyhow::anyhow!("registry returned an invalid fqdn `{}`: {e}", descriptor.fqdn))?;
    let install = descriptor.install.ok_or_else(|| anyhow::anyhow!("registry entry `{}` has no install spec", descriptor.fqdn))?;
    let name = fqdn.action().to_string();

    let config_file = config_path(workspace);
    let mut config = load_config(&config_file)?;
    let env = install.env_required.iter().cloned().map(|key| (key, String::new())).collect::<BTreeMap<_, _>>();
    config.servers.insert(name.clone(), ServerConfig { command: install.command, args: install.args, env, timeout_secs: None });
    std::fs::write(&config_file, toml::to_string_pretty(&config)?)?;

    let mut lock = McpLock::load(&lock_path(workspace))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    lock.servers.insert(name.clone(), LockedServer { source: source_url.to_string(), sha256, fetched_at: Utc::now() });
    lock.save(&lock_path(workspace))?;

    Ok(name)
}

/// Re-fetch every locked server's source and update `config.toml`/
/// `mcp.lock` when the fetched bytes changed. Returns the names of
/// servers that were actually upgraded.
pub async fn upgrade_servers(workspace: &Path) -> Result<Vec<String>> {
    let mut lock = McpLock::load(&lock_path(workspace))?;
    let config_file = config_path(workspace);
    let mut config = load_config(&config_file)?;
    let client = reqwest::Client::new();
    let mut upgraded = Vec::new();

    for (name, locked) in lock.servers.clone() {
        let bytes = client.get(&locked.source).send().await.context("fetch registry entry")?.error_for_status()?.bytes().await?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        if sha256 == locked.sha256 {
            continue;
        }
        let descriptor: ServerDescriptor = serde_json::from_slice(&bytes).context("registry response is not a valid mcp-server descriptor")?;
        let install = descriptor.install.ok_or_else(|| anyhow::anyhow!("registry entry `{}` has no install spec", descriptor.fqdn))?;
        let env = install.env_required.iter().cloned().map(|key| (key, String::new())).collect::<BTreeMap<_, _>>();
        config.servers.insert(name.clone(), ServerConfig { command: install.command, args: install.args, env, timeout_secs: None });
        lock.servers.insert(name.clone(), LockedServer { source: locked.source, sha256, fetched_at: Utc::now() });
        upgraded.push(name);
    }

    if !upgraded.is_empty() {
        std::fs::write(&config_file, toml::to_string_pretty(&config)?)?;
        lock.save(&lock_path(workspace))?;
    }
    Ok(upgraded)
}

/// Remove a capability by fqdn, and drop its lock/config entry if it
/// was instead (or additionally) a registered MCP server.
pub fn remove_entry(workspace: &Path, store: &pml_capability_store::CapabilityStore, key: &str) -> Result<()> {
    if let Ok(fqdn) = Fqdn::from_str(key) {
        if store.get(&fqdn).is_some() {
            store.remove(&fqdn)?;
            println!("removed capability {fqdn}");
            return Ok(());
        }
    }
    let config_file = config_path(workspace);
    let mut config = load_config(&config_file)?;
    let mut lock = McpLock::load(&lock_path(workspace))?;
    let had_server = config.servers.remove(key).is_some();
    let had_lock = lock.servers.remove(key).is_some();
    if !had_server && !had_lock {
        bail!("no capability or server named `{key}`");
    }
    std::fs::write(&config_file, toml::to_string_pretty(&config)?)?;
    lock.save(&lock_path(workspace))?;
    println!("removed server `{key}`");
    Ok(())
}

/// Print every capability and registered server in the workspace.
pub fn list_entries(workspace: &Path, store: &pml_capability_store::CapabilityStore) -> Result<()> {
    let mut capabilities = store.all();
    capabilities.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    for capability in &capabilities {
        print_capability_row(capability);
    }
    let config = load_config(&config_path(workspace))?;
    for (name, server) in &config.servers {
        println!("{name}\tmcp-server\t{}", server.command);
    }
    Ok(())
}

fn print_capability_row(capability: &Capability) {
    let kind = match capability.record_type {
        RecordType::Capability => "capability",
        RecordType::McpServer => "mcp-server",
    };
    println!("{}\t{kind}\t{}", capability.display_name, capability.fqdn);
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
