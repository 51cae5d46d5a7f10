// SPDX-License-Identifier: MIT OR Apache-2.0
//! TOML configuration for a workspace's `.pml` directory: which stdio
//! MCP servers are registered, where the capability store and trace
//! archive live, and the default permission posture for new
//! capabilities.

use pml_core::PermissionTier;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Root configuration loaded from `{workspace}/.pml/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PmlConfig {
    /// Stdio MCP servers registered for this workspace, keyed by the
    /// server prefix used in `server:action` tool ids.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Default permission tier assigned to freshly built capabilities
    /// whose code does not otherwise request one.
    #[serde(default = "default_tier")]
    pub default_permission_tier: PermissionTier,
    /// Port the daemon binds to when no `--port` flag is given.
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long an idle stdio server subprocess is kept alive before
    /// being evicted.
    #[serde(default = "default_idle_timeout_secs")]
    pub server_idle_timeout_secs: u64,
    /// Command used to spawn a fresh sandbox worker process per task
    /// node. Defaults to a worker binary expected on `PATH`; deployments
    /// that build a custom sandbox runtime point this elsewhere.
    #[serde(default = "default_worker_command")]
    pub worker_command: String,
    /// Arguments passed to `worker_command`.
    #[serde(default)]
    pub worker_args: Vec<String>,
}

impl Default for PmlConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            default_permission_tier: default_tier(),
            port: default_port(),
            server_idle_timeout_secs: default_idle_timeout_secs(),
            worker_command: default_worker_command(),
            worker_args: Vec::new(),
        }
    }
}

fn default_tier() -> PermissionTier {
    PermissionTier::Minimal
}

fn default_port() -> u16 {
    4311
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_worker_command() -> String {
    "pml-sandbox-worker".into()
}

/// One registered stdio MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServerConfig {
    /// Executable invoked to start the server.
    pub command: String,
    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables the server process receives. Unlike a
    /// sandbox worker, a stdio MCP server is a host-trusted process and
    /// may legitimately need secrets here (e.g. `NOTION_API_KEY`).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Seconds before an unanswered call to this server is treated as
    /// `ToolTimeout`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Errors found while validating a loaded [`PmlConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A server entry failed validation.
    InvalidServer {
        /// The server's registered name.
        name: String,
        /// Why the entry was rejected.
        reason: String,
    },
    /// A `timeout_secs` value was out of the accepted range.
    InvalidTimeout {
        /// The offending value.
        value: u64,
    },
    /// A required field was empty or missing.
    MissingRequiredField {
        /// The field's name.
        field: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidServer { name, reason } => write!(f, "invalid server `{name}`: {reason}"),
            ConfigError::InvalidTimeout { value } => write!(f, "invalid timeout: {value}s (must be 1..86400)"),
            ConfigError::MissingRequiredField { field } => write!(f, "missing required field: {field}"),
        }
    }
}

impl std::error::Error for ConfigError {}

const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Load and parse `path` as a [`PmlConfig`]. Returns the default config
/// (no servers registered) if `path` does not exist, matching `init`'s
/// "config is optional until you register a server" posture.
pub fn load_config(path: &Path) -> anyhow::Result<PmlConfig> {
    if !path.exists() {
        return Ok(PmlConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", path.display()))?;
    let config: PmlConfig = toml::from_str(&content).map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {e}", path.display()))?;
    Ok(config)
}

/// Validate a loaded config, returning every problem found rather than
/// stopping at the first.
pub fn validate_config(config: &PmlConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    for (name, server) in &config.servers {
        if name.trim().is_empty() {
            errors.push(ConfigError::MissingRequiredField { field: "server name".into() });
        }
        if server.command.trim().is_empty() {
            errors.push(ConfigError::InvalidServer { name: name.clone(), reason: "command must not be empty".into() });
        }
        if let Some(t) = server.timeout_secs {
            if t == 0 || t > MAX_TIMEOUT_SECS {
                errors.push(ConfigError::InvalidTimeout { value: t });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Default location of a workspace's config file.
#[must_use]
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(".pml").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&config_path(dir.path())).unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.port, default_port());
    }

    #[test]
    fn validate_empty_command_is_invalid() {
        let config = PmlConfig {
            servers: BTreeMap::from([("notion".into(), ServerConfig { command: "  ".into(), args: vec![], env: BTreeMap::new(), timeout_secs: None })]),
            ..PmlConfig::default()
        };
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, ConfigError::InvalidServer { .. })));
    }

    #[test]
    fn validate_zero_timeout_is_invalid() {
        let config = PmlConfig {
            servers: BTreeMap::from([("notion".into(), ServerConfig { command: "notion-mcp".into(), args: vec![], env: BTreeMap::new(), timeout_secs: Some(0) })]),
            ..PmlConfig::default()
        };
        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, ConfigError::InvalidTimeout { value: 0 })));
    }

    #[test]
    fn validate_valid_config_succeeds() {
        let config = PmlConfig {
            servers: BTreeMap::from([("notion".into(), ServerConfig { command: "notion-mcp".into(), args: vec!["--stdio".into()], env: BTreeMap::new(), timeout_secs: Some(30) })]),
            ..PmlConfig::default()
        };
        validate_config(&config).unwrap();
    }

    #[test]
    fn parses_toml_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "port = 9000\n\n[servers.notion]\ncommand = \"notion-mcp\"\nargs = [\"--stdio\"]\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.servers["notion"].command, "notion-mcp");
    }
}
