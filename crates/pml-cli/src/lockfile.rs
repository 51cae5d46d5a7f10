// SPDX-License-Identifier: MIT OR Apache-2.0
//! `{workspace}/.pml/mcp.lock`: pins registered stdio MCP servers to the
//! registry source they were fetched from and a content hash, so
//! `upgrade` has something to diff against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One pinned MCP server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedServer {
    /// The registry URL this entry was fetched from.
    pub source: String,
    /// sha256 of the raw registry response, hex-encoded.
    pub sha256: String,
    /// When this entry was last fetched or refreshed.
    pub fetched_at: DateTime<Utc>,
}

/// The parsed contents of `mcp.lock`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpLock {
    /// Locked servers, keyed by the local server name used in
    /// `config.toml`'s `servers` map.
    #[serde(default)]
    pub servers: BTreeMap<String, LockedServer>,
}

impl McpLock {
    /// Load the lockfile at `path`, or an empty one if it doesn't exist yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Write the lockfile to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Path to a workspace's lockfile.
#[must_use]
pub fn lock_path(workspace: &Path) -> PathBuf {
    workspace.join(".pml").join("mcp.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_lockfile_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lock = McpLock::load(&lock_path(dir.path())).unwrap();
        assert!(lock.servers.is_empty());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(dir.path());
        let mut lock = McpLock::default();
        lock.servers.insert(
            "notion".into(),
            LockedServer { source: "https://registry.example/org.proj.mcp.notion.ab12".into(), sha256: "deadbeef".into(), fetched_at: Utc::now() },
        );
        lock.save(&path).unwrap();
        let reloaded = McpLock::load(&path).unwrap();
        assert_eq!(reloaded, lock);
    }
}
