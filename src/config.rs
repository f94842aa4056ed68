//! Configuration file loading.
//!
//! The file is JSON: a `servers` list (alias `mysql_servers`) and an
//! optional `policy` section. Environment variables override the policy.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::{ServerEntry, ServerRegistry};
use crate::policy::ExecutionPolicy;

const CONFIG_ENV: &str = "SQL_AGENT_CONFIG";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(alias = "mysql_servers")]
    pub servers: Vec<ServerEntry>,
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

impl AgentConfig {
    pub fn from_json(raw: &str) -> EngineResult<Self> {
        serde_json::from_str(raw).map_err(|e| EngineError::config(format!("Invalid config: {e}")))
    }

    pub fn load_from_file(path: &Path) -> EngineResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Validates the servers and finalizes the policy
    pub fn into_parts(self) -> EngineResult<(ServerRegistry, ExecutionPolicy)> {
        let registry = ServerRegistry::load(self.servers)?;
        let mut policy = self.policy;
        policy.apply_env_overrides();
        Ok((registry, policy))
    }
}

/// Locates the config file: `SQL_AGENT_CONFIG`, then `./config.json`,
/// then the per-user default.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }

    user_config_path()
}

fn user_config_path() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var_os("APPDATA")
            .unwrap_or_else(|| std::env::var_os("USERPROFILE").unwrap_or_default());
        let mut path = PathBuf::from(appdata);
        path.push("SqlAgent");
        path.push(CONFIG_FILE_NAME);
        path
    } else {
        let home = std::env::var_os("HOME").unwrap_or_default();
        let mut path = PathBuf::from(home);
        path.push(".sql-agent");
        path.push(CONFIG_FILE_NAME);
        path
    }
}
