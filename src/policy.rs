//! Execution policy configuration.
//!
//! Defaults can be set in the `policy` section of the config file.
//! Environment variables override any stored values to allow managed
//! deployments to enforce policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::types::DEFAULT_BINARY_PREVIEW_BYTES;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Bound on the SSH handshake and authentication
    pub ssh_timeout_ms: u64,
    /// Bound on opening the database connection
    pub connect_timeout_ms: u64,
    /// Bound on a single statement
    pub statement_timeout_ms: u64,
    /// Hex preview length for binary values
    pub binary_preview_bytes: usize,
    /// Rejects DROP/TRUNCATE/ALTER and unfiltered UPDATE/DELETE
    pub block_dangerous_sql: bool,
}

fn env_bool_opt(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64_opt(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring non-numeric policy override");
            None
        }
    }
}

impl ExecutionPolicy {
    fn defaults() -> Self {
        Self {
            ssh_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            statement_timeout_ms: 30_000,
            binary_preview_bytes: DEFAULT_BINARY_PREVIEW_BYTES,
            block_dangerous_sql: false,
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_u64_opt("SQL_AGENT_SSH_TIMEOUT_MS") {
            self.ssh_timeout_ms = value;
        }
        if let Some(value) = env_u64_opt("SQL_AGENT_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = value;
        }
        if let Some(value) = env_u64_opt("SQL_AGENT_STATEMENT_TIMEOUT_MS") {
            self.statement_timeout_ms = value;
        }
        if let Some(value) = env_u64_opt("SQL_AGENT_BINARY_PREVIEW_BYTES") {
            self.binary_preview_bytes = value as usize;
        }
        if let Some(value) = env_bool_opt("SQL_AGENT_BLOCK_DANGEROUS") {
            self.block_dangerous_sql = value;
        }
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut policy = Self::defaults();
        policy.apply_env_overrides();
        policy
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}
