//! Engine errors
//!
//! Infrastructure failures raised by the engine. SQL-level failures of a
//! user statement are not errors: they come back as a `QueryResult` with
//! `success = false`.

use serde::Serialize;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Why a database connection could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFailure {
    Authentication,
    Unreachable,
    UnknownSchema,
    Other,
}

impl std::fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Authentication => "authentication failed",
            Self::Unreachable => "server unreachable",
            Self::UnknownSchema => "unknown schema",
            Self::Other => "connection failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{what} not found: {name}")]
    NotFound { what: String, name: String },

    #[error("SSH tunnel error: {message}")]
    Tunnel { message: String },

    #[error("Connection error ({failure}): {message}")]
    Connection {
        failure: ConnectionFailure,
        message: String,
    },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Command '{command}' is not supported for {engine} servers")]
    UnsupportedOperation { command: String, engine: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Query failed: {message}")]
    QueryFailed { message: String },
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn server_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            what: "Server".into(),
            name: name.into(),
        }
    }

    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            what: "Table".into(),
            name: name.into(),
        }
    }

    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
        }
    }

    pub fn connection(failure: ConnectionFailure, message: impl Into<String>) -> Self {
        Self::Connection {
            failure,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported(command: impl Into<String>, engine: impl std::fmt::Display) -> Self {
        Self::UnsupportedOperation {
            command: command.into(),
            engine: engine.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
        }
    }

    /// Stable machine-readable kind, matching the serialized `kind` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::NotFound { .. } => "not_found",
            Self::Tunnel { .. } => "tunnel",
            Self::Connection { .. } => "connection",
            Self::Validation { .. } => "validation",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::Timeout { .. } => "timeout",
            Self::QueryFailed { .. } => "query_failed",
        }
    }
}
