//! Universal data types for the SQL agent engine
//!
//! These types provide an engine-neutral representation of server profiles
//! and query results. No driver-native type crosses this boundary.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::engine::error::EngineError;

/// Identifier attached to one unit of work, for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Database product targeted by a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[serde(rename = "mysql")]
    MySql,
    Postgres,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            "postgres" => Ok(Self::Postgres),
            other => Err(EngineError::config(format!(
                "Unsupported engine '{other}' (expected mysql or postgres)"
            ))),
        }
    }
}

/// SSH authentication method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SshAuth {
    Password {
        #[serde(skip_serializing)]
        password: String,
    },
    Key {
        private_key_path: String,
        #[serde(skip_serializing)]
        passphrase: Option<String>,
    },
}

/// SSH tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

/// A named, immutable description of how to reach one database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub name: String,
    pub description: String,
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub schema: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Blocks mutating statements when set
    pub read_only: bool,
    pub ssh_tunnel: Option<TunnelSpec>,
}

impl ServerProfile {
    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            name: self.name.clone(),
            engine: self.engine,
            description: self.description.clone(),
            host: self.host.clone(),
            port: self.port,
            schema: self.schema.clone(),
            tunneled: self.ssh_tunnel.is_some(),
        }
    }
}

/// Credential-free view of a profile, for discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub engine: Engine,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub schema: String,
    pub tunneled: bool,
}

/// Universal value representation
///
/// `Bytes` only exists between a driver and the executor; shaping turns it
/// into a bounded textual placeholder before a result leaves the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    #[serde(serialize_with = "serialize_bytes_placeholder")]
    Bytes(Vec<u8>),
}

/// Default hex preview length used when raw bytes are serialized unshaped
pub const DEFAULT_BINARY_PREVIEW_BYTES: usize = 32;

fn serialize_bytes_placeholder<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&binary_placeholder(bytes, DEFAULT_BINARY_PREVIEW_BYTES))
}

/// Textual stand-in for a binary value: `<binary N bytes: 0x...>`
pub fn binary_placeholder(bytes: &[u8], preview_bytes: usize) -> String {
    let shown = bytes.len().min(preview_bytes);
    let ellipsis = if bytes.len() > shown { "..." } else { "" };
    format!(
        "<binary {} bytes: 0x{}{}>",
        bytes.len(),
        hex::encode(&bytes[..shown]),
        ellipsis
    )
}

impl Value {
    /// Converts driver-level values into their engine-neutral form
    pub fn shape(self, preview_bytes: usize) -> Value {
        match self {
            Value::Bytes(bytes) => {
                if bytes.len() <= preview_bytes {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        return Value::Text(text.to_string());
                    }
                }
                Value::Text(binary_placeholder(&bytes, preview_bytes))
            }
            other => other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// One result row: column name to value, in driver column order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    pub fn from_values(columns: &[String], values: Vec<Value>) -> Self {
        Self {
            entries: columns.iter().cloned().zip(values).collect(),
        }
    }

    /// First value stored under `column`
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Raw outcome of one statement, as reported by a driver
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutput {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Affected(u64),
}

/// Query execution result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub success: bool,
    /// Column names, empty for statements that return no rows
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Returned rows, or affected rows for DDL/DML
    pub row_count: u64,
    /// Wall-clock time of the driver call in milliseconds
    pub execution_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn with_rows(columns: Vec<String>, rows: Vec<Row>, time_ms: f64) -> Self {
        Self {
            success: true,
            columns,
            row_count: rows.len() as u64,
            rows,
            execution_time_ms: time_ms,
            error: None,
        }
    }

    pub fn with_affected_rows(affected: u64, time_ms: f64) -> Self {
        Self {
            success: true,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: affected,
            execution_time_ms: time_ms,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, time_ms: f64) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: time_ms,
            error: Some(error.into()),
        }
    }
}

/// Column metadata for table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableColumn {
    pub name: String,
    /// Data type (database-specific)
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Key role: `PRI`, `UNI`, `MUL` or empty
    pub key: String,
    /// Default value expression (if any)
    pub default: Option<String>,
}

/// One column of one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableIndex {
    pub name: String,
    pub column: String,
    pub unique: bool,
    /// 1-based position of the column inside the index
    pub position: u32,
}
