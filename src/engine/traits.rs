//! Driver and tunnel traits
//!
//! These are the seams between the engine and the network. The production
//! implementations live in `drivers/` and `ssh_tunnel.rs`; tests swap in
//! doubles that record calls instead of touching the network.

use async_trait::async_trait;

use crate::engine::error::EngineResult;
use crate::engine::types::{Engine, ServerProfile, StatementOutput, TunnelSpec};

/// A live, exclusively owned database session
///
/// Never pooled: one request opens it, uses it, and closes it.
#[async_trait]
pub trait Connection: Send {
    /// Engine this connection talks to
    fn engine(&self) -> Engine;

    /// Runs one statement verbatim
    ///
    /// When `expects_rows` is set and the statement yields no rows, the
    /// driver still tries to report the column names.
    /// SQL-level failures come back as `EngineError::QueryFailed`.
    async fn run(&mut self, sql: &str, expects_rows: bool) -> EngineResult<StatementOutput>;

    /// Runs a parameterized query with text binds
    ///
    /// Used for introspection, where identifiers supplied by the caller must
    /// never be spliced into the SQL text.
    async fn fetch(&mut self, sql: &str, binds: &[&str]) -> EngineResult<StatementOutput>;

    /// Closes the session. Calling it again is a no-op.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Engine-specific connection opener
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Engine served by this driver
    fn engine(&self) -> Engine;

    /// Returns a human-readable name for this driver
    fn driver_name(&self) -> &'static str;

    /// Opens a connection to `host:port` using the profile's schema and credentials
    ///
    /// `host`/`port` are the tunnel's local endpoint when a tunnel is active.
    async fn connect(
        &self,
        profile: &ServerProfile,
        host: &str,
        port: u16,
    ) -> EngineResult<Box<dyn Connection>>;
}

/// An open local-to-remote forwarded port
#[async_trait]
pub trait Tunnel: Send {
    /// Local port forwarding to the remote database
    fn local_port(&self) -> u16;

    /// First failure to open a forwarded channel on the SSH host, if any
    ///
    /// A database connect that fails after such a failure was never
    /// forwarded past the bastion.
    fn forwarding_error(&self) -> Option<String> {
        None
    }

    /// Closes the forwarded port and the SSH session. Idempotent.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Opens SSH tunnels
#[async_trait]
pub trait TunnelOpener: Send + Sync {
    async fn open(
        &self,
        spec: &TunnelSpec,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Box<dyn Tunnel>>;
}
