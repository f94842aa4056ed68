//! Session Manager
//!
//! Scoped acquisition of the per-request resources: an optional SSH tunnel
//! and exactly one database connection. Nothing is shared between requests.
//!
//! `acquire` returns a `Session` lease. Callers finish with
//! `Session::release`, which closes the connection and then the tunnel.
//! A lease dropped without release (cancelled request, panic) still tears
//! everything down through the tunnel's and connection's own `Drop`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::instrument;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::factory::ConnectionFactory;
use crate::engine::traits::{Connection, Tunnel, TunnelOpener};
use crate::engine::types::ServerProfile;
use crate::policy::ExecutionPolicy;

const TUNNEL_LOCAL_HOST: &str = "127.0.0.1";

/// Resources held by one request
///
/// Field order matters: the connection is dropped before the tunnel it
/// runs through.
pub struct Session {
    connection: Box<dyn Connection>,
    tunnel: Option<Box<dyn Tunnel>>,
    factory: Arc<ConnectionFactory>,
    close_timeout: Duration,
}

impl Session {
    pub fn connection(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    /// Local port of the tunnel, if the session runs through one
    pub fn tunnel_port(&self) -> Option<u16> {
        self.tunnel.as_ref().map(|t| t.local_port())
    }

    /// Closes the connection, then the tunnel
    ///
    /// Teardown failures are logged; they never replace the outcome of the
    /// operation that ran inside the session.
    pub async fn release(self) {
        let Session {
            mut connection,
            tunnel,
            factory,
            close_timeout,
        } = self;

        match timeout(close_timeout, factory.disconnect(connection.as_mut())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to close database connection: {}", e),
            Err(_) => tracing::warn!("Closing the database connection timed out, dropping it"),
        }
        drop(connection);

        if let Some(tunnel) = tunnel {
            close_tunnel(tunnel, close_timeout).await;
        }
    }
}

async fn close_tunnel(mut tunnel: Box<dyn Tunnel>, close_timeout: Duration) {
    match timeout(close_timeout, tunnel.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Failed to close SSH tunnel: {}", e),
        Err(_) => tracing::warn!("Closing the SSH tunnel timed out, dropping it"),
    }
}

/// Opens tunnels and connections for requests
pub struct SessionManager {
    factory: Arc<ConnectionFactory>,
    tunnels: Arc<dyn TunnelOpener>,
    policy: ExecutionPolicy,
}

impl SessionManager {
    pub fn new(
        factory: Arc<ConnectionFactory>,
        tunnels: Arc<dyn TunnelOpener>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            factory,
            tunnels,
            policy,
        }
    }

    /// Opens the tunnel (if configured) and the connection for `profile`
    ///
    /// On failure everything opened so far is closed before the error is
    /// returned. A tunnel failure means no connection is attempted.
    #[instrument(
        skip(self, profile),
        fields(
            server = %profile.name,
            engine = %profile.engine,
            tunnel = profile.ssh_tunnel.is_some()
        )
    )]
    pub async fn acquire(&self, profile: &ServerProfile) -> EngineResult<Session> {
        let close_timeout = self.policy.connect_timeout();

        let (host, port, tunnel) = match &profile.ssh_tunnel {
            Some(spec) => {
                let opened = timeout(
                    self.policy.ssh_timeout(),
                    self.tunnels.open(spec, &profile.host, profile.port),
                )
                .await
                .map_err(|_| EngineError::timeout("SSH tunnel setup", self.policy.ssh_timeout_ms))??;
                let local_port = opened.local_port();
                (TUNNEL_LOCAL_HOST.to_string(), local_port, Some(opened))
            }
            None => (profile.host.clone(), profile.port, None),
        };

        let connected = timeout(
            self.policy.connect_timeout(),
            self.factory.connect(profile, &host, port),
        )
        .await
        .map_err(|_| EngineError::timeout("database connection", self.policy.connect_timeout_ms))
        .and_then(|result| result);

        match connected {
            Ok(connection) => Ok(Session {
                connection,
                tunnel,
                factory: Arc::clone(&self.factory),
                close_timeout,
            }),
            Err(e) => {
                let e = match tunnel.as_ref().and_then(|t| t.forwarding_error()) {
                    Some(reason) => EngineError::tunnel(format!(
                        "SSH host could not forward to {}:{}: {}",
                        profile.host, profile.port, reason
                    )),
                    None => e,
                };
                tracing::warn!(error = %e, "Failed to open database connection");
                if let Some(tunnel) = tunnel {
                    close_tunnel(tunnel, close_timeout).await;
                }
                Err(e)
            }
        }
    }
}
