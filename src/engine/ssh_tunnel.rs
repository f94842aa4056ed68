//! SSH Tunnel
//!
//! Provides SSH tunneling for connecting to databases behind firewalls.
//! A tunnel lives for exactly one request: it binds an ephemeral local
//! port, forwards every accepted connection through a `direct-tcpip`
//! channel, and is torn down before the request returns.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::{Tunnel, TunnelOpener};
use crate::engine::types::{SshAuth, TunnelSpec};

type SshHandle = client::Handle<SshClientHandler>;

/// SSH client handler for russh.
struct SshClientHandler;

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key pinning is not part of the profile format
        Ok(true)
    }
}

/// Represents an active SSH tunnel
pub struct SshTunnel {
    local_port: u16,
    endpoint: String,
    session: Option<Arc<SshHandle>>,
    cancel_token: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    forward_error: Arc<OnceLock<String>>,
}

impl SshTunnel {
    /// Opens an SSH tunnel to `remote_host:remote_port` as seen from the SSH host
    ///
    /// Fails with `EngineError::Tunnel` when the SSH host is unreachable,
    /// authentication is rejected, or the local port cannot be bound.
    pub async fn open(spec: &TunnelSpec, remote_host: &str, remote_port: u16) -> EngineResult<Self> {
        let endpoint = format!("{}@{}:{}", spec.user, spec.host, spec.port);
        tracing::debug!(ssh = %endpoint, "Opening SSH session");

        let session = Arc::new(Self::connect_ssh(spec).await?);

        // Keep the listener: the ephemeral port stays ours until close
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(e) => {
                Self::disconnect(&session).await;
                return Err(EngineError::tunnel(format!("Failed to bind local port: {e}")));
            }
        };
        let local_port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                Self::disconnect(&session).await;
                return Err(EngineError::tunnel(format!("Failed to get local address: {e}")));
            }
        };

        let cancel_token = CancellationToken::new();
        let forward_error = Arc::new(OnceLock::new());
        let accept_task = tokio::spawn(Self::run_tunnel(
            listener,
            Arc::clone(&session),
            remote_host.to_string(),
            remote_port,
            cancel_token.clone(),
            Arc::clone(&forward_error),
        ));

        tracing::info!(
            ssh = %endpoint,
            local_port,
            remote = %format!("{remote_host}:{remote_port}"),
            "SSH tunnel established"
        );

        Ok(Self {
            local_port,
            endpoint,
            session: Some(session),
            cancel_token,
            accept_task: Some(accept_task),
            forward_error,
        })
    }

    /// Returns the local port to connect to
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Closes the tunnel
    pub async fn close(&mut self) -> EngineResult<()> {
        self.cancel_token.cancel();

        if let Some(task) = self.accept_task.take() {
            // The listener and all forwarders are gone once this resolves
            let _ = task.await;
        }

        if let Some(session) = self.session.take() {
            Self::disconnect(&session).await;
            tracing::info!(ssh = %self.endpoint, local_port = self.local_port, "SSH tunnel closed");
        }
        Ok(())
    }

    async fn connect_ssh(spec: &TunnelSpec) -> EngineResult<SshHandle> {
        let config = Arc::new(client::Config::default());

        let mut handle = client::connect(config, (spec.host.as_str(), spec.port), SshClientHandler)
            .await
            .map_err(|e| {
                EngineError::tunnel(format!(
                    "Failed to connect to SSH server {}:{}: {}",
                    spec.host, spec.port, e
                ))
            })?;

        let authenticated = match &spec.auth {
            SshAuth::Password { password } => handle
                .authenticate_password(&spec.user, password)
                .await
                .map_err(|e| EngineError::tunnel(format!("SSH password authentication failed: {e}")))?,
            SshAuth::Key {
                private_key_path,
                passphrase,
            } => {
                let key = Self::load_private_key(private_key_path, passphrase.as_deref()).await?;
                handle
                    .authenticate_publickey(&spec.user, key)
                    .await
                    .map_err(|e| EngineError::tunnel(format!("SSH key authentication failed: {e}")))?
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(EngineError::tunnel(format!(
                "SSH authentication rejected for {}@{}",
                spec.user, spec.host
            )));
        }

        tracing::debug!(user = %spec.user, host = %spec.host, "SSH authentication successful");
        Ok(handle)
    }

    /// Load a private key from a file.
    async fn load_private_key(path: &str, passphrase: Option<&str>) -> EngineResult<Arc<KeyPair>> {
        let key_data = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::tunnel(format!("Failed to read SSH key file {path}: {e}")))?;

        let key = russh_keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
            .map_err(|e| {
                let hint = if passphrase.is_some() {
                    "check the key passphrase"
                } else {
                    "the key may be encrypted, set private_key_passphrase"
                };
                EngineError::tunnel(format!("Failed to decode SSH key {path}: {e} ({hint})"))
            })?;

        Ok(Arc::new(key))
    }

    async fn disconnect(session: &SshHandle) {
        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
    }

    /// Run the tunnel forwarding loop.
    async fn run_tunnel(
        listener: TcpListener,
        session: Arc<SshHandle>,
        remote_host: String,
        remote_port: u16,
        cancel_token: CancellationToken,
        forward_error: Arc<OnceLock<String>>,
    ) {
        let mut forwarders = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((local_stream, peer_addr)) => {
                        tracing::debug!(%peer_addr, "New tunnel connection");
                        forwarders.spawn(Self::forward_connection(
                            local_stream,
                            Arc::clone(&session),
                            remote_host.clone(),
                            remote_port,
                            peer_addr.port(),
                            cancel_token.clone(),
                            Arc::clone(&forward_error),
                        ));
                    }
                    Err(e) => tracing::warn!("Failed to accept tunnel connection: {}", e),
                },
                _ = cancel_token.cancelled() => break,
            }
        }

        drop(listener);
        forwarders.shutdown().await;
    }

    /// Forward a single connection through the SSH tunnel.
    async fn forward_connection(
        mut local_stream: TcpStream,
        session: Arc<SshHandle>,
        remote_host: String,
        remote_port: u16,
        originator_port: u16,
        cancel_token: CancellationToken,
        forward_error: Arc<OnceLock<String>>,
    ) {
        let channel = match session
            .channel_open_direct_tcpip(
                remote_host.as_str(),
                remote_port as u32,
                "127.0.0.1",
                originator_port as u32,
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!("Failed to open SSH channel to {}:{}: {}", remote_host, remote_port, e);
                // Recorded before the local socket drops, so the client's
                // connect error can be attributed to the tunnel
                let _ = forward_error.set(e.to_string());
                return;
            }
        };
        drop(session);

        let mut remote_stream = channel.into_stream();
        tokio::select! {
            copied = tokio::io::copy_bidirectional(&mut local_stream, &mut remote_stream) => {
                if let Err(e) = copied {
                    tracing::debug!("Tunnel forwarding ended: {}", e);
                }
            }
            _ = cancel_token.cancelled() => {}
        }
    }
}

#[async_trait]
impl Tunnel for SshTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn forwarding_error(&self) -> Option<String> {
        self.forward_error.get().cloned()
    }

    async fn close(&mut self) -> EngineResult<()> {
        SshTunnel::close(self).await
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        // Cancellation path: stop forwarding and drop the session
        self.cancel_token.cancel();
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Opens real SSH tunnels
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTunnelOpener;

#[async_trait]
impl TunnelOpener for SshTunnelOpener {
    async fn open(
        &self,
        spec: &TunnelSpec,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Box<dyn Tunnel>> {
        let tunnel = SshTunnel::open(spec, remote_host, remote_port).await?;
        Ok(Box::new(tunnel))
    }
}
