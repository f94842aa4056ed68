//! Test doubles for drivers and tunnels
//!
//! Every double writes to a shared `CallLog`, so tests can assert what was
//! opened, run and closed without touching the network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::{Connection, DataEngine, Tunnel, TunnelOpener};
use crate::engine::types::{Engine, ServerProfile, StatementOutput, TunnelSpec};

pub const FAKE_TUNNEL_PORT: u16 = 40_000;

/// Profile pointing at localhost with the engine's default port
pub fn profile(name: &str, engine: Engine) -> ServerProfile {
    ServerProfile {
        name: name.to_string(),
        description: String::new(),
        engine,
        host: "localhost".into(),
        port: match engine {
            Engine::MySql => 3306,
            Engine::Postgres => 5432,
        },
        schema: "test_db".into(),
        user: "agent".into(),
        password: "secret".into(),
        read_only: false,
        ssh_tunnel: None,
    }
}

/// Shared, ordered record of calls made on the doubles
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// SQL passed to `Connection::run`, in order
    pub fn statements(&self) -> Vec<String> {
        self.with_prefix("run:")
    }

    /// Bind lists passed to `Connection::fetch`, in order
    pub fn fetch_binds(&self) -> Vec<Vec<String>> {
        self.with_prefix("binds:")
            .into_iter()
            .map(|binds| {
                if binds.is_empty() {
                    Vec::new()
                } else {
                    binds.split(',').map(str::to_string).collect()
                }
            })
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

/// Scripted connection: answers `run` and `fetch` from a queue
pub struct FakeConnection {
    engine: Engine,
    log: CallLog,
    responses: VecDeque<EngineResult<StatementOutput>>,
    delay: Option<Duration>,
    closed: bool,
}

impl FakeConnection {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            log: CallLog::new(),
            responses: VecDeque::new(),
            delay: None,
            closed: false,
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_output(mut self, output: StatementOutput) -> Self {
        self.responses.push_back(Ok(output));
        self
    }

    pub fn with_failure(mut self, message: &str) -> Self {
        self.responses
            .push_back(Err(EngineError::query_failed(message)));
        self
    }

    pub fn with_responses(
        mut self,
        responses: impl IntoIterator<Item = EngineResult<StatementOutput>>,
    ) -> Self {
        self.responses.extend(responses);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    async fn next_response(&mut self, fallback: StatementOutput) -> EngineResult<StatementOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses.pop_front().unwrap_or(Ok(fallback))
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn run(&mut self, sql: &str, _expects_rows: bool) -> EngineResult<StatementOutput> {
        self.log.record(format!("run:{sql}"));
        self.next_response(StatementOutput::Affected(0)).await
    }

    async fn fetch(&mut self, sql: &str, binds: &[&str]) -> EngineResult<StatementOutput> {
        self.log.record(format!("fetch:{sql}"));
        self.log.record(format!("binds:{}", binds.join(",")));
        self.next_response(StatementOutput::Rows {
            columns: Vec::new(),
            rows: Vec::new(),
        })
        .await
    }

    async fn close(&mut self) -> EngineResult<()> {
        if !self.closed {
            self.closed = true;
            self.log.record("close");
        }
        Ok(())
    }
}

/// Driver double handing out `FakeConnection`s
pub struct FakeEngine {
    engine: Engine,
    log: CallLog,
    responses: Mutex<Vec<EngineResult<StatementOutput>>>,
    statement_delay: Option<Duration>,
    connect_error: Option<EngineError>,
}

impl FakeEngine {
    pub fn new(engine: Engine, log: CallLog) -> Self {
        Self {
            engine,
            log,
            responses: Mutex::new(Vec::new()),
            statement_delay: None,
            connect_error: None,
        }
    }

    /// Responses every new connection starts with
    pub fn with_responses(
        self,
        responses: impl IntoIterator<Item = EngineResult<StatementOutput>>,
    ) -> Self {
        self.responses.lock().unwrap().extend(responses);
        self
    }

    /// Every statement on the handed-out connections sleeps this long first
    pub fn with_statement_delay(mut self, delay: Duration) -> Self {
        self.statement_delay = Some(delay);
        self
    }

    pub fn failing(mut self, error: EngineError) -> Self {
        self.connect_error = Some(error);
        self
    }
}

#[async_trait]
impl DataEngine for FakeEngine {
    fn engine(&self) -> Engine {
        self.engine
    }

    fn driver_name(&self) -> &'static str {
        "fake"
    }

    async fn connect(
        &self,
        _profile: &ServerProfile,
        host: &str,
        port: u16,
    ) -> EngineResult<Box<dyn Connection>> {
        self.log.record(format!("connect:{host}:{port}"));
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }
        let responses = self.responses.lock().unwrap().clone();
        let mut connection = FakeConnection::new(self.engine)
            .with_log(self.log.clone())
            .with_responses(responses);
        if let Some(delay) = self.statement_delay {
            connection = connection.with_delay(delay);
        }
        Ok(Box::new(connection))
    }
}

pub struct FakeTunnel {
    log: CallLog,
    forward_error: Option<String>,
    closed: bool,
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn local_port(&self) -> u16 {
        FAKE_TUNNEL_PORT
    }

    fn forwarding_error(&self) -> Option<String> {
        self.forward_error.clone()
    }

    async fn close(&mut self) -> EngineResult<()> {
        if !self.closed {
            self.closed = true;
            self.log.record("tunnel_close");
        }
        Ok(())
    }
}

/// Tunnel opener double
///
/// `rejecting` simulates a wrong SSH password; `refusing_forward` opens the
/// tunnel but reports that the bastion refused the forwarded channel.
#[derive(Default)]
pub struct FakeTunnelOpener {
    log: CallLog,
    reject: bool,
    forward_error: Option<String>,
    delay: Option<Duration>,
}

impl FakeTunnelOpener {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn rejecting(log: CallLog) -> Self {
        Self {
            log,
            reject: true,
            ..Self::default()
        }
    }

    pub fn refusing_forward(log: CallLog) -> Self {
        Self {
            log,
            forward_error: Some("Channel open failure: administratively prohibited".into()),
            ..Self::default()
        }
    }

    /// The SSH handshake takes this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TunnelOpener for FakeTunnelOpener {
    async fn open(
        &self,
        spec: &TunnelSpec,
        remote_host: &str,
        remote_port: u16,
    ) -> EngineResult<Box<dyn Tunnel>> {
        self.log
            .record(format!("tunnel_open:{}->{remote_host}:{remote_port}", spec.host));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(EngineError::tunnel(format!(
                "SSH authentication rejected for {}@{}",
                spec.user, spec.host
            )));
        }
        Ok(Box::new(FakeTunnel {
            log: self.log.clone(),
            forward_error: self.forward_error.clone(),
            closed: false,
        }))
    }
}
