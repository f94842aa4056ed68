// SQL Agent - query access to configured MySQL and PostgreSQL servers
// Core library

pub mod config;
pub mod engine;
pub mod observability;
pub mod policy;

use std::path::Path;
use std::sync::Arc;

use tracing::{field, instrument};

use config::AgentConfig;
use engine::admin::{self, AdminArgs, AdminCommand};
use engine::{
    ConnectionFactory, EngineResult, QueryExecutor, QueryResult, RequestId, SchemaInspector,
    ServerProfile, ServerRegistry, ServerSummary, SessionManager, SshTunnelOpener, TableColumn,
    TableIndex, TunnelOpener,
};
use policy::ExecutionPolicy;

pub use engine::EngineError;
pub use observability::init_tracing;

/// Entry point for the front-end
///
/// Every operation resolves its server, opens its own tunnel and connection,
/// and releases both before returning.
pub struct SqlAgent {
    registry: Arc<ServerRegistry>,
    sessions: SessionManager,
    executor: QueryExecutor,
}

impl SqlAgent {
    /// Creates an agent backed by the SQLx drivers and russh tunnels
    pub fn new(registry: ServerRegistry, policy: ExecutionPolicy) -> Self {
        Self::with_components(
            registry,
            policy,
            ConnectionFactory::new(),
            Arc::new(SshTunnelOpener),
        )
    }

    pub fn with_components(
        registry: ServerRegistry,
        policy: ExecutionPolicy,
        factory: ConnectionFactory,
        tunnels: Arc<dyn TunnelOpener>,
    ) -> Self {
        let sessions = SessionManager::new(Arc::new(factory), tunnels, policy.clone());
        Self {
            registry: Arc::new(registry),
            sessions,
            executor: QueryExecutor::new(policy),
        }
    }

    pub fn from_config_file(path: &Path) -> EngineResult<Self> {
        let (registry, policy) = AgentConfig::load_from_file(path)?.into_parts()?;
        tracing::info!(
            path = %path.display(),
            servers = registry.len(),
            "Configuration loaded"
        );
        Ok(Self::new(registry, policy))
    }

    /// Loads the config file found by `config::config_path`
    pub fn from_env() -> EngineResult<Self> {
        Self::from_config_file(&config::config_path())
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        self.executor.policy()
    }

    /// Configured servers, without credentials
    pub fn list_servers(&self) -> Vec<ServerSummary> {
        self.registry.list()
    }

    #[instrument(
        skip(self),
        fields(request_id = %RequestId::new(), engine = field::Empty, tunnel = field::Empty)
    )]
    pub async fn list_tables(&self, server: &str) -> EngineResult<Vec<String>> {
        let profile = self.resolve(server)?;
        let mut session = self.sessions.acquire(&profile).await?;

        let outcome = SchemaInspector::new(&self.executor)
            .list_tables(session.connection(), profile.engine)
            .await;

        session.release().await;
        outcome
    }

    #[instrument(
        skip(self),
        fields(request_id = %RequestId::new(), engine = field::Empty, tunnel = field::Empty)
    )]
    pub async fn describe_table(&self, server: &str, table: &str) -> EngineResult<Vec<TableColumn>> {
        let profile = self.resolve(server)?;
        let mut session = self.sessions.acquire(&profile).await?;

        let outcome = SchemaInspector::new(&self.executor)
            .describe_table(session.connection(), profile.engine, table)
            .await;

        session.release().await;
        outcome
    }

    #[instrument(
        skip(self),
        fields(request_id = %RequestId::new(), engine = field::Empty, tunnel = field::Empty)
    )]
    pub async fn list_indexes(&self, server: &str, table: &str) -> EngineResult<Vec<TableIndex>> {
        let profile = self.resolve(server)?;
        let mut session = self.sessions.acquire(&profile).await?;

        let outcome = SchemaInspector::new(&self.executor)
            .list_indexes(session.connection(), profile.engine, table)
            .await;

        session.release().await;
        outcome
    }

    /// Runs one SQL statement
    ///
    /// SQL errors come back as `success = false`; validation, tunnel,
    /// connection and timeout failures are raised.
    #[instrument(
        skip(self, sql),
        fields(
            request_id = %RequestId::new(),
            sql_len = sql.len(),
            engine = field::Empty,
            tunnel = field::Empty
        )
    )]
    pub async fn execute(&self, server: &str, sql: &str) -> EngineResult<QueryResult> {
        let profile = self.resolve(server)?;
        let plan = self.executor.validate(&profile, sql)?;
        let mut session = self.sessions.acquire(&profile).await?;

        let outcome = self.executor.run(session.connection(), sql, plan).await;

        session.release().await;
        outcome
    }

    /// Runs a MySQL administrative command
    ///
    /// Rejected before anything is opened when the server is not MySQL.
    #[instrument(
        skip(self, args),
        fields(request_id = %RequestId::new(), engine = field::Empty, tunnel = field::Empty)
    )]
    pub async fn admin(
        &self,
        server: &str,
        command: &str,
        args: Option<AdminArgs>,
    ) -> EngineResult<QueryResult> {
        let profile = self.resolve(server)?;
        let command: AdminCommand = command.parse()?;
        admin::guard(&profile, command)?;
        let args = args.unwrap_or_default();
        admin::check_args(command, &args)?;

        let mut session = self.sessions.acquire(&profile).await?;

        let outcome = admin::run(&self.executor, session.connection(), command, &args).await;

        session.release().await;
        outcome
    }

    fn resolve(&self, server: &str) -> EngineResult<Arc<ServerProfile>> {
        let profile = self.registry.resolve(server)?;
        let span = tracing::Span::current();
        span.record("engine", field::display(profile.engine));
        span.record("tunnel", profile.ssh_tunnel.is_some());
        Ok(profile)
    }
}
