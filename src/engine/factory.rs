//! Connection Factory
//!
//! Holds one driver per supported engine and opens short-lived connections
//! by switching on the profile's engine.

use std::sync::Arc;

use crate::engine::drivers::mysql::MySqlDriver;
use crate::engine::drivers::postgres::PostgresDriver;
use crate::engine::error::EngineResult;
use crate::engine::traits::{Connection, DataEngine};
use crate::engine::types::{Engine, ServerProfile};

pub struct ConnectionFactory {
    mysql: Arc<dyn DataEngine>,
    postgres: Arc<dyn DataEngine>,
}

impl ConnectionFactory {
    /// Creates a factory backed by the SQLx drivers
    pub fn new() -> Self {
        Self::with_drivers(Arc::new(MySqlDriver::new()), Arc::new(PostgresDriver::new()))
    }

    pub fn with_drivers(mysql: Arc<dyn DataEngine>, postgres: Arc<dyn DataEngine>) -> Self {
        Self { mysql, postgres }
    }

    /// Gets the driver serving `engine`
    pub fn driver(&self, engine: Engine) -> &Arc<dyn DataEngine> {
        match engine {
            Engine::MySql => &self.mysql,
            Engine::Postgres => &self.postgres,
        }
    }

    /// Opens a connection for `profile` at the effective endpoint
    ///
    /// `host`/`port` are the tunnel's local endpoint when a tunnel is active,
    /// otherwise the profile's own.
    pub async fn connect(
        &self,
        profile: &ServerProfile,
        host: &str,
        port: u16,
    ) -> EngineResult<Box<dyn Connection>> {
        let driver = self.driver(profile.engine);
        tracing::debug!(
            driver = driver.driver_name(),
            host,
            port,
            schema = %profile.schema,
            "Opening database connection"
        );

        let connection = driver.connect(profile, host, port).await?;
        tracing::info!(engine = %profile.engine, host, port, "Database connection opened");
        Ok(connection)
    }

    /// Closes a connection; closing twice is a no-op
    pub async fn disconnect(&self, connection: &mut dyn Connection) -> EngineResult<()> {
        connection.close().await?;
        tracing::debug!(engine = %connection.engine(), "Database connection closed");
        Ok(())
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::{ConnectionFailure, EngineError};
    use crate::engine::testing::{profile, CallLog, FakeEngine};

    fn fake_factory(log: &CallLog) -> ConnectionFactory {
        ConnectionFactory::with_drivers(
            Arc::new(FakeEngine::new(Engine::MySql, log.clone())),
            Arc::new(
                FakeEngine::new(Engine::Postgres, log.clone()).failing(EngineError::connection(
                    ConnectionFailure::Authentication,
                    "password authentication failed for user \"agent\"",
                )),
            ),
        )
    }

    #[tokio::test]
    async fn dispatches_on_profile_engine() {
        let log = CallLog::new();
        let factory = fake_factory(&log);

        let conn = factory
            .connect(&profile("dev-mysql", Engine::MySql), "localhost", 3306)
            .await
            .expect("mysql fake connects");
        assert_eq!(conn.engine(), Engine::MySql);

        let err = factory
            .connect(&profile("pg", Engine::Postgres), "127.0.0.1", 40_000)
            .await
            .err()
            .expect("postgres fake rejects");
        assert!(matches!(
            err,
            EngineError::Connection {
                failure: ConnectionFailure::Authentication,
                ..
            }
        ));

        assert_eq!(
            log.events(),
            vec!["connect:localhost:3306", "connect:127.0.0.1:40000"]
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let log = CallLog::new();
        let factory = fake_factory(&log);
        let mut conn = factory
            .connect(&profile("dev-mysql", Engine::MySql), "localhost", 3306)
            .await
            .unwrap();

        factory.disconnect(conn.as_mut()).await.unwrap();
        factory.disconnect(conn.as_mut()).await.unwrap();

        assert_eq!(log.count("close"), 1);
    }

    #[test]
    fn default_factory_uses_sqlx_drivers() {
        let factory = ConnectionFactory::new();
        assert_eq!(factory.driver(Engine::MySql).engine(), Engine::MySql);
        assert_eq!(factory.driver(Engine::Postgres).driver_name(), "PostgreSQL");
    }
}
