//! PostgreSQL Driver
//!
//! Implements the DataEngine trait for PostgreSQL databases using SQLx.
//!
//! User statements run through the simple query protocol, so every value
//! arrives in text format; types without a dedicated mapping fall back to
//! the server's textual rendering.

use async_trait::async_trait;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection as _, Either, Executor, Row, Statement};

use crate::engine::drivers::{closed_connection, iso_date, iso_datetime, iso_time, query_error};
use crate::engine::error::{ConnectionFailure, EngineError, EngineResult};
use crate::engine::traits::{Connection, DataEngine};
use crate::engine::types::{Engine, ServerProfile, StatementOutput, Value};

const INVALID_PASSWORD: &str = "28P01";
const INVALID_AUTHORIZATION: &str = "28000";
const INVALID_CATALOG_NAME: &str = "3D000";

/// A single PostgreSQL session owned by one request
pub struct PostgresSession {
    conn: Option<PgConnection>,
}

impl PostgresSession {
    fn conn(&mut self) -> EngineResult<&mut PgConnection> {
        self.conn.as_mut().ok_or_else(closed_connection)
    }

    /// Converts a SQLx row to a list of universal values
    fn convert_row(pg_row: &PgRow) -> Vec<Value> {
        pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect()
    }

    fn column_names(pg_row: &PgRow) -> Vec<String> {
        pg_row
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        // IMPORTANT: Test integers BEFORE bool to avoid misinterpretation
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Decimal>, _>(idx) {
            return v
                .map(|d| {
                    use rust_decimal::prelude::ToPrimitive;
                    d.to_f64().map(Value::Float).unwrap_or_else(|| Value::Text(d.to_string()))
                })
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        // Date/Time types - convert to ISO 8601 string
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v.map(|dt| Value::Text(iso_datetime(&dt))).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v.map(|d| Value::Text(iso_date(&d))).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v.map(|t| Value::Text(iso_time(&t))).unwrap_or(Value::Null);
        }
        // Binary
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        // JSON/JSONB
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }

        // Fallback: the server's text rendering (uuid, inet, arrays, ...)
        match row.try_get_unchecked::<Option<String>, _>(idx) {
            Ok(v) => v.map(Value::Text).unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }

    async fn describe_columns(&mut self, sql: &str) -> Vec<String> {
        let Ok(conn) = self.conn() else {
            return Vec::new();
        };
        match conn.prepare(sql).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|col| col.name().to_string())
                .collect(),
            Err(e) => {
                tracing::debug!("Could not describe statement columns: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Connection for PostgresSession {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn run(&mut self, sql: &str, expects_rows: bool) -> EngineResult<StatementOutput> {
        let conn = self.conn()?;

        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        let mut affected = 0u64;
        {
            let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *conn);
            while let Some(step) = stream.try_next().await.map_err(query_error)? {
                match step {
                    Either::Left(done) => affected += done.rows_affected(),
                    Either::Right(row) => {
                        if columns.is_none() {
                            columns = Some(Self::column_names(&row));
                        }
                        rows.push(Self::convert_row(&row));
                    }
                }
            }
        }

        match columns {
            Some(columns) => Ok(StatementOutput::Rows { columns, rows }),
            None if expects_rows => {
                let columns = self.describe_columns(sql).await;
                Ok(StatementOutput::Rows {
                    columns,
                    rows: Vec::new(),
                })
            }
            None => Ok(StatementOutput::Affected(affected)),
        }
    }

    async fn fetch(&mut self, sql: &str, binds: &[&str]) -> EngineResult<StatementOutput> {
        let conn = self.conn()?;

        let mut query = sqlx::query(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        let pg_rows: Vec<PgRow> = query.fetch_all(&mut *conn).await.map_err(query_error)?;

        let columns = pg_rows.first().map(Self::column_names).unwrap_or_default();
        let rows = pg_rows.iter().map(Self::convert_row).collect();
        Ok(StatementOutput::Rows { columns, rows })
    }

    async fn close(&mut self) -> EngineResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(|e| {
                EngineError::connection(ConnectionFailure::Other, format!("Failed to close connection: {e}"))
            })?;
        }
        Ok(())
    }
}

/// PostgreSQL driver implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_connect_options(profile: &ServerProfile, host: &str, port: u16) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(&profile.user)
            .password(&profile.password)
            .application_name("sql-agent");

        let db = profile.schema.trim();
        if !db.is_empty() {
            opts = opts.database(db);
        }

        opts
    }

    fn classify_connect_error(e: sqlx::Error) -> EngineError {
        let failure = match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(INVALID_PASSWORD) | Some(INVALID_AUTHORIZATION) => {
                    ConnectionFailure::Authentication
                }
                Some(INVALID_CATALOG_NAME) => ConnectionFailure::UnknownSchema,
                _ => ConnectionFailure::Other,
            },
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                ConnectionFailure::Unreachable
            }
            _ => ConnectionFailure::Other,
        };
        EngineError::connection(failure, e.to_string())
    }
}

#[async_trait]
impl DataEngine for PostgresDriver {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn connect(
        &self,
        profile: &ServerProfile,
        host: &str,
        port: u16,
    ) -> EngineResult<Box<dyn Connection>> {
        let conn = Self::build_connect_options(profile, host, port)
            .connect()
            .await
            .map_err(Self::classify_connect_error)?;

        Ok(Box::new(PostgresSession { conn: Some(conn) }))
    }
}
