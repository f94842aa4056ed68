//! MySQL Driver
//!
//! Implements the DataEngine trait for MySQL/MariaDB databases using SQLx.
//!
//! ## Execution
//!
//! User statements go through the text protocol (`raw_sql`) so that any
//! statement MySQL accepts, including administrative ones that cannot be
//! prepared, runs verbatim. Introspection uses prepared statements with
//! bound parameters.

use async_trait::async_trait;
use futures::TryStreamExt;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection as _, Either, Executor, Row, Statement};

use crate::engine::drivers::{closed_connection, iso_date, iso_datetime, iso_time, query_error};
use crate::engine::error::{ConnectionFailure, EngineError, EngineResult};
use crate::engine::traits::{Connection, DataEngine};
use crate::engine::types::{Engine, ServerProfile, StatementOutput, Value};

const ER_DBACCESS_DENIED: u16 = 1044;
const ER_ACCESS_DENIED: u16 = 1045;
const ER_BAD_DB: u16 = 1049;

fn datetime_value(dt: &chrono::NaiveDateTime) -> Value {
    Value::Text(iso_datetime(dt))
}

/// A single MySQL session owned by one request
pub struct MySqlSession {
    conn: Option<MySqlConnection>,
}

impl MySqlSession {
    fn conn(&mut self) -> EngineResult<&mut MySqlConnection> {
        self.conn.as_mut().ok_or_else(closed_connection)
    }

    /// Converts a SQLx row to a list of universal values
    fn convert_row(mysql_row: &MySqlRow) -> Vec<Value> {
        mysql_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(mysql_row, col.ordinal()))
            .collect()
    }

    fn column_names(mysql_row: &MySqlRow) -> Vec<String> {
        mysql_row
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }

    /// Extracts a value from a MySqlRow at the given index
    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v
                .map(|u| i64::try_from(u).map(Value::Int).unwrap_or(Value::Float(u as f64)))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u16>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
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
        // DATETIME and TIMESTAMP both decode as naive values in the session
        // time zone; no offset is attached
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v.as_ref().map(datetime_value).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v.map(|d| Value::Text(iso_date(&d))).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
            return v.map(|t| Value::Text(iso_time(&t))).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        // Fallback: whatever the server sent, as raw bytes
        match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
            Ok(v) => v.map(Value::Bytes).unwrap_or(Value::Null),
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
impl Connection for MySqlSession {
    fn engine(&self) -> Engine {
        Engine::MySql
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
        let mysql_rows: Vec<MySqlRow> = query.fetch_all(&mut *conn).await.map_err(query_error)?;

        let columns = mysql_rows
            .first()
            .map(Self::column_names)
            .unwrap_or_default();
        let rows = mysql_rows.iter().map(Self::convert_row).collect();
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

/// MySQL driver implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDriver;

impl MySqlDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_connect_options(profile: &ServerProfile, host: &str, port: u16) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&profile.user)
            .password(&profile.password)
            .charset("utf8mb4");

        let db = profile.schema.trim();
        if !db.is_empty() {
            opts = opts.database(db);
        }

        opts
    }

    fn classify_connect_error(e: sqlx::Error) -> EngineError {
        let failure = match &e {
            sqlx::Error::Database(db) => {
                match db.try_downcast_ref::<MySqlDatabaseError>().map(|m| m.number()) {
                    Some(ER_ACCESS_DENIED) | Some(ER_DBACCESS_DENIED) => {
                        ConnectionFailure::Authentication
                    }
                    Some(ER_BAD_DB) => ConnectionFailure::UnknownSchema,
                    _ => ConnectionFailure::Other,
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                ConnectionFailure::Unreachable
            }
            _ => ConnectionFailure::Other,
        };
        EngineError::connection(failure, e.to_string())
    }
}

#[async_trait]
impl DataEngine for MySqlDriver {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn driver_name(&self) -> &'static str {
        "MySQL / MariaDB"
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

        Ok(Box::new(MySqlSession { conn: Some(conn) }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn datetime_has_no_offset() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap();

        assert_eq!(datetime_value(&dt), Value::Text("2024-02-29T13:05:09".into()));
    }
}
