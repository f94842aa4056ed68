//! Schema Inspector
//!
//! Read-only introspection over `information_schema` (and `pg_catalog` for
//! PostgreSQL indexes), scoped to the connection's active schema. Table
//! names are always bound as parameters.

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::executor::QueryExecutor;
use crate::engine::traits::Connection;
use crate::engine::types::{Engine, Row, TableColumn, TableIndex, Value};

// Cast to CHAR to avoid BINARY type mismatch with Rust String
const MYSQL_LIST_TABLES: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR) AS table_name
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME
"#;

const POSTGRES_LIST_TABLES: &str = r#"
    SELECT table_name::text AS table_name
    FROM information_schema.tables
    WHERE table_schema = current_schema()
    ORDER BY table_name
"#;

const MYSQL_TABLE_EXISTS: &str = r#"
    SELECT 1 AS found
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
"#;

const POSTGRES_TABLE_EXISTS: &str = r#"
    SELECT 1 AS found
    FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_name = $1
"#;

const MYSQL_DESCRIBE_TABLE: &str = r#"
    SELECT
        CAST(c.COLUMN_NAME AS CHAR) AS column_name,
        CAST(c.COLUMN_TYPE AS CHAR) AS column_type,
        CAST(c.IS_NULLABLE AS CHAR) AS is_nullable,
        CAST(c.COLUMN_KEY AS CHAR) AS column_key,
        CAST(c.COLUMN_DEFAULT AS CHAR) AS column_default
    FROM information_schema.COLUMNS c
    WHERE c.TABLE_SCHEMA = DATABASE() AND c.TABLE_NAME = ?
    ORDER BY c.ORDINAL_POSITION
"#;

// PRI > UNI > MUL, mirroring MySQL's COLUMN_KEY
const POSTGRES_DESCRIBE_TABLE: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        c.data_type::text AS column_type,
        c.is_nullable::text AS is_nullable,
        COALESCE((
            SELECT CASE MAX(CASE tc.constraint_type
                                WHEN 'PRIMARY KEY' THEN 3
                                WHEN 'UNIQUE' THEN 2
                                ELSE 1
                            END)
                       WHEN 3 THEN 'PRI'
                       WHEN 2 THEN 'UNI'
                       WHEN 1 THEN 'MUL'
                   END
            FROM information_schema.key_column_usage k
            JOIN information_schema.table_constraints tc
              ON tc.constraint_schema = k.constraint_schema
             AND tc.constraint_name = k.constraint_name
            WHERE k.table_schema = c.table_schema
              AND k.table_name = c.table_name
              AND k.column_name = c.column_name
        ), '') AS column_key,
        c.column_default::text AS column_default
    FROM information_schema.columns c
    WHERE c.table_schema = current_schema() AND c.table_name = $1
    ORDER BY c.ordinal_position
"#;

const MYSQL_LIST_INDEXES: &str = r#"
    SELECT
        CAST(INDEX_NAME AS CHAR) AS index_name,
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CASE WHEN NON_UNIQUE = 0 THEN 1 ELSE 0 END AS is_unique,
        SEQ_IN_INDEX AS position
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
    ORDER BY INDEX_NAME, SEQ_IN_INDEX
"#;

const POSTGRES_LIST_INDEXES: &str = r#"
    SELECT
        i.relname::text AS index_name,
        a.attname::text AS column_name,
        ix.indisunique AS is_unique,
        k.ord::int4 AS position
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = current_schema() AND t.relname = $1
    ORDER BY i.relname, k.ord
"#;

/// Introspection helpers layered on the executor
pub struct SchemaInspector<'a> {
    executor: &'a QueryExecutor,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(executor: &'a QueryExecutor) -> Self {
        Self { executor }
    }

    /// Lists base tables and views of the active schema
    pub async fn list_tables(
        &self,
        conn: &mut dyn Connection,
        engine: Engine,
    ) -> EngineResult<Vec<String>> {
        let sql = match engine {
            Engine::MySql => MYSQL_LIST_TABLES,
            Engine::Postgres => POSTGRES_LIST_TABLES,
        };
        let rows = self.executor.fetch(conn, sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| text(row, "table_name"))
            .collect())
    }

    pub async fn table_exists(
        &self,
        conn: &mut dyn Connection,
        engine: Engine,
        table: &str,
    ) -> EngineResult<bool> {
        let sql = match engine {
            Engine::MySql => MYSQL_TABLE_EXISTS,
            Engine::Postgres => POSTGRES_TABLE_EXISTS,
        };
        let rows = self.executor.fetch(conn, sql, &[table]).await?;
        Ok(!rows.is_empty())
    }

    /// Column metadata in ordinal order
    ///
    /// Fails with `NotFound` when the table is not in the active schema.
    pub async fn describe_table(
        &self,
        conn: &mut dyn Connection,
        engine: Engine,
        table: &str,
    ) -> EngineResult<Vec<TableColumn>> {
        let sql = match engine {
            Engine::MySql => MYSQL_DESCRIBE_TABLE,
            Engine::Postgres => POSTGRES_DESCRIBE_TABLE,
        };
        let rows = self.executor.fetch(conn, sql, &[table]).await?;
        if rows.is_empty() {
            return Err(EngineError::table_not_found(table));
        }

        Ok(rows
            .iter()
            .map(|row| TableColumn {
                name: text(row, "column_name").unwrap_or_default(),
                data_type: text(row, "column_type").unwrap_or_default(),
                nullable: text(row, "is_nullable").is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                key: text(row, "column_key").unwrap_or_default(),
                default: text(row, "column_default"),
            })
            .collect())
    }

    /// One entry per indexed column, grouped by index in column order
    ///
    /// Fails with `NotFound` when the table is not in the active schema.
    pub async fn list_indexes(
        &self,
        conn: &mut dyn Connection,
        engine: Engine,
        table: &str,
    ) -> EngineResult<Vec<TableIndex>> {
        if !self.table_exists(conn, engine, table).await? {
            return Err(EngineError::table_not_found(table));
        }

        let sql = match engine {
            Engine::MySql => MYSQL_LIST_INDEXES,
            Engine::Postgres => POSTGRES_LIST_INDEXES,
        };
        let rows = self.executor.fetch(conn, sql, &[table]).await?;

        Ok(rows
            .iter()
            .map(|row| TableIndex {
                name: text(row, "index_name").unwrap_or_default(),
                column: text(row, "column_name").unwrap_or_default(),
                unique: flag(row, "is_unique"),
                position: row
                    .get("position")
                    .and_then(Value::as_i64)
                    .and_then(|p| u32::try_from(p).ok())
                    .unwrap_or(0),
            })
            .collect())
    }
}

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        other => serde_json::to_value(other)
            .ok()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())),
    }
}

fn flag(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Bool(b)) => *b,
        Some(value) => value.as_i64().is_some_and(|v| v != 0),
        None => false,
    }
}
