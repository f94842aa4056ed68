//! Query Executor
//!
//! Runs one statement against an open connection under the execution policy
//! and turns the driver output into a `QueryResult`.

use std::time::Instant;

use tokio::time::timeout;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::sql_safety;
use crate::engine::traits::Connection;
use crate::engine::types::{QueryResult, Row, ServerProfile, StatementOutput, Value};
use crate::policy::ExecutionPolicy;

const READ_ONLY_BLOCKED: &str = "Operation blocked: read-only server";
const DANGEROUS_BLOCKED_POLICY: &str = "Dangerous query blocked by policy";
const SQL_PARSE_BLOCKED: &str = "Operation blocked: SQL parser could not classify the query";

const LOGGED_STATEMENT_CHARS: usize = 100;

/// Outcome of statement validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementPlan {
    /// Report columns even when the statement yields no rows
    pub returns_rows: bool,
}

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    policy: ExecutionPolicy,
}

impl QueryExecutor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Checks a user statement against the profile before anything is opened
    ///
    /// Rejects empty and multi-statement input, mutations on read-only
    /// servers, and dangerous statements when the policy blocks them.
    /// Statements the parser cannot classify are let through so the server
    /// reports the error, except on read-only servers.
    pub fn validate(&self, profile: &ServerProfile, sql: &str) -> EngineResult<StatementPlan> {
        sql_safety::ensure_single_statement(profile.engine, sql)?;

        let analysis = match sql_safety::analyze_sql(profile.engine, sql) {
            Ok(analysis) => analysis,
            Err(err) => {
                if profile.read_only {
                    return Err(EngineError::validation(format!("{SQL_PARSE_BLOCKED}: {err}")));
                }
                tracing::debug!("SQL parser could not classify statement: {}", err);
                return Ok(StatementPlan {
                    returns_rows: false,
                });
            }
        };

        if profile.read_only && analysis.is_mutation {
            return Err(EngineError::validation(READ_ONLY_BLOCKED));
        }
        if self.policy.block_dangerous_sql && analysis.is_dangerous {
            return Err(EngineError::validation(DANGEROUS_BLOCKED_POLICY));
        }

        Ok(StatementPlan {
            returns_rows: analysis.returns_rows,
        })
    }

    /// Validates and runs one user statement
    pub async fn execute(
        &self,
        conn: &mut dyn Connection,
        profile: &ServerProfile,
        sql: &str,
    ) -> EngineResult<QueryResult> {
        let plan = self.validate(profile, sql)?;
        self.run(conn, sql, plan).await
    }

    /// Runs an already validated statement
    ///
    /// SQL-level failures become a `QueryResult` with `success = false`;
    /// only a statement timeout is raised.
    pub async fn run(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        plan: StatementPlan,
    ) -> EngineResult<QueryResult> {
        tracing::info!(
            engine = %conn.engine(),
            statement = %statement_preview(sql),
            "Executing statement"
        );

        let start_time = Instant::now();
        let outcome = timeout(
            self.policy.statement_timeout(),
            conn.run(sql, plan.returns_rows),
        )
        .await;
        let elapsed = start_time.elapsed().as_micros() as f64 / 1000.0;

        let output = match outcome {
            Ok(output) => output,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.policy.statement_timeout_ms,
                    "Statement timed out"
                );
                return Err(EngineError::timeout(
                    "statement execution",
                    self.policy.statement_timeout_ms,
                ));
            }
        };

        let result = match output {
            Ok(StatementOutput::Rows { columns, rows }) => {
                let rows = self.shape_rows(&columns, rows);
                tracing::info!(row_count = rows.len(), execution_time_ms = elapsed, "Statement returned rows");
                QueryResult::with_rows(columns, rows, elapsed)
            }
            Ok(StatementOutput::Affected(affected)) => {
                tracing::info!(affected, execution_time_ms = elapsed, "Statement completed");
                QueryResult::with_affected_rows(affected, elapsed)
            }
            Err(EngineError::QueryFailed { message }) => {
                tracing::info!(error = %message, execution_time_ms = elapsed, "Statement failed");
                QueryResult::failure(message, elapsed)
            }
            Err(other) => return Err(other),
        };

        Ok(result)
    }

    /// Runs an introspection query with bound parameters
    ///
    /// Unlike `run`, SQL failures are raised as `EngineError::QueryFailed`.
    pub async fn fetch(
        &self,
        conn: &mut dyn Connection,
        sql: &str,
        binds: &[&str],
    ) -> EngineResult<Vec<Row>> {
        let output = timeout(self.policy.statement_timeout(), conn.fetch(sql, binds))
            .await
            .map_err(|_| {
                EngineError::timeout("introspection query", self.policy.statement_timeout_ms)
            })??;

        match output {
            StatementOutput::Rows { columns, rows } => Ok(self.shape_rows(&columns, rows)),
            StatementOutput::Affected(_) => Ok(Vec::new()),
        }
    }

    fn shape_rows(&self, columns: &[String], rows: Vec<Vec<Value>>) -> Vec<Row> {
        let preview = self.policy.binary_preview_bytes;
        rows.into_iter()
            .map(|values| {
                let values = values.into_iter().map(|v| v.shape(preview)).collect();
                Row::from_values(columns, values)
            })
            .collect()
    }
}

fn statement_preview(sql: &str) -> String {
    let trimmed = sql.trim();
    let mut preview: String = trimmed.chars().take(LOGGED_STATEMENT_CHARS).collect();
    if trimmed.chars().count() > LOGGED_STATEMENT_CHARS {
        preview.push_str("...");
    }
    preview
}
