//! MySQL administrative commands
//!
//! Each command maps to one fixed statement. Identifiers never reach the
//! SQL text unchecked: table names must exist in the active schema and
//! `LIKE` patterns are limited to `[A-Za-z0-9_%]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::executor::{QueryExecutor, StatementPlan};
use crate::engine::schema::SchemaInspector;
use crate::engine::traits::Connection;
use crate::engine::types::{Engine, QueryResult, ServerProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminCommand {
    Status,
    Variables,
    Processlist,
    Databases,
    TableStatus,
    Indexes,
    Analyze,
    Optimize,
    Check,
    Repair,
}

impl AdminCommand {
    pub const ALL: [AdminCommand; 10] = [
        Self::Status,
        Self::Variables,
        Self::Processlist,
        Self::Databases,
        Self::TableStatus,
        Self::Indexes,
        Self::Analyze,
        Self::Optimize,
        Self::Check,
        Self::Repair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Variables => "variables",
            Self::Processlist => "processlist",
            Self::Databases => "databases",
            Self::TableStatus => "table_status",
            Self::Indexes => "indexes",
            Self::Analyze => "analyze",
            Self::Optimize => "optimize",
            Self::Check => "check",
            Self::Repair => "repair",
        }
    }

    /// Commands that must name an existing table
    pub fn requires_table(&self) -> bool {
        matches!(
            self,
            Self::Indexes | Self::Analyze | Self::Optimize | Self::Check | Self::Repair
        )
    }

    /// Commands that rewrite table data or statistics
    pub fn is_maintenance(&self) -> bool {
        matches!(self, Self::Analyze | Self::Optimize | Self::Repair)
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminCommand {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                EngineError::validation(format!(
                    "Unknown admin command '{}' (expected one of: {})",
                    raw.trim(),
                    known.join(", ")
                ))
            })
    }
}

/// Optional arguments of an admin command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminArgs {
    pub table: Option<String>,
    pub pattern: Option<String>,
}

/// Rejects the command before any tunnel or connection is opened
///
/// Only MySQL profiles accept admin commands; read-only profiles refuse
/// maintenance commands.
pub fn guard(profile: &ServerProfile, command: AdminCommand) -> EngineResult<()> {
    if profile.engine != Engine::MySql {
        tracing::warn!(
            server = %profile.name,
            engine = %profile.engine,
            command = %command,
            "Admin command rejected for non-MySQL server"
        );
        return Err(EngineError::unsupported(command.as_str(), profile.engine));
    }
    if profile.read_only && command.is_maintenance() {
        return Err(EngineError::validation(format!(
            "Operation blocked: '{command}' is not allowed on a read-only server"
        )));
    }
    Ok(())
}

/// Checks argument shape without touching the server
pub fn check_args(command: AdminCommand, args: &AdminArgs) -> EngineResult<()> {
    if command.requires_table() && blank(&args.table) {
        return Err(EngineError::validation(format!(
            "Command '{command}' requires a table"
        )));
    }
    if let Some(pattern) = args.pattern.as_deref() {
        validate_pattern(pattern)?;
    }
    Ok(())
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

fn validate_pattern(pattern: &str) -> EngineResult<()> {
    if pattern.is_empty()
        || !pattern
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '%')
    {
        return Err(EngineError::validation(format!(
            "Invalid pattern '{pattern}': only letters, digits, '_' and '%' are allowed"
        )));
    }
    Ok(())
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Literal for `LIKE` that matches `name` exactly
fn exact_like_literal(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    for c in name.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("''"),
            '_' | '%' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    format!("'{escaped}'")
}

/// Builds the statement for a command whose arguments were already checked
fn build_statement(command: AdminCommand, table: Option<&str>, pattern: Option<&str>) -> String {
    let like = |pattern: Option<&str>| {
        pattern
            .map(|p| format!(" LIKE '{p}'"))
            .unwrap_or_default()
    };
    let table_ident = table.map(quote_identifier).unwrap_or_default();

    match command {
        AdminCommand::Status => format!("SHOW GLOBAL STATUS{}", like(pattern)),
        AdminCommand::Variables => format!("SHOW GLOBAL VARIABLES{}", like(pattern)),
        AdminCommand::Processlist => "SHOW FULL PROCESSLIST".to_string(),
        AdminCommand::Databases => "SHOW DATABASES".to_string(),
        AdminCommand::TableStatus => match table {
            Some(table) => format!("SHOW TABLE STATUS LIKE {}", exact_like_literal(table)),
            None => format!("SHOW TABLE STATUS{}", like(pattern)),
        },
        AdminCommand::Indexes => format!("SHOW INDEX FROM {table_ident}"),
        AdminCommand::Analyze => format!("ANALYZE TABLE {table_ident}"),
        AdminCommand::Optimize => format!("OPTIMIZE TABLE {table_ident}"),
        AdminCommand::Check => format!("CHECK TABLE {table_ident}"),
        AdminCommand::Repair => format!("REPAIR TABLE {table_ident}"),
    }
}

/// Runs an admin command on an open MySQL connection
///
/// `guard` and `check_args` must have passed. The named table, if any, is
/// matched against the active schema's tables first.
pub async fn run(
    executor: &QueryExecutor,
    conn: &mut dyn Connection,
    command: AdminCommand,
    args: &AdminArgs,
) -> EngineResult<QueryResult> {
    let table = match args.table.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(requested) => {
            let tables = SchemaInspector::new(executor)
                .list_tables(conn, Engine::MySql)
                .await?;
            let known = tables
                .into_iter()
                .find(|t| t == requested)
                .ok_or_else(|| EngineError::table_not_found(requested))?;
            Some(known)
        }
        None => None,
    };

    let sql = build_statement(command, table.as_deref(), args.pattern.as_deref());
    tracing::info!(command = %command, "Running admin command");

    executor
        .run(conn, &sql, StatementPlan { returns_rows: true })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{profile, FakeConnection};
    use crate::engine::types::{StatementOutput, Value};
    use crate::policy::ExecutionPolicy;

    fn tables(names: &[&str]) -> StatementOutput {
        StatementOutput::Rows {
            columns: vec!["table_name".into()],
            rows: names
                .iter()
                .map(|n| vec![Value::Text(n.to_string())])
                .collect(),
        }
    }

    #[test]
    fn parses_command_names() {
        assert_eq!("status".parse::<AdminCommand>().unwrap(), AdminCommand::Status);
        assert_eq!(
            " Table_Status ".parse::<AdminCommand>().unwrap(),
            AdminCommand::TableStatus
        );

        let err = "shutdown".parse::<AdminCommand>().expect_err("unknown");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn guard_rejects_postgres_naming_command_and_engine() {
        let err = guard(&profile("pg", Engine::Postgres), AdminCommand::Processlist)
            .expect_err("postgres");

        match err {
            EngineError::UnsupportedOperation { command, engine } => {
                assert_eq!(command, "processlist");
                assert_eq!(engine, "postgres");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        guard(&profile("dev-mysql", Engine::MySql), AdminCommand::Processlist)
            .expect("mysql allowed");
    }

    #[test]
    fn read_only_blocks_maintenance_only() {
        let mut profile = profile("ro", Engine::MySql);
        profile.read_only = true;

        assert!(guard(&profile, AdminCommand::Optimize).is_err());
        assert!(guard(&profile, AdminCommand::Check).is_ok());
        assert!(guard(&profile, AdminCommand::Status).is_ok());
    }

    #[test]
    fn table_commands_need_a_table() {
        let err = check_args(AdminCommand::Analyze, &AdminArgs::default()).expect_err("no table");
        assert_eq!(err.kind(), "validation");

        check_args(AdminCommand::Status, &AdminArgs::default()).expect("status needs nothing");
    }

    #[test]
    fn rejects_patterns_with_quotes() {
        let args = AdminArgs {
            table: None,
            pattern: Some("x' OR '1'='1".into()),
        };
        assert_eq!(
            check_args(AdminCommand::Variables, &args).unwrap_err().kind(),
            "validation"
        );

        let args = AdminArgs {
            table: None,
            pattern: Some("innodb_buffer%".into()),
        };
        check_args(AdminCommand::Variables, &args).expect("valid pattern");
    }

    #[test]
    fn builds_fixed_statements() {
        assert_eq!(
            build_statement(AdminCommand::Status, None, Some("Threads%")),
            "SHOW GLOBAL STATUS LIKE 'Threads%'"
        );
        assert_eq!(
            build_statement(AdminCommand::Variables, None, None),
            "SHOW GLOBAL VARIABLES"
        );
        assert_eq!(
            build_statement(AdminCommand::Processlist, None, None),
            "SHOW FULL PROCESSLIST"
        );
        assert_eq!(
            build_statement(AdminCommand::TableStatus, Some("user_log"), None),
            "SHOW TABLE STATUS LIKE 'user\\_log'"
        );
        assert_eq!(
            build_statement(AdminCommand::Indexes, Some("orders"), None),
            "SHOW INDEX FROM `orders`"
        );
        assert_eq!(
            build_statement(AdminCommand::Repair, Some("we`ird"), None),
            "REPAIR TABLE `we``ird`"
        );
    }

    #[tokio::test]
    async fn maintenance_command_checks_table_first() {
        let executor = QueryExecutor::new(ExecutionPolicy::default());
        let mut conn = FakeConnection::new(Engine::MySql)
            .with_output(tables(&["orders", "users"]))
            .with_output(StatementOutput::Rows {
                columns: vec!["Table".into(), "Op".into(), "Msg_type".into(), "Msg_text".into()],
                rows: vec![vec![
                    Value::Text("test_db.orders".into()),
                    Value::Text("analyze".into()),
                    Value::Text("status".into()),
                    Value::Text("OK".into()),
                ]],
            });
        let args = AdminArgs {
            table: Some("orders".into()),
            pattern: None,
        };

        let result = run(&executor, &mut conn, AdminCommand::Analyze, &args)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.row_count, 1);
        assert_eq!(conn.log().statements(), vec!["ANALYZE TABLE `orders`".to_string()]);
    }

    #[tokio::test]
    async fn unknown_table_is_not_found_and_nothing_runs() {
        let executor = QueryExecutor::new(ExecutionPolicy::default());
        let mut conn = FakeConnection::new(Engine::MySql).with_output(tables(&["orders"]));
        let args = AdminArgs {
            table: Some("orders; DROP TABLE users".into()),
            pattern: None,
        };

        let err = run(&executor, &mut conn, AdminCommand::Optimize, &args)
            .await
            .expect_err("not a table");

        assert_eq!(err.kind(), "not_found");
        assert!(conn.log().statements().is_empty());
    }
}
