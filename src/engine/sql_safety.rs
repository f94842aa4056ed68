//! SQL classification for single-statement, read-only and dangerous-SQL enforcement.

use sqlparser::{
    ast::{Query, Select, SetExpr, Statement},
    dialect::{Dialect, MySqlDialect, PostgreSqlDialect},
    parser::Parser,
    tokenizer::{Token, Tokenizer},
};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlSafetyAnalysis {
    pub is_mutation: bool,
    pub is_dangerous: bool,
    pub returns_rows: bool,
}

/// Counts `;`-separated statements, ignoring comments and blank segments
///
/// Uses the tokenizer so that semicolons inside strings, quoted identifiers
/// and comments are not mistaken for separators.
pub fn count_statements(engine: Engine, sql: &str) -> EngineResult<usize> {
    let dialect = dialect_for_engine(engine);
    let tokens = Tokenizer::new(&*dialect, sql)
        .tokenize()
        .map_err(|err| EngineError::validation(format!("Cannot tokenize statement: {err}")))?;

    let mut count = 0;
    let mut segment_has_content = false;
    for token in tokens {
        match token {
            Token::SemiColon => {
                if segment_has_content {
                    count += 1;
                }
                segment_has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => segment_has_content = true,
        }
    }
    if segment_has_content {
        count += 1;
    }

    Ok(count)
}

/// Ensures `sql` holds exactly one statement
pub fn ensure_single_statement(engine: Engine, sql: &str) -> EngineResult<()> {
    match count_statements(engine, sql)? {
        0 => Err(EngineError::validation("empty statement")),
        1 => Ok(()),
        n => Err(EngineError::validation(format!(
            "expected a single statement, found {n}"
        ))),
    }
}

/// Classifies a statement using the engine's dialect
///
/// Returns the parser's message when the statement cannot be parsed.
pub fn analyze_sql(engine: Engine, sql: &str) -> Result<SqlSafetyAnalysis, String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("Empty SQL".to_string());
    }

    let dialect = dialect_for_engine(engine);
    let statements = Parser::parse_sql(&*dialect, trimmed).map_err(|err| err.to_string())?;

    let mut analysis = SqlSafetyAnalysis {
        is_mutation: false,
        is_dangerous: false,
        returns_rows: false,
    };

    for statement in statements {
        if is_mutation_statement(&statement) {
            analysis.is_mutation = true;
        }
        if is_dangerous_statement(&statement) {
            analysis.is_dangerous = true;
        }
        if returns_rows(&statement) {
            analysis.returns_rows = true;
        }
    }

    Ok(analysis)
}

fn dialect_for_engine(engine: Engine) -> Box<dyn Dialect> {
    match engine {
        Engine::Postgres => Box::new(PostgreSqlDialect {}),
        Engine::MySql => Box::new(MySqlDialect {}),
    }
}

fn is_mutation_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => query_is_mutation(query),
        Statement::Explain {
            analyze,
            statement,
            ..
        } => {
            if *analyze {
                is_mutation_statement(statement)
            } else {
                false
            }
        }
        Statement::ExplainTable { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCharset(_)
        | Statement::ShowObjects(_)
        | Statement::ShowTables { .. }
        | Statement::ShowViews { .. }
        | Statement::ShowCollation { .. }
        | Statement::Set(_)
        | Statement::Use(_)
        | Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. }
        | Statement::ReleaseSavepoint { .. } => false,
        _ => true,
    }
}

fn is_dangerous_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Drop { .. }
        | Statement::DropFunction(_)
        | Statement::DropDomain(_)
        | Statement::DropProcedure { .. }
        | Statement::Truncate(_)
        | Statement::AlterTable(_)
        | Statement::AlterSchema(_)
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterType(_)
        | Statement::AlterRole { .. }
        | Statement::AlterPolicy { .. }
        | Statement::AlterConnector { .. }
        | Statement::AlterSession { .. }
        | Statement::AlterUser(_) => true,
        Statement::Update(update) => update.selection.is_none(),
        Statement::Delete(delete) => delete.selection.is_none(),
        Statement::Explain {
            analyze,
            statement,
            ..
        } if *analyze => is_dangerous_statement(statement),
        _ => false,
    }
}

/// Whether the statement produces a result set, even an empty one
fn returns_rows(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => !query_is_mutation(query),
        Statement::Insert(insert) => insert.returning.is_some(),
        Statement::Explain { .. }
        | Statement::ExplainTable { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCharset(_)
        | Statement::ShowObjects(_)
        | Statement::ShowTables { .. }
        | Statement::ShowViews { .. }
        | Statement::ShowCollation { .. } => true,
        _ => false,
    }
}

fn query_is_mutation(query: &Query) -> bool {
    set_expr_is_mutation(&query.body)
}

fn set_expr_is_mutation(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => select_has_into(select),
        SetExpr::Query(query) => query_is_mutation(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_mutation(left) || set_expr_is_mutation(right)
        }
        SetExpr::Insert(_)
        | SetExpr::Update(_)
        | SetExpr::Delete(_)
        | SetExpr::Merge(_) => true,
        SetExpr::Values(_) | SetExpr::Table(_) => false,
    }
}

fn select_has_into(select: &Select) -> bool {
    select.into.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_cte_select_is_read_only() {
        let analysis = analyze_sql(
            Engine::Postgres,
            "WITH cte AS (SELECT * FROM users) SELECT * FROM cte",
        )
        .expect("should parse");

        assert!(!analysis.is_mutation);
        assert!(!analysis.is_dangerous);
        assert!(analysis.returns_rows);
    }

    #[test]
    fn postgres_update_without_where_is_dangerous() {
        let analysis =
            analyze_sql(Engine::Postgres, "UPDATE users SET name = 'x'").expect("should parse");

        assert!(analysis.is_mutation);
        assert!(analysis.is_dangerous);
        assert!(!analysis.returns_rows);
    }

    #[test]
    fn mysql_delete_without_where_is_dangerous() {
        let analysis = analyze_sql(Engine::MySql, "DELETE FROM users").expect("should parse");

        assert!(analysis.is_mutation);
        assert!(analysis.is_dangerous);
    }

    #[test]
    fn mysql_delete_with_where_is_not_dangerous() {
        let analysis =
            analyze_sql(Engine::MySql, "DELETE FROM users WHERE id = 3").expect("should parse");

        assert!(analysis.is_mutation);
        assert!(!analysis.is_dangerous);
    }

    #[test]
    fn select_into_is_mutation() {
        let analysis = analyze_sql(Engine::Postgres, "SELECT * INTO new_table FROM old_table")
            .expect("should parse");

        assert!(analysis.is_mutation);
        assert!(!analysis.is_dangerous);
        assert!(!analysis.returns_rows);
    }

    #[test]
    fn alter_table_is_dangerous() {
        let analysis = analyze_sql(Engine::Postgres, "ALTER TABLE users ADD COLUMN age INT")
            .expect("should parse");

        assert!(analysis.is_mutation);
        assert!(analysis.is_dangerous);
    }

    #[test]
    fn mysql_show_tables_is_read_only() {
        let analysis = analyze_sql(Engine::MySql, "SHOW TABLES").expect("should parse");

        assert!(!analysis.is_mutation);
        assert!(!analysis.is_dangerous);
        assert!(analysis.returns_rows);
    }

    #[test]
    fn typo_does_not_parse() {
        assert!(analyze_sql(Engine::MySql, "SELEC 1").is_err());
    }

    #[test]
    fn counts_statements_outside_strings_and_comments() {
        assert_eq!(count_statements(Engine::MySql, "SELECT 1").unwrap(), 1);
        assert_eq!(count_statements(Engine::MySql, "SELECT 1;").unwrap(), 1);
        assert_eq!(count_statements(Engine::MySql, "SELECT 1; ;  ").unwrap(), 1);
        assert_eq!(count_statements(Engine::MySql, "SELECT 'a;b'").unwrap(), 1);
        assert_eq!(
            count_statements(Engine::Postgres, "SELECT 1 -- trailing; comment").unwrap(),
            1
        );
        assert_eq!(
            count_statements(Engine::Postgres, "SELECT 1; UPDATE t SET a = 1").unwrap(),
            2
        );
        assert_eq!(count_statements(Engine::Postgres, "  ;  -- nothing").unwrap(), 0);
    }

    #[test]
    fn multiple_statements_are_rejected() {
        let err = ensure_single_statement(Engine::Postgres, "SELECT 1; DROP TABLE users")
            .expect_err("two statements");
        assert_eq!(err.kind(), "validation");

        let err = ensure_single_statement(Engine::MySql, "   ").expect_err("nothing to run");
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("empty statement"));

        ensure_single_statement(Engine::MySql, "SELECT 1;").expect("one statement");
    }
}
