use flowplan_common::{PlanError, Result};
use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    let dialect = GenericDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| PlanError::Planning(e.to_string()))
}

/// Parse a standalone condition such as the text of an ON or HAVING clause.
pub fn parse_expr(text: &str) -> Result<Expr> {
    let dialect = GenericDialect {};
    Parser::new(&dialect)
        .try_with_sql(text)
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| PlanError::Planning(format!("cannot parse condition '{text}': {e}")))
}
