use flowplan_common::{PlanError, Result};
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Ident, JoinConstraint, JoinOperator, ObjectName, Query,
    Select, SelectItem as SqlSelectItem, SetExpr, Statement as SqlStatement, TableFactor,
    UnaryOperator, Value,
};

use crate::condition::JoinCondition;
use crate::expression::{CompareOp, Expression, Literal, LiteralValue, Operand};
use crate::field::Field;
use crate::pipeline::AggExpr;
use crate::statement::{
    Calculator, JoinStatement, SelectItem, Statement, WhereGroupByHavingStatement,
    WhereGroupByStatement,
};
use crate::window::JoinType;

/// Name under which window boundary accessors are registered with the runtime.
pub const WINDOW_BOUNDARY_FUNCTION: &str = "window_boundary_time";

/// Parse condition text (ON / WHERE / HAVING) into an [`Expression`].
pub fn parse_condition(text: &str) -> Result<Expression> {
    let expr = flowplan_sql::parse_expr(text)?;
    sql_expr_to_expression(&expr, &[])
}

/// Convert one `SELECT ... FROM a JOIN b ON ...` statement into the statement model.
pub fn sql_to_statement(sql: &str) -> Result<Statement> {
    let stmts = flowplan_sql::parse_sql(sql)?;
    if stmts.len() != 1 {
        return Err(PlanError::Unsupported(
            "only single-statement SQL is supported".to_string(),
        ));
    }
    match &stmts[0] {
        SqlStatement::Query(q) => query_to_statement(sql.trim(), q),
        _ => Err(PlanError::Unsupported(
            "only SELECT queries are supported".to_string(),
        )),
    }
}

fn query_to_statement(content: &str, q: &Query) -> Result<Statement> {
    let select = match &*q.body {
        SetExpr::Select(s) => s.as_ref(),
        _ => {
            return Err(PlanError::Unsupported(
                "only simple SELECT is supported (no UNION/EXCEPT/INTERSECT)".to_string(),
            ))
        }
    };

    let mut join = from_to_join(content, select)?;

    let mut saw_agg = false;
    for item in &select.projection {
        let item = select_item(item)?;
        saw_agg |= matches!(item.calculator, Some(Calculator::Aggregate(_)));
        join.select_items.push(item);
    }

    let group_by = group_by_fields(&select.group_by)?;
    let before_join_where = select
        .selection
        .as_ref()
        .map(|e| sql_expr_to_expression(e, &[]))
        .transpose()?;
    let having = select
        .having
        .as_ref()
        .map(|e| sql_expr_to_expression(e, &join.select_items))
        .transpose()?;

    if before_join_where.is_none() && group_by.is_empty() && having.is_none() && !saw_agg {
        return Ok(Statement::Join(join));
    }
    let mut grouped = WhereGroupByStatement::new(join).with_group_by(group_by);
    grouped.before_join_where = before_join_where;
    match having {
        Some(having) => Ok(Statement::WhereGroupByHaving(
            WhereGroupByHavingStatement::new(grouped, having)?,
        )),
        None => Ok(Statement::WhereGroupBy(grouped)),
    }
}

fn from_to_join(content: &str, select: &Select) -> Result<JoinStatement> {
    if select.from.len() != 1 {
        return Err(PlanError::Unsupported(
            "only one FROM source is supported".to_string(),
        ));
    }
    let twj = &select.from[0];
    if twj.joins.len() != 1 {
        return Err(PlanError::InvalidStatement(format!(
            "expected exactly one JOIN, found {}: {content}",
            twj.joins.len()
        )));
    }
    let (source_table, source_alias) = table_factor_name(&twj.relation)?;
    let j = &twj.joins[0];
    let (join_table, join_alias) = table_factor_name(&j.relation)?;

    let (join_type, constraint) = match &j.join_operator {
        JoinOperator::Inner(c) => (JoinType::Inner, c),
        JoinOperator::LeftOuter(c) => (JoinType::Left, c),
        other => {
            return Err(PlanError::Unsupported(format!(
                "only INNER and LEFT JOIN are supported, got {other:?}"
            )))
        }
    };

    let mut join = JoinStatement::new(content, source_table, join_table).with_join_type(join_type);
    join.as_source_table = source_alias;
    join.as_join_table = join_alias;
    join.join_condition = join_constraint_to_condition(constraint)?;
    Ok(join)
}

fn table_factor_name(tf: &TableFactor) -> Result<(String, Option<String>)> {
    match tf {
        TableFactor::Table { name, alias, .. } => Ok((
            object_name_to_string(name),
            alias.as_ref().map(|a| a.name.value.clone()),
        )),
        _ => Err(PlanError::Unsupported(
            "only simple table names in FROM are supported".to_string(),
        )),
    }
}

fn join_constraint_to_condition(constraint: &JoinConstraint) -> Result<Option<JoinCondition>> {
    match constraint {
        // `ON TRUE` joins lateral tables without a correlation predicate
        JoinConstraint::On(SqlExpr::Value(Value::Boolean(true))) | JoinConstraint::None => Ok(None),
        JoinConstraint::On(expr) => Ok(Some(JoinCondition::new(
            expr.to_string(),
            sql_expr_to_expression(expr, &[])?,
        ))),
        _ => Err(PlanError::Unsupported(
            "JOIN requires ON ... (USING and NATURAL are not supported)".to_string(),
        )),
    }
}

fn select_item(item: &SqlSelectItem) -> Result<SelectItem> {
    match item {
        SqlSelectItem::UnnamedExpr(e) => match e {
            SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => {
                Ok(SelectItem::column(sql_ident_expr_to_field(e)?))
            }
            SqlExpr::Function(_) => {
                let calculator = function_calculator(e)?;
                Ok(SelectItem::computed(Field::new(e.to_string()), calculator))
            }
            _ => Err(PlanError::Unsupported(format!(
                "unsupported select expression without alias: {e}"
            ))),
        },
        SqlSelectItem::ExprWithAlias { expr, alias } => {
            let output = Field::new(alias.value.clone());
            match expr {
                SqlExpr::Function(_) => Ok(SelectItem::computed(output, function_calculator(expr)?)),
                _ => Err(PlanError::Unsupported(format!(
                    "only function calls can be aliased: {expr} AS {alias}"
                ))),
            }
        }
        SqlSelectItem::Wildcard(_) | SqlSelectItem::QualifiedWildcard(_, _) => {
            Err(PlanError::Unsupported(
                "SELECT * is not supported (use explicit columns)".to_string(),
            ))
        }
    }
}

fn function_calculator(e: &SqlExpr) -> Result<Calculator> {
    let func = match e {
        SqlExpr::Function(f) => f,
        _ => {
            return Err(PlanError::Unsupported(format!(
                "expected a function call: {e}"
            )))
        }
    };
    let fname = object_name_to_string(&func.name).to_lowercase();
    let args = function_args(&func.args)?;

    let agg_field = |name: &str| -> Result<Field> {
        match args.as_slice() {
            [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] => sql_ident_expr_to_field(arg),
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => Err(PlanError::Unsupported(
                format!("{name}(*) is not supported (use {name}(col))"),
            )),
            _ => Err(PlanError::Unsupported(format!(
                "{name}() requires one column argument"
            ))),
        }
    };

    let calculator = match fname.as_str() {
        "count" => Calculator::Aggregate(AggExpr::Count(agg_field("COUNT")?)),
        "sum" => Calculator::Aggregate(AggExpr::Sum(agg_field("SUM")?)),
        "min" => Calculator::Aggregate(AggExpr::Min(agg_field("MIN")?)),
        "max" => Calculator::Aggregate(AggExpr::Max(agg_field("MAX")?)),
        "avg" => Calculator::Aggregate(AggExpr::Avg(agg_field("AVG")?)),
        "window_start" | "window_end" => Calculator::Function {
            function: WINDOW_BOUNDARY_FUNCTION.to_string(),
            args: vec![fname.clone()],
        },
        _ => Calculator::Function {
            function: fname.clone(),
            args: args.iter().map(function_arg_text).collect::<Result<_>>()?,
        },
    };
    Ok(calculator)
}

fn function_args(args: &FunctionArguments) -> Result<Vec<FunctionArg>> {
    match args {
        FunctionArguments::None => Ok(vec![]),
        FunctionArguments::List(list) => Ok(list.args.clone()),
        FunctionArguments::Subquery(_) => Err(PlanError::Unsupported(
            "subquery function arguments are not supported".to_string(),
        )),
    }
}

fn function_arg_text(a: &FunctionArg) -> Result<String> {
    match a {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(match e {
            SqlExpr::Identifier(id) => id.value.clone(),
            SqlExpr::CompoundIdentifier(parts) => compound_ident_to_string(parts),
            SqlExpr::Value(Value::SingleQuotedString(s)) => s.clone(),
            other => other.to_string(),
        }),
        _ => Err(PlanError::Unsupported(
            "unsupported function argument form".to_string(),
        )),
    }
}

fn group_by_fields(g: &GroupByExpr) -> Result<Vec<Field>> {
    match g {
        GroupByExpr::Expressions(es, _mods) => es.iter().map(sql_ident_expr_to_field).collect(),
        GroupByExpr::All(_mods) => Err(PlanError::Unsupported(
            "GROUP BY ALL is not supported".to_string(),
        )),
    }
}

/// `items` are the select items a function call in the condition may refer to.
fn sql_expr_to_expression(e: &SqlExpr, items: &[SelectItem]) -> Result<Expression> {
    match e {
        SqlExpr::Nested(inner) => sql_expr_to_expression(inner, items),
        SqlExpr::BinaryOp { left, op, right } => {
            // AND/OR are represented as BinaryOp too
            if *op == SqlBinaryOp::And {
                return Ok(Expression::and(vec![
                    sql_expr_to_expression(left, items)?,
                    sql_expr_to_expression(right, items)?,
                ]));
            }
            if *op == SqlBinaryOp::Or {
                return Ok(Expression::or(vec![
                    sql_expr_to_expression(left, items)?,
                    sql_expr_to_expression(right, items)?,
                ]));
            }
            Ok(Expression::compare(
                sql_expr_to_operand(left, items)?,
                sql_binop_to_compare(op)?,
                sql_expr_to_operand(right, items)?,
            ))
        }
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => {
            let literals = list
                .iter()
                .map(sql_expr_to_literal)
                .collect::<Result<Vec<_>>>()?;
            let content = format!(
                "({})",
                list.iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let op = if *negated {
                CompareOp::NotIn
            } else {
                CompareOp::In
            };
            Ok(Expression::compare(
                sql_expr_to_operand(expr, items)?,
                op,
                Operand::Literal(Literal::multi(content, literals)),
            ))
        }
        _ => Err(PlanError::Unsupported(format!(
            "unsupported SQL expression in condition: {e}"
        ))),
    }
}

fn sql_expr_to_operand(e: &SqlExpr, items: &[SelectItem]) -> Result<Operand> {
    match e {
        SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_) => {
            Ok(Operand::Field(sql_ident_expr_to_field(e)?))
        }
        SqlExpr::Nested(inner) => sql_expr_to_operand(inner, items),
        SqlExpr::Function(_) => Ok(Operand::Field(computed_output(e, items)?)),
        _ => Ok(Operand::Literal(sql_expr_to_literal(e)?)),
    }
}

/// Output field of the select item computing the same call as `e`.
fn computed_output(e: &SqlExpr, items: &[SelectItem]) -> Result<Field> {
    let calculator = function_calculator(e)?;
    items
        .iter()
        .find(|item| item.calculator.as_ref() == Some(&calculator))
        .map(|item| item.output.clone())
        .ok_or_else(|| {
            PlanError::InvalidStatement(format!(
                "{e} in a condition must also be computed in the select list"
            ))
        })
}

fn sql_expr_to_literal(e: &SqlExpr) -> Result<Literal> {
    match e {
        SqlExpr::Value(v) => Ok(Literal::scalar(v.to_string(), sql_value_to_literal(v)?)),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match sql_expr_to_literal(expr)? {
            Literal::Scalar {
                value: LiteralValue::Int64(i),
                ..
            } => Ok(Literal::scalar(e.to_string(), LiteralValue::Int64(-i))),
            Literal::Scalar {
                value: LiteralValue::Float64(f),
                ..
            } => Ok(Literal::scalar(e.to_string(), LiteralValue::Float64(-f))),
            _ => Err(PlanError::Unsupported(format!(
                "unary minus on a non-numeric literal: {e}"
            ))),
        },
        _ => Err(PlanError::Unsupported(format!(
            "unsupported SQL operand: {e}"
        ))),
    }
}

fn sql_value_to_literal(v: &Value) -> Result<LiteralValue> {
    match v {
        Value::Number(s, _) => {
            if s.contains('.') {
                let f: f64 = s
                    .parse()
                    .map_err(|_| PlanError::Planning(format!("bad number: {s}")))?;
                Ok(LiteralValue::Float64(f))
            } else {
                let i: i64 = s
                    .parse()
                    .map_err(|_| PlanError::Planning(format!("bad number: {s}")))?;
                Ok(LiteralValue::Int64(i))
            }
        }
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            Ok(LiteralValue::Utf8(s.clone()))
        }
        Value::Boolean(b) => Ok(LiteralValue::Boolean(*b)),
        Value::Null => Ok(LiteralValue::Null),
        _ => Err(PlanError::Unsupported(format!(
            "unsupported SQL literal: {v}"
        ))),
    }
}

fn sql_binop_to_compare(op: &SqlBinaryOp) -> Result<CompareOp> {
    Ok(match op {
        SqlBinaryOp::Eq => CompareOp::Eq,
        SqlBinaryOp::NotEq => CompareOp::NotEq,
        SqlBinaryOp::Lt => CompareOp::Lt,
        SqlBinaryOp::LtEq => CompareOp::LtEq,
        SqlBinaryOp::Gt => CompareOp::Gt,
        SqlBinaryOp::GtEq => CompareOp::GtEq,
        _ => {
            return Err(PlanError::Unsupported(format!(
                "unsupported comparison operator: {op}"
            )))
        }
    })
}

fn object_name_to_string(n: &ObjectName) -> String {
    n.0.iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn compound_ident_to_string(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn sql_ident_expr_to_field(e: &SqlExpr) -> Result<Field> {
    match e {
        SqlExpr::Identifier(id) => Ok(Field::new(id.value.clone())),
        SqlExpr::CompoundIdentifier(parts) => Ok(Field::parse(&compound_ident_to_string(parts))),
        _ => Err(PlanError::Unsupported(format!(
            "expected a column reference, got {e}"
        ))),
    }
}
