//! Literal and predicate model evaluated against [`Record`]s.
//!
//! Evaluation contract:
//! - [`Expression::evaluate`] reports type misuse (e.g. `>` on strings) as
//!   [`PlanError::Execution`];
//! - [`Expression::is_true`] never fails: misuse degrades to `false` so one bad
//!   record cannot stop a stream.

use std::cmp::Ordering;
use std::fmt;

use flowplan_common::{PlanError, Record, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::field::Field;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

impl LiteralValue {
    pub fn to_json(&self) -> Value {
        match self {
            LiteralValue::Int64(v) => Value::from(*v),
            LiteralValue::Float64(v) => Value::from(*v),
            LiteralValue::Utf8(v) => Value::from(v.clone()),
            LiteralValue::Boolean(v) => Value::from(*v),
            LiteralValue::Null => Value::Null,
        }
    }
}

/// A typed constant as written in the statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Scalar { content: String, value: LiteralValue },
    /// Value list of an `IN (...)` predicate.
    Multi {
        content: String,
        literals: Vec<Literal>,
    },
}

/// What a literal evaluates to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiteralResult<'a> {
    Scalar(&'a LiteralValue),
    /// A multi literal always yields its list, never a flattened scalar.
    List(&'a [Literal]),
}

impl Literal {
    pub fn scalar(content: impl Into<String>, value: LiteralValue) -> Self {
        Literal::Scalar {
            content: content.into(),
            value,
        }
    }

    pub fn multi(content: impl Into<String>, literals: Vec<Literal>) -> Self {
        Literal::Multi {
            content: content.into(),
            literals,
        }
    }

    /// Source text of the literal.
    pub fn content(&self) -> &str {
        match self {
            Literal::Scalar { content, .. } | Literal::Multi { content, .. } => content,
        }
    }

    pub fn result(&self) -> LiteralResult<'_> {
        match self {
            Literal::Scalar { value, .. } => LiteralResult::Scalar(value),
            Literal::Multi { literals, .. } => LiteralResult::List(literals),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
}

impl CompareOp {
    /// Only plain equality can become an equi-join key.
    pub fn is_equality(self) -> bool {
        self == CompareOp::Eq
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Field(Field),
    Literal(Literal),
}

impl Operand {
    /// Text as written, used for identity checks between the two sides.
    pub fn text(&self) -> String {
        match self {
            Operand::Field(f) => f.to_string(),
            Operand::Literal(l) => l.content().to_string(),
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Operand::Field(f) => Some(f),
            Operand::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Operand::Literal(l) => Some(l),
            Operand::Field(_) => None,
        }
    }
}

/// Leaf predicate `left op right`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub name: String,
    pub left: Operand,
    pub op: CompareOp,
    pub right: Operand,
}

impl Comparison {
    /// Left-hand side as written.
    pub fn var_name(&self) -> String {
        self.left.text()
    }

    /// Right-hand side as written.
    pub fn value_text(&self) -> String {
        self.right.text()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    And,
    Or,
}

impl Relation {
    pub fn keyword(self) -> &'static str {
        match self {
            Relation::And => "AND",
            Relation::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationExpression {
    pub name: String,
    pub relation: Relation,
    pub children: Vec<Expression>,
}

impl RelationExpression {
    pub fn child_names(&self) -> Vec<&str> {
        self.children.iter().map(Expression::name).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Comparison(Comparison),
    Relation(RelationExpression),
}

impl Expression {
    pub fn compare(left: Operand, op: CompareOp, right: Operand) -> Self {
        Expression::Comparison(Comparison {
            name: String::new(),
            left,
            op,
            right,
        })
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Self::relation(Relation::And, children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Self::relation(Relation::Or, children)
    }

    fn relation(relation: Relation, children: Vec<Expression>) -> Self {
        Expression::Relation(RelationExpression {
            name: String::new(),
            relation,
            children,
        })
    }

    /// Combine conjuncts; `None` for an empty list.
    pub fn and_all(mut conjuncts: Vec<Expression>) -> Option<Expression> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Expression::and(conjuncts)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Expression::Comparison(c) => &c.name,
            Expression::Relation(r) => &r.name,
        }
    }

    /// Flatten nested relations of the same kind and give every node a stable
    /// name (`leaf_<n>` / `relation_<n>`, pre-order).
    pub fn normalized(&self) -> Expression {
        let mut leaves = 0usize;
        let mut relations = 0usize;
        normalize(self.clone(), &mut leaves, &mut relations)
    }

    /// All leaf comparisons, pre-order.
    pub fn leaves(&self) -> Vec<&Comparison> {
        let mut out = vec![];
        collect_leaves(self, &mut out);
        out
    }

    /// Split a top-level `AND` into its operands.
    pub fn conjuncts(self) -> Vec<Expression> {
        match self {
            Expression::Relation(r) if r.relation == Relation::And => r
                .children
                .into_iter()
                .flat_map(Expression::conjuncts)
                .collect(),
            other => vec![other],
        }
    }

    pub fn referenced_fields(&self) -> Vec<&Field> {
        self.leaves()
            .into_iter()
            .flat_map(|c| [&c.left, &c.right])
            .filter_map(Operand::as_field)
            .collect()
    }

    /// Copy with every field operand passed through `resolve`; fields it does
    /// not know are kept as written.
    pub fn map_fields(&self, resolve: &dyn Fn(&Field) -> Option<Field>) -> Expression {
        match self {
            Expression::Comparison(c) => {
                let mut c = c.clone();
                for operand in [&mut c.left, &mut c.right] {
                    if let Operand::Field(f) = operand {
                        if let Some(resolved) = resolve(&*f) {
                            *f = resolved;
                        }
                    }
                }
                Expression::Comparison(c)
            }
            Expression::Relation(r) => Expression::Relation(RelationExpression {
                name: r.name.clone(),
                relation: r.relation,
                children: r.children.iter().map(|c| c.map_fields(resolve)).collect(),
            }),
        }
    }

    /// Fields are read by their exact record key: bare for the main side,
    /// alias-qualified for a joined side. A missing key reads as null.
    pub fn evaluate(&self, record: &Record) -> Result<bool> {
        match self {
            Expression::Comparison(c) => evaluate_comparison(c, record),
            Expression::Relation(r) => match r.relation {
                Relation::And => {
                    for child in &r.children {
                        if !child.evaluate(record)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Relation::Or => {
                    for child in &r.children {
                        if child.evaluate(record)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            },
        }
    }

    pub fn is_true(&self, record: &Record) -> bool {
        match self.evaluate(record) {
            Ok(v) => v,
            Err(e) => {
                debug!(predicate = %self, error = %e, "predicate misuse treated as false");
                false
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Comparison(c) => {
                write!(f, "{} {} {}", c.left.text(), c.op.symbol(), c.right.text())
            }
            Expression::Relation(r) => {
                for (i, child) in r.children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", r.relation.keyword())?;
                    }
                    match child {
                        Expression::Relation(_) => write!(f, "({child})")?,
                        Expression::Comparison(_) => write!(f, "{child}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn normalize(expr: Expression, leaves: &mut usize, relations: &mut usize) -> Expression {
    match expr {
        Expression::Comparison(mut c) => {
            c.name = format!("leaf_{leaves}");
            *leaves += 1;
            Expression::Comparison(c)
        }
        Expression::Relation(r) => {
            let name = format!("relation_{relations}");
            *relations += 1;
            let mut children = Vec::with_capacity(r.children.len());
            for child in r.children {
                match child {
                    Expression::Relation(inner) if inner.relation == r.relation => {
                        children.extend(flatten_same(inner, r.relation));
                    }
                    other => children.push(other),
                }
            }
            let children = children
                .into_iter()
                .map(|c| normalize(c, leaves, relations))
                .collect();
            Expression::Relation(RelationExpression {
                name,
                relation: r.relation,
                children,
            })
        }
    }
}

fn flatten_same(r: RelationExpression, relation: Relation) -> Vec<Expression> {
    r.children
        .into_iter()
        .flat_map(|child| match child {
            Expression::Relation(inner) if inner.relation == relation => {
                flatten_same(inner, relation)
            }
            other => vec![other],
        })
        .collect()
}

fn collect_leaves<'a>(expr: &'a Expression, out: &mut Vec<&'a Comparison>) {
    match expr {
        Expression::Comparison(c) => out.push(c),
        Expression::Relation(r) => {
            for child in &r.children {
                collect_leaves(child, out);
            }
        }
    }
}

fn operand_value(operand: &Operand, record: &Record) -> Result<Value> {
    match operand {
        Operand::Field(f) => Ok(record.get(&f.to_string()).cloned().unwrap_or(Value::Null)),
        Operand::Literal(l) => match l.result() {
            LiteralResult::Scalar(v) => Ok(v.to_json()),
            LiteralResult::List(_) => Err(PlanError::Execution(format!(
                "value list {} used as a scalar",
                l.content()
            ))),
        },
    }
}

fn evaluate_comparison(c: &Comparison, record: &Record) -> Result<bool> {
    let left = operand_value(&c.left, record)?;
    match c.op {
        CompareOp::In | CompareOp::NotIn => {
            let list = match &c.right {
                Operand::Literal(l) => match l.result() {
                    LiteralResult::List(items) => items,
                    LiteralResult::Scalar(_) => std::slice::from_ref(l),
                },
                Operand::Field(f) => {
                    return Err(PlanError::Execution(format!(
                        "IN requires a value list, got field {f}"
                    )))
                }
            };
            if left.is_null() {
                return Ok(false);
            }
            let mut found = false;
            for item in list {
                let candidate = operand_value(&Operand::Literal(item.clone()), record)?;
                if compare_values(&left, CompareOp::Eq, &candidate)? {
                    found = true;
                    break;
                }
            }
            Ok(found == (c.op == CompareOp::In))
        }
        op => {
            let right = operand_value(&c.right, record)?;
            compare_values(&left, op, &right)
        }
    }
}

fn compare_values(left: &Value, op: CompareOp, right: &Value) -> Result<bool> {
    if left.is_null() || right.is_null() {
        return Ok(false);
    }
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (as_f64(a)?, as_f64(b)?);
            a.partial_cmp(&b).ok_or_else(|| {
                PlanError::Execution(format!("cannot order {a} and {b}"))
            })?
        }
        (Value::String(a), Value::String(b)) => {
            return equality_only(op, a == b, "string");
        }
        (Value::Bool(a), Value::Bool(b)) => {
            return equality_only(op, a == b, "boolean");
        }
        _ => {
            return Err(PlanError::Execution(format!(
                "type mismatch comparing {left} {} {right}",
                op.symbol()
            )))
        }
    };
    Ok(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
        CompareOp::In | CompareOp::NotIn => {
            return Err(PlanError::Execution(
                "IN is not a scalar comparison".to_string(),
            ))
        }
    })
}

fn equality_only(op: CompareOp, equal: bool, kind: &str) -> Result<bool> {
    match op {
        CompareOp::Eq => Ok(equal),
        CompareOp::NotEq => Ok(!equal),
        other => Err(PlanError::Execution(format!(
            "operator {} is not defined for {kind} values",
            other.symbol()
        ))),
    }
}

fn as_f64(n: &serde_json::Number) -> Result<f64> {
    n.as_f64()
        .ok_or_else(|| PlanError::Execution(format!("number {n} is not representable")))
}

#[cfg(test)]
mod tests {
    use flowplan_common::Record;
    use serde_json::json;

    use super::{CompareOp, Expression, Literal, LiteralResult, LiteralValue, Operand};
    use crate::field::Field;

    fn col(raw: &str) -> Operand {
        Operand::Field(Field::parse(raw))
    }

    fn int(v: i64) -> Operand {
        Operand::Literal(Literal::scalar(v.to_string(), LiteralValue::Int64(v)))
    }

    fn text(v: &str) -> Operand {
        Operand::Literal(Literal::scalar(format!("'{v}'"), LiteralValue::Utf8(v.into())))
    }

    fn record() -> Record {
        Record::from_json(&json!({"id": 7, "name": "bob", "c.id": 9, "ts": 150}))
    }

    #[test]
    fn multi_literal_result_is_the_list() {
        let list = Literal::multi(
            "(1, 2)",
            vec![
                Literal::scalar("1", LiteralValue::Int64(1)),
                Literal::scalar("2", LiteralValue::Int64(2)),
            ],
        );
        match list.result() {
            LiteralResult::List(items) => assert_eq!(items.len(), 2),
            LiteralResult::Scalar(_) => panic!("multi literal flattened"),
        }
    }

    #[test]
    fn compares_numbers_and_qualified_fields() {
        let rec = record();
        assert!(Expression::compare(col("ts"), CompareOp::Gt, int(100)).is_true(&rec));
        assert!(Expression::compare(col("c.id"), CompareOp::Eq, int(9)).is_true(&rec));
        // a qualified field never reads the main side's bare column
        assert!(!Expression::compare(col("o.id"), CompareOp::Eq, int(7)).is_true(&rec));
        let unmatched = Record::from_json(&json!({"id": 7, "amt": 1}));
        assert!(!Expression::compare(col("c.id"), CompareOp::Eq, int(7)).is_true(&unmatched));
        assert!(!Expression::compare(col("missing"), CompareOp::Eq, int(7)).is_true(&rec));
    }

    #[test]
    fn ordering_strings_is_misuse_and_degrades_to_false() {
        let rec = record();
        let expr = Expression::compare(col("name"), CompareOp::Gt, int(3));
        assert!(expr.evaluate(&rec).is_err());
        assert!(!expr.is_true(&rec));

        let expr = Expression::compare(col("name"), CompareOp::Gt, text("a"));
        assert!(expr.evaluate(&rec).is_err());
        assert!(!expr.is_true(&rec));
    }

    #[test]
    fn in_list_uses_every_literal() {
        let rec = record();
        let list = Literal::multi(
            "(1, 7)",
            vec![
                Literal::scalar("1", LiteralValue::Int64(1)),
                Literal::scalar("7", LiteralValue::Int64(7)),
            ],
        );
        let expr = Expression::compare(col("id"), CompareOp::In, Operand::Literal(list.clone()));
        assert!(expr.is_true(&rec));
        let expr = Expression::compare(col("id"), CompareOp::NotIn, Operand::Literal(list));
        assert!(!expr.is_true(&rec));
    }

    #[test]
    fn relations_short_circuit() {
        let rec = record();
        let and = Expression::and(vec![
            Expression::compare(col("id"), CompareOp::Eq, int(7)),
            Expression::compare(col("ts"), CompareOp::Lt, int(100)),
        ]);
        assert!(!and.is_true(&rec));
        let or = Expression::or(vec![
            Expression::compare(col("ts"), CompareOp::Gt, int(100)),
            Expression::compare(col("name"), CompareOp::Gt, int(1)),
        ]);
        assert!(or.is_true(&rec));
    }

    #[test]
    fn normalization_flattens_and_names_nodes() {
        let nested = Expression::and(vec![
            Expression::and(vec![
                Expression::compare(col("a.x"), CompareOp::Eq, col("b.y")),
                Expression::compare(col("a.z"), CompareOp::Eq, col("b.z")),
            ]),
            Expression::or(vec![
                Expression::compare(col("a.t"), CompareOp::Gt, int(1)),
                Expression::compare(col("a.t"), CompareOp::Lt, int(0)),
            ]),
        ]);
        let norm = nested.normalized();
        match &norm {
            Expression::Relation(r) => {
                assert_eq!(r.child_names(), vec!["leaf_0", "leaf_1", "relation_1"]);
            }
            Expression::Comparison(_) => panic!("expected relation"),
        }
        assert_eq!(norm.leaves().len(), 4);
        assert_eq!(
            norm.to_string(),
            "a.x = b.y AND a.z = b.z AND (a.t > 1 OR a.t < 0)"
        );
    }

    #[test]
    fn map_fields_rewrites_known_fields_only() {
        let expr = Expression::and(vec![
            Expression::compare(col("o.id"), CompareOp::Eq, int(7)),
            Expression::compare(col("x"), CompareOp::Gt, int(1)),
        ]);
        let mapped = expr.map_fields(&|f: &Field| {
            (f.alias() == Some("o")).then(|| Field::new(f.name()))
        });
        assert_eq!(mapped.to_string(), "id = 7 AND x > 1");
        assert!(!mapped.is_true(&record()));
        assert!(Expression::compare(col("id"), CompareOp::Eq, int(7)).is_true(&record()));
    }

    #[test]
    fn conjuncts_split_nested_ands() {
        let expr = Expression::and(vec![
            Expression::and(vec![
                Expression::compare(col("a"), CompareOp::Eq, int(1)),
                Expression::compare(col("b"), CompareOp::Eq, int(2)),
            ]),
            Expression::compare(col("c"), CompareOp::Eq, int(3)),
        ]);
        assert_eq!(expr.conjuncts().len(), 3);
        assert!(Expression::and_all(vec![]).is_none());
    }
}
