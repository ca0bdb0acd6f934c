//! Join condition analysis: equi-join key extraction and residual detection.

use flowplan_common::{PlanError, Result};
use serde::{Deserialize, Serialize};

use crate::expression::{Comparison, Expression, Operand, Relation};
use crate::field::{resolve_in_scope, Field, TableScope};

/// ON condition as written plus its parsed form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinCondition {
    content: String,
    expression: Expression,
}

impl JoinCondition {
    pub fn new(content: impl Into<String>, expression: Expression) -> Self {
        Self {
            content: content.into(),
            expression,
        }
    }

    /// Parse condition text with the SQL front-end.
    pub fn parse(content: &str) -> Result<Self> {
        let expression = crate::sql_frontend::parse_condition(content)?;
        Ok(Self::new(content, expression))
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

/// Index-aligned equi-join keys: `left_keys[i]` pairs with `right_keys[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKeys {
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
    /// Some part of the condition is not an equi-join test and must be
    /// re-applied after matching.
    pub has_non_equal: bool,
}

impl JoinKeys {
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.left_keys
            .iter()
            .map(String::as_str)
            .zip(self.right_keys.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.left_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left_keys.is_empty()
    }

    /// Identical pairs collapse; a left key may pair with several right keys.
    fn push(&mut self, left: String, right: String) {
        if self.pairs().any(|(l, r)| l == left && r == right) {
            return;
        }
        self.left_keys.push(left);
        self.right_keys.push(right);
    }
}

/// Decompose `condition` into equi-join key pairs for the two sides.
///
/// Contract:
/// - `or` at the top of the condition is rejected;
/// - only leaf children of a top-level `and` are key candidates; nested
///   sub-relations and non-equality leaves set `has_non_equal`;
/// - pairs keep the order in which their leaves appear;
/// - `literal = field` is read as `field = literal`.
pub fn analyze_join_condition(
    condition: &JoinCondition,
    left: &dyn TableScope,
    right: &dyn TableScope,
) -> Result<JoinKeys> {
    let root = condition.expression().normalized();
    let leaves = root.leaves();

    let selected: Vec<&Comparison> = match &root {
        Expression::Relation(rel) => {
            if rel.relation == Relation::Or {
                return Err(PlanError::Planning(format!(
                    "join can not have or condition: {}",
                    condition.content()
                )));
            }
            let names = rel.child_names();
            leaves
                .iter()
                .copied()
                .filter(|leaf| names.contains(&leaf.name.as_str()))
                .collect()
        }
        Expression::Comparison(c) => vec![c],
    };
    if selected.is_empty() {
        return Err(PlanError::Planning(format!(
            "can not find join condition for stream join, join can not have 'or' condition: {}",
            condition.content()
        )));
    }

    let mut keys = JoinKeys {
        has_non_equal: selected.len() < leaves.len(),
        ..JoinKeys::default()
    };

    for leaf in selected {
        if !leaf.op.is_equality() {
            keys.has_non_equal = true;
            continue;
        }
        let (var_operand, value_operand) = match (&leaf.left, &leaf.right) {
            (Operand::Literal(_), Operand::Field(_)) => (&leaf.right, &leaf.left),
            _ => (&leaf.left, &leaf.right),
        };
        let value_field = match value_operand {
            Operand::Field(f) => f,
            // `a.x = 5` filters, it does not correlate the two sides
            Operand::Literal(_) => {
                keys.has_non_equal = true;
                continue;
            }
        };
        let var = var_operand.text();
        let value = value_operand.text();
        if var == value {
            keys.push(value_field.name().to_string(), value_field.name().to_string());
            continue;
        }
        if let Some(left_field) = resolve_in_scope(&var, left) {
            let right_key = side_key(&value, value_field, right);
            keys.push(left_field.to_string(), right_key);
        } else if let Some(right_field) = resolve_in_scope(&var, right) {
            let left_key = side_key(&value, value_field, left);
            keys.push(left_key, right_field.to_string());
        } else {
            return Err(PlanError::Planning(format!(
                "parser join condition error, {var} is unknown to both sides: {}",
                condition.content()
            )));
        }
    }

    if keys.is_empty() {
        return Err(PlanError::Planning(format!(
            "can not find equi-join field in condition: {}",
            condition.content()
        )));
    }
    Ok(keys)
}

fn side_key(raw: &str, field: &Field, scope: &dyn TableScope) -> String {
    resolve_in_scope(raw, scope)
        .map(|f| f.to_string())
        .unwrap_or_else(|| field.name().to_string())
}
