//! The join correlation window shared by the two fragments of a stream join.

use std::fmt;
use std::sync::Arc;

use flowplan_common::Result;
use serde::{Deserialize, Serialize};

use crate::condition::{analyze_join_condition, JoinCondition};
use crate::field::TableScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => f.write_str("inner"),
            JoinType::Left => f.write_str("left"),
        }
    }
}

/// A window under construction. Only the join builder mutates it; it is
/// frozen into a [`Window`] before either fragment is compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    namespace: String,
    name: String,
    left_join_field_names: Vec<String>,
    right_join_field_names: Vec<String>,
    join_type: JoinType,
    residual: Option<JoinCondition>,
    right_as_name: Option<String>,
}

impl WindowSpec {
    fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            left_join_field_names: vec![],
            right_join_field_names: vec![],
            join_type: JoinType::Inner,
            residual: None,
            right_as_name: None,
        }
    }

    /// Run the condition analyzer and fill keys, join type, residual and right alias.
    ///
    /// When any part of the condition is not an equi-join test the whole
    /// condition is kept as residual and re-checked after key matching.
    pub fn from_condition(
        namespace: impl Into<String>,
        name: impl Into<String>,
        condition: &JoinCondition,
        join_type: JoinType,
        left: &dyn TableScope,
        right: &dyn TableScope,
    ) -> Result<Self> {
        let keys = analyze_join_condition(condition, left, right)?;
        let mut spec = Self::new(namespace, name);
        spec.left_join_field_names = keys.left_keys;
        spec.right_join_field_names = keys.right_keys;
        spec.join_type = join_type;
        spec.right_as_name = right.as_name().map(str::to_string);
        if keys.has_non_equal {
            spec.residual = Some(condition.clone());
        }
        Ok(spec)
    }

    pub fn freeze(self) -> Arc<Window> {
        Arc::new(Window {
            namespace: self.namespace,
            name: self.name,
            left_join_field_names: self.left_join_field_names,
            right_join_field_names: self.right_join_field_names,
            join_type: self.join_type,
            residual: self.residual,
            right_as_name: self.right_as_name,
        })
    }
}

/// Frozen join window, read-only for the rest of compilation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    namespace: String,
    name: String,
    left_join_field_names: Vec<String>,
    right_join_field_names: Vec<String>,
    join_type: JoinType,
    residual: Option<JoinCondition>,
    right_as_name: Option<String>,
}

impl Window {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn left_join_field_names(&self) -> &[String] {
        &self.left_join_field_names
    }

    pub fn right_join_field_names(&self) -> &[String] {
        &self.right_join_field_names
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Full ON condition when it holds non-equi predicates.
    pub fn residual(&self) -> Option<&JoinCondition> {
        self.residual.as_ref()
    }

    pub fn right_as_name(&self) -> Option<&str> {
        self.right_as_name.as_deref()
    }
}
