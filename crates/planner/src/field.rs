//! Qualified field references and alias-scoped name resolution across the two
//! sides of a join.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A column reference, optionally qualified by a table alias.
///
/// An empty alias is normalized to no alias, so `Field::qualified("", "id")`
/// equals `Field::new("id")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    alias: Option<String>,
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
        }
    }

    pub fn qualified(alias: impl Into<String>, name: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            alias: (!alias.is_empty()).then_some(alias),
            name: name.into(),
        }
    }

    /// Parse `alias.column` or `column`, splitting on the first `.`.
    pub fn parse(raw: &str) -> Self {
        match split_qualifier(raw) {
            (Some(alias), name) => Self::qualified(alias, name),
            (None, name) => Self::new(name),
        }
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_qualified(&self) -> bool {
        self.alias.is_some()
    }

    /// Loose match used when checking output schemas: names must agree and
    /// aliases must agree when both sides carry one.
    pub fn matches(&self, other: &Field) -> bool {
        self.name == other.name
            && match (&self.alias, &other.alias) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{alias}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Split `alias.column` on the first `.`.
pub fn split_qualifier(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once('.') {
        Some((alias, column)) => (Some(alias), column),
        None => (None, raw),
    }
}

/// One side of a join as seen by the name resolver.
pub trait TableScope {
    /// Physical table (or lateral function) name.
    fn table_name(&self) -> &str;

    /// Alias given in the statement, if any.
    fn as_name(&self) -> Option<&str>;

    /// Look up `column` (alias already accepted by [`TableScope::accepts_alias`])
    /// and return its canonical name in this scope.
    fn lookup(&self, alias: Option<&str>, column: &str) -> Option<String>;

    /// Whether a reference qualified with `alias` may belong to this scope.
    ///
    /// A scope without alias answers to its table name.
    fn accepts_alias(&self, alias: &str) -> bool {
        alias == self.as_name().unwrap_or_else(|| self.table_name())
    }
}

/// Resolve `raw` against a single scope.
pub fn resolve_in_scope(raw: &str, scope: &dyn TableScope) -> Option<Field> {
    let (alias, column) = split_qualifier(raw);
    if let Some(alias) = alias {
        if !scope.accepts_alias(alias) {
            return None;
        }
    }
    scope.lookup(alias, column).map(|name| Field::parse(&name))
}

/// Resolve a textual reference against the left and right side of a join.
///
/// Bare names search the left (main) side first. Left matches come back as the
/// left side reports them; right matches are always alias-qualified unless the
/// right side has no alias.
pub fn resolve_field(raw: &str, left: &dyn TableScope, right: &dyn TableScope) -> Option<Field> {
    if let Some(field) = resolve_in_scope(raw, left) {
        return Some(field);
    }
    let field = resolve_in_scope(raw, right)?;
    if field.is_qualified() {
        return Some(field);
    }
    Some(match right.as_name() {
        Some(alias) => Field::qualified(alias, field.name),
        None => field,
    })
}
