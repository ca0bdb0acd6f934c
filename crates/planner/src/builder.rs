//! Per-table builders: the closed set of plan-producing sides a join can have.

use std::collections::{BTreeSet, HashMap};

use arrow_schema::SchemaRef;
use flowplan_common::{NameCreator, PlanError, PlannerConfig, Result};

use crate::condition::JoinCondition;
use crate::expression::Expression;
use crate::field::{resolve_in_scope, TableScope};
use crate::join_builder::JoinBuilder;
use crate::pipeline::{
    DimensionJoinStage, FilterStage, LateralJoinStage, Pipeline, SourceStage, Stage,
};
use crate::window::JoinType;

/// How a catalog table takes part in a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    /// Unbounded stream; joining two streams needs a shared window.
    Stream,
    /// Snapshot (dimension) table, joined by lookup.
    Dimension,
    /// Table function expanded per row.
    Lateral { function: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct TableSource {
    pub kind: TableKind,
    pub schema: SchemaRef,
}

/// The client provides this from its catalog.
pub trait TableCatalog {
    /// Return kind and schema for a table by name.
    fn table_source(&self, table: &str) -> Result<TableSource>;
}

impl TableCatalog for HashMap<String, TableSource> {
    fn table_source(&self, table: &str) -> Result<TableSource> {
        self.get(table)
            .cloned()
            .ok_or_else(|| PlanError::Planning(format!("unknown table: {table}")))
    }
}

/// Which part of a stream join the fragment under construction belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchRole {
    Root,
    LeftBranch,
    /// Right branch of a join whose right side reads this table.
    RightBranch(String),
}

/// State threaded through one compilation.
pub struct BuildContext<'a> {
    pub config: &'a PlannerConfig,
    pub catalog: &'a dyn TableCatalog,
    pub names: NameCreator,
}

impl<'a> BuildContext<'a> {
    pub fn new(config: &'a PlannerConfig, catalog: &'a dyn TableCatalog) -> Self {
        Self {
            config,
            catalog,
            names: NameCreator::new(),
        }
    }

    /// Create the builder for `table` as referenced in a statement.
    pub fn table_builder(&self, table: &str, as_name: Option<&str>) -> Result<TableBuilder> {
        let source = self.catalog.table_source(table)?;
        Ok(TableBuilder::from_source(table, as_name, source))
    }
}

#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table_name: String,
    as_name: Option<String>,
    schema: SchemaRef,
    filters: Vec<Expression>,
}

impl SelectBuilder {
    pub fn new(table_name: impl Into<String>, as_name: Option<String>, schema: SchemaRef) -> Self {
        Self {
            table_name: table_name.into(),
            as_name,
            schema,
            filters: vec![],
        }
    }

    fn has_column(&self, column: &str) -> bool {
        self.schema.fields().iter().any(|f| f.name() == column)
    }

    fn column_names(&self) -> BTreeSet<String> {
        self.schema.fields().iter().map(|f| f.name().clone()).collect()
    }

    fn build(&self, pipeline: &mut Pipeline, ctx: &mut BuildContext<'_>) -> Result<()> {
        let label = ctx.names.create_name(&[&pipeline.name, "source", &self.table_name]);
        pipeline.add_stage(Stage::Source(SourceStage {
            label,
            table: self.table_name.clone(),
            as_name: self.as_name.clone(),
        }));
        if pipeline.dependency.is_none() {
            pipeline.dependency = Some(self.table_name.clone());
        }
        if let Some(predicate) = Expression::and_all(self.filters.clone()) {
            let label = ctx.names.create_name(&[&pipeline.name, "filter"]);
            pipeline.add_stage(Stage::Filter(FilterStage { label, predicate }));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DimensionBuilder {
    table_name: String,
    as_name: Option<String>,
    schema: SchemaRef,
}

impl DimensionBuilder {
    pub fn new(table_name: impl Into<String>, as_name: Option<String>, schema: SchemaRef) -> Self {
        Self {
            table_name: table_name.into(),
            as_name,
            schema,
        }
    }

    /// Compile the lookup step with the join condition passed through.
    pub fn build_dim_condition(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        join_type: JoinType,
        condition: &JoinCondition,
    ) -> Result<()> {
        let label = ctx.names.create_name(&[&pipeline.name, "dim", &self.table_name]);
        pipeline.add_stage(Stage::DimensionJoin(DimensionJoinStage {
            label,
            table: self.table_name.clone(),
            as_name: self.as_name.clone(),
            join_type,
            condition: condition.clone(),
        }));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LateralBuilder {
    table_name: String,
    as_name: Option<String>,
    function: String,
    args: Vec<String>,
    schema: SchemaRef,
}

impl LateralBuilder {
    pub fn new(
        table_name: impl Into<String>,
        as_name: Option<String>,
        function: impl Into<String>,
        args: Vec<String>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            as_name,
            function: function.into(),
            args,
            schema,
        }
    }

    fn build(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        join_type: JoinType,
    ) -> Result<()> {
        let label = ctx.names.create_name(&[&pipeline.name, "lateral", &self.function]);
        pipeline.add_stage(Stage::LateralJoin(LateralJoinStage {
            label,
            function: self.function.clone(),
            args: self.args.clone(),
            as_name: self.as_name.clone(),
            fields: self.schema.fields().iter().map(|f| f.name().clone()).collect(),
            join_type,
        }));
        Ok(())
    }
}

/// Closed set of builders; the join builder dispatches on the variant.
#[derive(Debug, Clone)]
pub enum TableBuilder {
    Select(SelectBuilder),
    Dimension(DimensionBuilder),
    Lateral(LateralBuilder),
    Join(Box<JoinBuilder>),
}

impl TableBuilder {
    pub fn from_source(table: &str, as_name: Option<&str>, source: TableSource) -> Self {
        let as_name = as_name.filter(|a| !a.is_empty()).map(str::to_string);
        match source.kind {
            TableKind::Stream => {
                TableBuilder::Select(SelectBuilder::new(table, as_name, source.schema))
            }
            TableKind::Dimension => {
                TableBuilder::Dimension(DimensionBuilder::new(table, as_name, source.schema))
            }
            TableKind::Lateral { function, args } => TableBuilder::Lateral(LateralBuilder::new(
                table,
                as_name,
                function,
                args,
                source.schema,
            )),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TableBuilder::Select(_) => "select",
            TableBuilder::Dimension(_) => "dimension",
            TableBuilder::Lateral(_) => "lateral",
            TableBuilder::Join(_) => "join",
        }
    }

    /// Resolve `raw` to this builder's canonical field name.
    pub fn field_name(&self, raw: &str) -> Option<String> {
        resolve_in_scope(raw, self).map(|f| f.to_string())
    }

    /// Every field this side produces.
    pub fn all_field_names(&self) -> BTreeSet<String> {
        match self {
            TableBuilder::Select(b) => b.column_names(),
            TableBuilder::Dimension(b) => qualified_names(b.as_name.as_deref(), &b.schema),
            TableBuilder::Lateral(b) => qualified_names(b.as_name.as_deref(), &b.schema),
            TableBuilder::Join(j) => j.all_field_names(),
        }
    }

    /// Streams that must be available before this side can run.
    pub fn dependent_tables(&self) -> BTreeSet<String> {
        match self {
            TableBuilder::Select(b) => BTreeSet::from([b.table_name.clone()]),
            TableBuilder::Dimension(_) | TableBuilder::Lateral(_) => BTreeSet::new(),
            TableBuilder::Join(j) => j.dependent_tables(),
        }
    }

    /// Attach a pre-join filter. Only plain stream sides accept one.
    pub fn push_filter(&mut self, predicate: Expression) -> std::result::Result<(), Expression> {
        match self {
            TableBuilder::Select(b) => {
                b.filters.push(predicate);
                Ok(())
            }
            _ => Err(predicate),
        }
    }

    pub fn build(
        &mut self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<()> {
        match self {
            TableBuilder::Select(b) => b.build(pipeline, ctx),
            TableBuilder::Dimension(b) => Err(PlanError::Planning(format!(
                "dimension table {} can only be read through a join",
                b.table_name
            ))),
            TableBuilder::Lateral(b) => b.build(pipeline, ctx, JoinType::Inner),
            TableBuilder::Join(j) => j.build(pipeline, ctx, role).map(|_| ()),
        }
    }

    /// Lateral step of a join; the join type decides whether rows without
    /// expansion survive.
    pub(crate) fn build_lateral(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        join_type: JoinType,
    ) -> Result<()> {
        match self {
            TableBuilder::Lateral(b) => b.build(pipeline, ctx, join_type),
            other => Err(PlanError::Planning(format!(
                "{} builder is not a lateral table",
                other.kind_name()
            ))),
        }
    }
}

impl TableScope for TableBuilder {
    fn table_name(&self) -> &str {
        match self {
            TableBuilder::Select(b) => &b.table_name,
            TableBuilder::Dimension(b) => &b.table_name,
            TableBuilder::Lateral(b) => &b.table_name,
            TableBuilder::Join(j) => j.table_name(),
        }
    }

    fn as_name(&self) -> Option<&str> {
        match self {
            TableBuilder::Select(b) => b.as_name.as_deref(),
            TableBuilder::Dimension(b) => b.as_name.as_deref(),
            TableBuilder::Lateral(b) => b.as_name.as_deref(),
            TableBuilder::Join(_) => None,
        }
    }

    fn lookup(&self, alias: Option<&str>, column: &str) -> Option<String> {
        match self {
            TableBuilder::Select(b) => b.has_column(column).then(|| column.to_string()),
            TableBuilder::Dimension(b) => b
                .schema
                .fields()
                .iter()
                .any(|f| f.name() == column)
                .then(|| column.to_string()),
            TableBuilder::Lateral(b) => b
                .schema
                .fields()
                .iter()
                .any(|f| f.name() == column)
                .then(|| column.to_string()),
            TableBuilder::Join(j) => j.lookup(alias, column),
        }
    }

    fn accepts_alias(&self, alias: &str) -> bool {
        match self {
            TableBuilder::Join(j) => j.accepts_alias(alias),
            _ => alias == self.as_name().unwrap_or_else(|| self.table_name()),
        }
    }
}

fn qualified_names(as_name: Option<&str>, schema: &SchemaRef) -> BTreeSet<String> {
    schema
        .fields()
        .iter()
        .map(|f| match as_name {
            Some(alias) => format!("{alias}.{}", f.name()),
            None => f.name().clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use flowplan_common::PlannerConfig;

    use super::{BranchRole, BuildContext, TableBuilder, TableKind, TableSource};
    use crate::pipeline::{Pipeline, Stage};

    fn catalog() -> HashMap<String, TableSource> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("amt", DataType::Float64, true),
        ]));
        let mut tables = HashMap::new();
        tables.insert(
            "orders".to_string(),
            TableSource {
                kind: TableKind::Stream,
                schema: schema.clone(),
            },
        );
        tables.insert(
            "rates".to_string(),
            TableSource {
                kind: TableKind::Dimension,
                schema,
            },
        );
        tables
    }

    #[test]
    fn select_builder_emits_source_and_dependency() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut builder = ctx.table_builder("orders", Some("o")).expect("builder");
        assert_eq!(builder.field_name("o.id").as_deref(), Some("id"));
        assert_eq!(builder.field_name("orders.id"), None);
        assert_eq!(builder.field_name("amt").as_deref(), Some("amt"));

        let mut p = Pipeline::new("ns", "p");
        builder
            .build(&mut p, &mut ctx, &BranchRole::Root)
            .expect("build");
        assert!(matches!(p.stages[0], Stage::Source(_)));
        assert_eq!(p.dependency.as_deref(), Some("orders"));
    }

    #[test]
    fn dimension_tables_have_no_stream_dependency() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let ctx = BuildContext::new(&cfg, &cat);
        let dim = ctx.table_builder("rates", Some("r")).expect("builder");
        assert!(matches!(dim, TableBuilder::Dimension(_)));
        assert!(dim.dependent_tables().is_empty());
        assert!(dim.all_field_names().contains("r.amt"));
    }

    #[test]
    fn unknown_table_is_a_planning_error() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let ctx = BuildContext::new(&cfg, &cat);
        let err = ctx.table_builder("nope", None).expect_err("must fail");
        assert!(err.to_string().contains("unknown table: nope"), "err={err}");
    }
}
