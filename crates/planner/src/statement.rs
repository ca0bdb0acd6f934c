//! Statement model: WHERE / GROUP BY / HAVING layered over one join.

use std::collections::BTreeSet;

use flowplan_common::{PlanError, PlannerConfig, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::builder::{BranchRole, BuildContext, TableBuilder, TableCatalog};
use crate::condition::JoinCondition;
use crate::expression::Expression;
use crate::field::{resolve_field, resolve_in_scope, Field, TableScope};
use crate::join_builder::{JoinBuilder, JoinStrategy};
use crate::pipeline::{
    AggExpr, EnrichStage, FilterStage, FunctionCall, GroupByStage, HavingStage, Pipeline, Stage,
};
use crate::window::JoinType;

/// How a select item is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Calculator {
    Aggregate(AggExpr),
    /// Two-phase field function, invoked by name at runtime.
    Function { function: String, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
    pub output: Field,
    pub calculator: Option<Calculator>,
}

impl SelectItem {
    pub fn column(output: Field) -> Self {
        Self {
            output,
            calculator: None,
        }
    }

    pub fn computed(output: Field, calculator: Calculator) -> Self {
        Self {
            output,
            calculator: Some(calculator),
        }
    }
}

/// `SELECT ... FROM source [AS s] <join> join_table [AS j] [ON condition]`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStatement {
    /// Statement text, for diagnostics.
    pub content: String,
    pub source_table: String,
    pub as_source_table: Option<String>,
    pub select_items: Vec<SelectItem>,
    pub join_type: JoinType,
    pub join_table: String,
    pub as_join_table: Option<String>,
    pub join_condition: Option<JoinCondition>,
}

impl JoinStatement {
    pub fn new(
        content: impl Into<String>,
        source_table: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            source_table: source_table.into(),
            as_source_table: None,
            select_items: vec![],
            join_type: JoinType::Inner,
            join_table: join_table.into(),
            as_join_table: None,
            join_condition: None,
        }
    }

    pub fn with_source_alias(mut self, alias: impl Into<String>) -> Self {
        self.as_source_table = Some(alias.into());
        self
    }

    pub fn with_join_alias(mut self, alias: impl Into<String>) -> Self {
        self.as_join_table = Some(alias.into());
        self
    }

    pub fn with_join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn with_condition(mut self, condition: JoinCondition) -> Self {
        self.join_condition = Some(condition);
        self
    }

    pub fn with_select_items(mut self, items: Vec<SelectItem>) -> Self {
        self.select_items = items;
        self
    }

    pub fn create_builder(&self, ctx: &BuildContext<'_>) -> Result<JoinBuilder> {
        let left = ctx.table_builder(&self.source_table, self.as_source_table.as_deref())?;
        let right = ctx.table_builder(&self.join_table, self.as_join_table.as_deref())?;
        Ok(JoinBuilder::new(
            left,
            right,
            self.join_type,
            self.join_condition.clone(),
        ))
    }

    /// Compile the join, then run its field functions over every joined row.
    fn build(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<JoinStrategy> {
        let strategy = self.create_builder(ctx)?.build(pipeline, ctx, role)?;
        if !pipeline.is_break {
            add_enrich_stage(pipeline, ctx, self.function_calls());
        }
        Ok(strategy)
    }

    fn aggregates(&self) -> Vec<(AggExpr, String)> {
        self.select_items
            .iter()
            .filter_map(|item| match &item.calculator {
                Some(Calculator::Aggregate(agg)) => Some((agg.clone(), item.output.to_string())),
                _ => None,
            })
            .collect()
    }

    fn function_calls(&self) -> Vec<FunctionCall> {
        self.select_items
            .iter()
            .filter_map(|item| match &item.calculator {
                Some(Calculator::Function { function, args }) => Some(FunctionCall {
                    function: function.clone(),
                    args: args.clone(),
                    output: item.output.to_string(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Join plus optional filters on either side of it and an optional grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereGroupByStatement {
    pub join: JoinStatement,
    /// Filter applied to each side before the join, where it can be pushed.
    pub before_join_where: Option<Expression>,
    /// Filter applied to the joined stream.
    pub after_join_where: Option<Expression>,
    pub group_by: Vec<Field>,
}

impl WhereGroupByStatement {
    pub fn new(join: JoinStatement) -> Self {
        Self {
            join,
            before_join_where: None,
            after_join_where: None,
            group_by: vec![],
        }
    }

    pub fn with_before_join_where(mut self, predicate: Expression) -> Self {
        self.before_join_where = Some(predicate);
        self
    }

    pub fn with_after_join_where(mut self, predicate: Expression) -> Self {
        self.after_join_where = Some(predicate);
        self
    }

    pub fn with_group_by(mut self, fields: Vec<Field>) -> Self {
        self.group_by = fields;
        self
    }

    /// Fields the grouped stream produces: group keys plus computed outputs.
    pub fn output_fields(&self) -> Vec<Field> {
        let mut out = self.group_by.clone();
        out.extend(
            self.join
                .select_items
                .iter()
                .filter(|item| item.calculator.is_some())
                .map(|item| item.output.clone()),
        );
        out
    }

    fn build(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<JoinStrategy> {
        let mut builder = self.join.create_builder(ctx)?;
        for key in &self.group_by {
            if builder.field_name(&key.to_string()).is_none() {
                return Err(PlanError::InvalidStatement(format!(
                    "group by field {key} is unknown to both sides: {}",
                    self.join.content
                )));
            }
        }

        let mut post_join = vec![];
        if let Some(predicate) = &self.before_join_where {
            if ctx.config.push_down_pre_join_filters {
                post_join.extend(push_down_filters(&mut builder, predicate.clone()));
            } else {
                post_join.push(predicate.clone());
            }
        }
        post_join.extend(self.after_join_where.iter().cloned());
        let post_join = Expression::and_all(post_join).map(|predicate| {
            predicate.map_fields(&|f: &Field| {
                resolve_field(&f.to_string(), builder.left(), builder.right())
            })
        });

        let strategy = builder.build(pipeline, ctx, role)?;
        if pipeline.is_break {
            return Ok(strategy);
        }

        if let Some(predicate) = post_join {
            let label = ctx.names.create_name(&[&pipeline.name, "where"]);
            pipeline.add_stage(Stage::Filter(FilterStage { label, predicate }));
        }

        let aggregates = self.join.aggregates();
        if !self.group_by.is_empty() || !aggregates.is_empty() {
            let label = ctx.names.create_name(&[&pipeline.name, "group"]);
            pipeline.add_stage(Stage::GroupBy(GroupByStage {
                label,
                keys: self.group_by.clone(),
                aggregates,
                functions: self.join.function_calls(),
            }));
        } else {
            add_enrich_stage(pipeline, ctx, self.join.function_calls());
        }
        Ok(strategy)
    }
}

/// Grouped join filtered by HAVING.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereGroupByHavingStatement {
    inner: WhereGroupByStatement,
    having: Expression,
}

impl WhereGroupByHavingStatement {
    /// Rejects a HAVING clause that reads fields the grouped stream does not produce.
    pub fn new(inner: WhereGroupByStatement, having: Expression) -> Result<Self> {
        let produced = inner.output_fields();
        for field in having.referenced_fields() {
            if !produced.iter().any(|p| p.matches(field)) {
                return Err(PlanError::InvalidStatement(format!(
                    "having field {field} is not produced by group by or aggregation: {}",
                    inner.join.content
                )));
            }
        }
        Ok(Self { inner, having })
    }

    pub fn inner(&self) -> &WhereGroupByStatement {
        &self.inner
    }

    pub fn having(&self) -> &Expression {
        &self.having
    }

    fn build(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<JoinStrategy> {
        let strategy = self.inner.build(pipeline, ctx, role)?;
        if pipeline.is_break {
            return Ok(strategy);
        }
        let label = ctx.names.create_name(&[&pipeline.name, "having"]);
        pipeline.add_stage(Stage::Having(HavingStage {
            label,
            content: self.inner.join.content.clone(),
            predicate: self.having.clone(),
        }));
        Ok(strategy)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Join(JoinStatement),
    WhereGroupBy(WhereGroupByStatement),
    WhereGroupByHaving(WhereGroupByHavingStatement),
}

impl Statement {
    pub fn join(&self) -> &JoinStatement {
        match self {
            Statement::Join(j) => j,
            Statement::WhereGroupBy(s) => &s.join,
            Statement::WhereGroupByHaving(s) => &s.inner.join,
        }
    }

    /// Streams the compiled plan reads.
    pub fn dependent_tables(&self, catalog: &dyn TableCatalog) -> Result<BTreeSet<String>> {
        let config = PlannerConfig::default();
        let ctx = BuildContext::new(&config, catalog);
        Ok(self.join().create_builder(&ctx)?.dependent_tables())
    }

    fn build(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<JoinStrategy> {
        match self {
            Statement::Join(j) => j.build(pipeline, ctx, role),
            Statement::WhereGroupBy(s) => s.build(pipeline, ctx, role),
            Statement::WhereGroupByHaving(s) => s.build(pipeline, ctx, role),
        }
    }
}

/// Output of one compilation: the root fragment (which owns any join
/// sub-fragments) and the strategy chosen for the join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub root: Pipeline,
    pub strategy: JoinStrategy,
}

/// Compile a statement into a root fragment.
///
/// Any failure aborts the whole compilation; no partial plan is returned.
pub fn compile(
    statement: &Statement,
    catalog: &dyn TableCatalog,
    config: &PlannerConfig,
) -> Result<CompiledPlan> {
    compile_branch(statement, catalog, config, &BranchRole::Root)
}

/// Compile a statement as part of an enclosing join.
pub fn compile_branch(
    statement: &Statement,
    catalog: &dyn TableCatalog,
    config: &PlannerConfig,
    role: &BranchRole,
) -> Result<CompiledPlan> {
    config.validate()?;
    let mut ctx = BuildContext::new(config, catalog);
    let mut root = Pipeline::new(config.namespace.clone(), config.root_pipeline_name.clone());
    let strategy = statement.build(&mut root, &mut ctx, role)?;
    info!(
        namespace = %root.namespace,
        pipeline = %root.name,
        ?strategy,
        stages = root.stages.len(),
        configurables = root.configurables.len(),
        "compiled join statement"
    );
    Ok(CompiledPlan { root, strategy })
}

fn add_enrich_stage(
    pipeline: &mut Pipeline,
    ctx: &mut BuildContext<'_>,
    functions: Vec<FunctionCall>,
) {
    if functions.is_empty() {
        return;
    }
    let label = ctx.names.create_name(&[&pipeline.name, "enrich"]);
    pipeline.add_stage(Stage::Enrich(EnrichStage { label, functions }));
}

/// Attach each conjunct of `predicate` to the side it reads, returning the
/// conjuncts that must run after the join.
///
/// Pushed conjuncts are rewritten to the side's own column names. The right
/// side only takes filters under an inner join; filtering it before a left
/// join would turn non-matches into matches with missing right fields.
fn push_down_filters(builder: &mut JoinBuilder, predicate: Expression) -> Vec<Expression> {
    let join_type = builder.join_type();
    let mut remaining = vec![];
    for conjunct in predicate.conjuncts() {
        let side = side_of(&conjunct, builder.left(), builder.right());
        let pushed = match side {
            Some(Side::Left) => {
                let local = scoped(&conjunct, builder.left());
                builder.left_mut().push_filter(local).is_ok()
            }
            Some(Side::Right) if join_type == JoinType::Inner => {
                let local = scoped(&conjunct, builder.right());
                builder.right_mut().push_filter(local).is_ok()
            }
            _ => false,
        };
        if !pushed {
            warn!(predicate = %conjunct, "filter cannot be pushed below the join, applying after it");
            remaining.push(conjunct);
        }
    }
    remaining
}

enum Side {
    Left,
    Right,
}

fn side_of(predicate: &Expression, left: &TableBuilder, right: &TableBuilder) -> Option<Side> {
    let fields = predicate.referenced_fields();
    if fields.is_empty() {
        return None;
    }
    if resolves_all(&fields, left) {
        Some(Side::Left)
    } else if resolves_all(&fields, right) {
        Some(Side::Right)
    } else {
        None
    }
}

fn scoped(predicate: &Expression, scope: &dyn TableScope) -> Expression {
    predicate.map_fields(&|f: &Field| resolve_in_scope(&f.to_string(), scope))
}

fn resolves_all(fields: &[&Field], scope: &dyn TableScope) -> bool {
    fields
        .iter()
        .all(|f| resolve_in_scope(&f.to_string(), scope).is_some())
}
