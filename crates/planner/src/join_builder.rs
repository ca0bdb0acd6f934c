use std::collections::BTreeSet;

use flowplan_common::{PlanError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::{BranchRole, BuildContext, TableBuilder};
use crate::condition::JoinCondition;
use crate::field::{resolve_field, TableScope};
use crate::pipeline::{
    Configurable, JoinStage, Pipeline, RightJoinRefStage, Stage, WindowEmitStage,
};
use crate::window::{JoinType, WindowSpec};

/// How a join was compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinStrategy {
    /// Right side is a snapshot table: a lookup stage in the same fragment.
    DimensionJoin,
    /// Right side is a table function: a lateral stage in the same fragment.
    LateralJoin,
    /// Two streams: two sub-pipelines emitting into one shared window.
    StreamJoin,
}

/// Builder for `left JOIN right ON condition`.
///
/// Field names exposed by a join keep the left (main) side unqualified and the
/// right side alias-qualified.
#[derive(Debug, Clone)]
pub struct JoinBuilder {
    left: TableBuilder,
    right: TableBuilder,
    join_type: JoinType,
    condition: Option<JoinCondition>,
    right_pipeline_name: Option<String>,
}

impl JoinBuilder {
    pub fn new(
        left: TableBuilder,
        right: TableBuilder,
        join_type: JoinType,
        condition: Option<JoinCondition>,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            condition,
            right_pipeline_name: None,
        }
    }

    pub fn left(&self) -> &TableBuilder {
        &self.left
    }

    pub fn right(&self) -> &TableBuilder {
        &self.right
    }

    pub fn left_mut(&mut self) -> &mut TableBuilder {
        &mut self.left
    }

    pub fn right_mut(&mut self) -> &mut TableBuilder {
        &mut self.right
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn strategy(&self) -> JoinStrategy {
        match self.right {
            TableBuilder::Dimension(_) => JoinStrategy::DimensionJoin,
            TableBuilder::Lateral(_) => JoinStrategy::LateralJoin,
            TableBuilder::Select(_) | TableBuilder::Join(_) => JoinStrategy::StreamJoin,
        }
    }

    pub fn is_stream_join(&self) -> bool {
        self.strategy() == JoinStrategy::StreamJoin
    }

    /// Name of the left side's table, which names the joined stream.
    pub fn table_name(&self) -> &str {
        self.left.table_name()
    }

    /// Resolve a possibly alias-qualified reference against both sides.
    pub fn field_name(&self, raw: &str) -> Option<String> {
        resolve_field(raw, &self.left, &self.right).map(|f| f.to_string())
    }

    pub(crate) fn lookup(&self, alias: Option<&str>, column: &str) -> Option<String> {
        let raw = match alias {
            Some(alias) => format!("{alias}.{column}"),
            None => column.to_string(),
        };
        self.field_name(&raw)
    }

    pub(crate) fn accepts_alias(&self, alias: &str) -> bool {
        self.left.accepts_alias(alias) || self.right.accepts_alias(alias)
    }

    pub fn all_field_names(&self) -> BTreeSet<String> {
        self.all_field_names_with_alias(None)
    }

    /// Field names of the side(s) whose alias equals `alias` (all sides for `None`).
    pub fn all_field_names_with_alias(&self, alias: Option<&str>) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        if alias.is_none() || alias == self.left.as_name() {
            fields.extend(self.left.all_field_names());
        }
        if alias.is_none() || alias == self.right.as_name() {
            let prefix = self
                .right
                .as_name()
                .map(|a| format!("{a}."))
                .unwrap_or_default();
            fields.extend(self.right.all_field_names().into_iter().map(|f| {
                if f.contains('.') {
                    f
                } else {
                    format!("{prefix}{f}")
                }
            }));
        }
        fields
    }

    /// Fields of the left side when `alias` is its alias.
    ///
    /// Only the left side is inspected; a right-side alias yields `None`.
    pub fn fields_by_alias(&self, alias: &str) -> Option<BTreeSet<String>> {
        if self.left.as_name() != Some(alias) {
            return None;
        }
        Some(self.left.all_field_names())
    }

    pub fn dependent_tables(&self) -> BTreeSet<String> {
        let mut tables = self.left.dependent_tables();
        if self.is_stream_join() {
            tables.extend(self.right.dependent_tables());
        }
        tables
    }

    /// Compile the join into `pipeline`.
    ///
    /// Dimension and lateral joins extend `pipeline` in place. A stream join
    /// adds one [`JoinStage`] holding both sub-pipelines, or a
    /// [`RightJoinRefStage`] when `role` says this fragment already is the
    /// right branch.
    pub fn build(
        &mut self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<JoinStrategy> {
        let strategy = self.strategy();
        debug!(
            pipeline = %pipeline.name,
            left = %self.left.table_name(),
            right = %self.right.table_name(),
            ?strategy,
            "compiling join"
        );
        match strategy {
            JoinStrategy::StreamJoin => self.build_stream_join(pipeline, ctx, role)?,
            JoinStrategy::DimensionJoin => {
                let condition = self.required_condition()?.clone();
                self.check_condition_fields(&condition)?;
                self.left.build(pipeline, ctx, role)?;
                if let TableBuilder::Dimension(dim) = &self.right {
                    dim.build_dim_condition(pipeline, ctx, self.join_type, &condition)?;
                }
            }
            JoinStrategy::LateralJoin => {
                if let Some(condition) = &self.condition {
                    self.check_condition_fields(condition)?;
                }
                self.left.build(pipeline, ctx, role)?;
                self.right.build_lateral(pipeline, ctx, self.join_type)?;
            }
        }
        Ok(strategy)
    }

    fn build_stream_join(
        &mut self,
        pipeline: &mut Pipeline,
        ctx: &mut BuildContext<'_>,
        role: &BranchRole,
    ) -> Result<()> {
        if self.is_right_branch(role) {
            let pipeline_name = self.right_pipeline_name(&pipeline.name, ctx);
            let label = ctx.names.create_name(&[&pipeline_name, "ref"]);
            debug!(pipeline = %pipeline.name, right = %pipeline_name, "right branch of self join, referencing sub-pipeline");
            pipeline.add_stage(Stage::RightJoinRef(RightJoinRefStage {
                label,
                pipeline_name,
            }));
            pipeline.is_break = true;
            return Ok(());
        }

        let condition = self.required_condition()?.clone();
        let window_name = ctx.names.create_name(&[&pipeline.name, "join", "window"]);
        let window = WindowSpec::from_condition(
            pipeline.namespace.clone(),
            window_name,
            &condition,
            self.join_type,
            &self.left,
            &self.right,
        )?
        .freeze();
        debug!(
            window = %window.name(),
            left_keys = ?window.left_join_field_names(),
            right_keys = ?window.right_join_field_names(),
            residual = window.residual().is_some(),
            "created join window"
        );

        let left_name = ctx
            .names
            .create_name(&[&pipeline.name, "subpipeline", "join", "left"]);
        let mut left_pipeline = Pipeline::new(pipeline.namespace.clone(), left_name);
        self.left
            .build(&mut left_pipeline, ctx, &BranchRole::LeftBranch)?;
        let label = ctx.names.create_name(&[&left_pipeline.name, "emit"]);
        left_pipeline.add_stage(Stage::WindowEmit(WindowEmitStage {
            label,
            window: window.clone(),
        }));

        let right_name = self.right_pipeline_name(&pipeline.name, ctx);
        let mut right_pipeline = Pipeline::new(pipeline.namespace.clone(), right_name);
        let right_role = BranchRole::RightBranch(self.right.table_name().to_string());
        self.right.build(&mut right_pipeline, ctx, &right_role)?;
        let label = ctx.names.create_name(&[&right_pipeline.name, "emit"]);
        right_pipeline.add_stage(Stage::WindowEmit(WindowEmitStage {
            label,
            window: window.clone(),
        }));

        let same_table = self.left.table_name() == self.right.table_name();
        if same_table {
            left_pipeline.msg_source_name = Some(msg_source_name(&self.left));
            right_pipeline.msg_source_name = Some(msg_source_name(&self.right));
        }
        let right_dependent_table = if same_table {
            msg_source_name(&self.right)
        } else {
            self.right.table_name().to_string()
        };

        pipeline.add_configurable(Configurable::Window(window.clone()));
        pipeline.add_configurables(left_pipeline.configurables.iter().cloned());
        pipeline.add_configurables(right_pipeline.configurables.iter().cloned());
        if pipeline.dependency.is_none() {
            pipeline.dependency = left_pipeline.dependency.clone();
        }

        let label = ctx.names.create_name(&[&pipeline.name, "join"]);
        pipeline.add_stage(Stage::Join(Box::new(JoinStage {
            label,
            window,
            left: left_pipeline,
            right: right_pipeline,
            right_dependent_table,
        })));
        Ok(())
    }

    fn is_right_branch(&self, role: &BranchRole) -> bool {
        match role {
            BranchRole::RightBranch(table) => {
                self.is_stream_join() && self.right.table_name() == table
            }
            BranchRole::Root | BranchRole::LeftBranch => false,
        }
    }

    /// Name of the right sub-pipeline, created once per builder.
    fn right_pipeline_name(&mut self, parent: &str, ctx: &mut BuildContext<'_>) -> String {
        self.right_pipeline_name
            .get_or_insert_with(|| {
                ctx.names
                    .create_name(&[parent, "subpipeline", "join", "right"])
            })
            .clone()
    }

    fn required_condition(&self) -> Result<&JoinCondition> {
        self.condition.as_ref().ok_or_else(|| {
            PlanError::Planning(format!(
                "join of {} and {} requires an ON condition",
                self.left.table_name(),
                self.right.table_name()
            ))
        })
    }

    fn check_condition_fields(&self, condition: &JoinCondition) -> Result<()> {
        for field in condition.expression().referenced_fields() {
            let raw = field.to_string();
            if raw.is_empty() || self.field_name(&raw).is_none() {
                return Err(PlanError::Planning(format!(
                    "unknown field {raw} in join condition: {}",
                    condition.content()
                )));
            }
        }
        Ok(())
    }
}

/// Source discriminator of a side: `alias.table`, or the table name when the
/// side has no alias.
pub fn msg_source_name(builder: &TableBuilder) -> String {
    match builder.as_name() {
        Some(alias) => format!("{alias}.{}", builder.table_name()),
        None => builder.table_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use flowplan_common::PlannerConfig;

    use super::{msg_source_name, JoinBuilder, JoinStrategy};
    use crate::builder::{BranchRole, BuildContext, TableBuilder, TableKind, TableSource};
    use crate::condition::JoinCondition;
    use crate::pipeline::{Pipeline, Stage};
    use crate::window::JoinType;

    fn source(kind: TableKind, cols: &[&str]) -> TableSource {
        TableSource {
            kind,
            schema: Arc::new(Schema::new(
                cols.iter()
                    .map(|c| Field::new(*c, DataType::Utf8, true))
                    .collect::<Vec<_>>(),
            )),
        }
    }

    fn catalog() -> HashMap<String, TableSource> {
        let mut tables = HashMap::new();
        tables.insert("orders".to_string(), source(TableKind::Stream, &["id", "amt", "cid"]));
        tables.insert("customers".to_string(), source(TableKind::Stream, &["id", "name"]));
        tables.insert("dim_customers".to_string(), source(TableKind::Dimension, &["id", "name"]));
        tables.insert(
            "split_tags".to_string(),
            source(
                TableKind::Lateral {
                    function: "split".to_string(),
                    args: vec!["tags".to_string()],
                },
                &["tag"],
            ),
        );
        tables
    }

    fn join(
        ctx: &BuildContext<'_>,
        left: (&str, Option<&str>),
        right: (&str, Option<&str>),
        on: Option<&str>,
    ) -> JoinBuilder {
        JoinBuilder::new(
            ctx.table_builder(left.0, left.1).expect("left"),
            ctx.table_builder(right.0, right.1).expect("right"),
            JoinType::Inner,
            on.map(|c| JoinCondition::parse(c).expect("condition")),
        )
    }

    #[test]
    fn field_resolution_follows_alias_rules() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let ctx = BuildContext::new(&cfg, &cat);
        let j = join(&ctx, ("orders", None), ("customers", Some("c")), None);
        assert_eq!(j.field_name("id").as_deref(), Some("id"));
        assert_eq!(j.field_name("c.id").as_deref(), Some("c.id"));
        assert_eq!(j.field_name("name").as_deref(), Some("c.name"));
        assert_eq!(j.field_name("d.id"), None);
    }

    #[test]
    fn all_field_names_qualify_right_side() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let ctx = BuildContext::new(&cfg, &cat);
        let j = join(&ctx, ("orders", Some("o")), ("customers", Some("c")), None);
        let all = j.all_field_names();
        assert!(all.contains("amt"));
        assert!(all.contains("c.name"));
        assert!(!all.contains("name"));
        let right_only = j.all_field_names_with_alias(Some("c"));
        assert_eq!(right_only.len(), 2);
        assert!(j.fields_by_alias("o").expect("left alias").contains("cid"));
        assert!(j.fields_by_alias("c").is_none());
    }

    #[test]
    fn dimension_join_stays_in_one_fragment() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut j = join(
            &ctx,
            ("orders", None),
            ("dim_customers", Some("d")),
            Some("cid = d.id"),
        );
        let mut p = Pipeline::new("ns", "root");
        let strategy = j.build(&mut p, &mut ctx, &BranchRole::Root).expect("build");
        assert_eq!(strategy, JoinStrategy::DimensionJoin);
        let kinds: Vec<_> = p.stages.iter().map(Stage::kind_name).collect();
        assert_eq!(kinds, vec!["Source", "DimensionJoin"]);
        assert!(p.windows().is_empty());
        assert_eq!(j.dependent_tables().len(), 1);
    }

    #[test]
    fn dimension_join_rejects_unknown_condition_field() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut j = join(
            &ctx,
            ("orders", None),
            ("dim_customers", Some("d")),
            Some("cid = x.id"),
        );
        let mut p = Pipeline::new("ns", "root");
        let err = j
            .build(&mut p, &mut ctx, &BranchRole::Root)
            .expect_err("must fail");
        assert!(err.to_string().contains("cid = x.id"), "err={err}");
    }

    #[test]
    fn lateral_join_needs_no_condition() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut j = join(&ctx, ("orders", None), ("split_tags", Some("t")), None);
        let mut p = Pipeline::new("ns", "root");
        let strategy = j.build(&mut p, &mut ctx, &BranchRole::Root).expect("build");
        assert_eq!(strategy, JoinStrategy::LateralJoin);
        assert!(matches!(p.last_stage(), Some(Stage::LateralJoin(_))));
    }

    #[test]
    fn stream_join_without_condition_fails() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut j = join(&ctx, ("orders", None), ("customers", Some("c")), None);
        let mut p = Pipeline::new("ns", "root");
        let err = j
            .build(&mut p, &mut ctx, &BranchRole::Root)
            .expect_err("must fail");
        assert!(err.to_string().contains("requires an ON condition"), "err={err}");
    }

    #[test]
    fn right_branch_references_sub_pipeline() {
        let cfg = PlannerConfig::default();
        let cat = catalog();

        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut j = join(&ctx, ("orders", Some("l")), ("orders", Some("r")), Some("l.id = r.id"));
        let mut root = Pipeline::new("ns", "root");
        j.build(&mut root, &mut ctx, &BranchRole::Root).expect("root");
        let right_name = match root.last_stage() {
            Some(Stage::Join(js)) => js.right.name.clone(),
            other => panic!("expected join stage, got {other:?}"),
        };

        let mut ctx = BuildContext::new(&cfg, &cat);
        let mut j = join(&ctx, ("orders", Some("l")), ("orders", Some("r")), Some("l.id = r.id"));
        let mut branch = Pipeline::new("ns", "root");
        j.build(&mut branch, &mut ctx, &BranchRole::RightBranch("orders".to_string()))
            .expect("branch");
        assert!(branch.is_break);
        match branch.stages.as_slice() {
            [Stage::RightJoinRef(r)] => assert_eq!(r.pipeline_name, right_name),
            other => panic!("unexpected stages {other:?}"),
        }
        assert_eq!(msg_source_name(j.right()), "r.orders");
    }

    #[test]
    fn nested_joins_resolve_and_compile_as_sides() {
        let cfg = PlannerConfig::default();
        let cat = catalog();
        let mut ctx = BuildContext::new(&cfg, &cat);
        let orders_customers = join(
            &ctx,
            ("orders", Some("o")),
            ("customers", Some("c")),
            Some("o.cid = c.id"),
        );
        let customer_pairs = join(
            &ctx,
            ("customers", Some("k")),
            ("customers", Some("m")),
            Some("k.id = m.id"),
        );
        let mut j = JoinBuilder::new(
            TableBuilder::Join(Box::new(orders_customers)),
            TableBuilder::Join(Box::new(customer_pairs)),
            JoinType::Left,
            Some(JoinCondition::parse("c.name = k.name").expect("condition")),
        );

        assert_eq!(j.table_name(), "orders");
        assert_eq!(j.field_name("amt").as_deref(), Some("amt"));
        assert_eq!(j.field_name("c.name").as_deref(), Some("c.name"));
        assert_eq!(j.field_name("o.cid").as_deref(), Some("cid"));
        assert_eq!(j.field_name("m.name").as_deref(), Some("m.name"));
        assert_eq!(j.field_name("x.name"), None);
        let all = j.all_field_names();
        for field in ["amt", "cid", "c.id", "c.name", "m.id", "name"] {
            assert!(all.contains(field), "missing {field} in {all:?}");
        }
        assert_eq!(
            j.dependent_tables().into_iter().collect::<Vec<_>>(),
            vec!["customers", "orders"]
        );

        let mut root = Pipeline::new("ns", "root");
        let strategy = j.build(&mut root, &mut ctx, &BranchRole::Root).expect("build");
        assert_eq!(strategy, JoinStrategy::StreamJoin);
        assert_eq!(root.windows().len(), 2);
        assert_eq!(root.dependency.as_deref(), Some("orders"));

        let outer = match root.last_stage() {
            Some(Stage::Join(js)) => js,
            other => panic!("expected join stage, got {other:?}"),
        };
        assert_eq!(outer.window.left_join_field_names(), ["c.name".to_string()]);
        assert_eq!(outer.window.right_join_field_names(), ["name".to_string()]);

        let left_kinds: Vec<_> = outer.left.stages.iter().map(Stage::kind_name).collect();
        assert_eq!(left_kinds, vec!["Join", "WindowEmit"]);
        match &outer.left.stages[0] {
            Stage::Join(inner) => {
                assert_eq!(inner.window.left_join_field_names(), ["cid".to_string()]);
                assert_eq!(inner.window.right_join_field_names(), ["id".to_string()]);
                assert_eq!(inner.right_dependent_table, "customers");
            }
            other => panic!("expected nested join, got {other:?}"),
        }

        // the right side joins `customers` to itself while already being the
        // right branch reading `customers`, so it only references its right fragment
        assert!(outer.right.is_break);
        match outer.right.stages.as_slice() {
            [Stage::RightJoinRef(r), Stage::WindowEmit(_)] => assert_eq!(
                r.pipeline_name,
                format!("{}_subpipeline_join_right_1", outer.right.name)
            ),
            other => panic!("unexpected right stages {other:?}"),
        }
    }
}
