use std::sync::Arc;

use flowplan_common::Record;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::condition::JoinCondition;
use crate::expression::Expression;
use crate::field::Field;
use crate::window::{JoinType, Window};

/// One plan fragment: an ordered stage list handed to the runtime.
///
/// Contract:
/// - `dependency` names the upstream stream the fragment reads;
/// - `msg_source_name` is set only on the two fragments of a self-join and
///   tells the runtime which alias a tuple arrived under;
/// - `is_break` marks a fragment that stops after a reference stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub namespace: String,
    pub name: String,
    pub stages: Vec<Stage>,
    /// Side objects the runtime must instantiate (join windows and filters).
    pub configurables: Vec<Configurable>,
    pub msg_source_name: Option<String>,
    pub dependency: Option<String>,
    pub is_break: bool,
}

impl Pipeline {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            stages: vec![],
            configurables: vec![],
            msg_source_name: None,
            dependency: None,
            is_break: false,
        }
    }

    pub fn add_stage(&mut self, stage: Stage) {
        if let Some(configurable) = stage.configurable() {
            self.configurables.push(configurable);
        }
        self.stages.push(stage);
    }

    pub fn add_configurable(&mut self, configurable: Configurable) {
        self.configurables.push(configurable);
    }

    pub fn add_configurables(&mut self, configurables: impl IntoIterator<Item = Configurable>) {
        self.configurables.extend(configurables);
    }

    pub fn last_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    /// Windows registered on this fragment, in registration order.
    pub fn windows(&self) -> Vec<&Arc<Window>> {
        self.configurables
            .iter()
            .filter_map(|c| match c {
                Configurable::Window(w) => Some(w),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    /// Read a stream table.
    Source(SourceStage),
    /// Row filter.
    Filter(FilterStage),
    /// Lookup against a dimension table.
    DimensionJoin(DimensionJoinStage),
    /// Expand rows through a table function.
    LateralJoin(LateralJoinStage),
    /// Emit into a shared join window; terminates a join sub-pipeline.
    WindowEmit(WindowEmitStage),
    /// Stream-stream join over two sub-pipelines.
    Join(Box<JoinStage>),
    /// Reference to an already compiled right sub-pipeline.
    RightJoinRef(RightJoinRefStage),
    /// Group rows and run aggregates.
    GroupBy(GroupByStage),
    /// Run field functions over ungrouped rows.
    Enrich(EnrichStage),
    /// Filter grouped results.
    Having(HavingStage),
}

impl Stage {
    pub fn label(&self) -> &str {
        match self {
            Stage::Source(s) => &s.label,
            Stage::Filter(s) => &s.label,
            Stage::DimensionJoin(s) => &s.label,
            Stage::LateralJoin(s) => &s.label,
            Stage::WindowEmit(s) => &s.label,
            Stage::Join(s) => &s.label,
            Stage::RightJoinRef(s) => &s.label,
            Stage::GroupBy(s) => &s.label,
            Stage::Enrich(s) => &s.label,
            Stage::Having(s) => &s.label,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Stage::Source(_) => "Source",
            Stage::Filter(_) => "Filter",
            Stage::DimensionJoin(_) => "DimensionJoin",
            Stage::LateralJoin(_) => "LateralJoin",
            Stage::WindowEmit(_) => "WindowEmit",
            Stage::Join(_) => "Join",
            Stage::RightJoinRef(_) => "RightJoinRef",
            Stage::GroupBy(_) => "GroupBy",
            Stage::Enrich(_) => "Enrich",
            Stage::Having(_) => "Having",
        }
    }

    fn configurable(&self) -> Option<Configurable> {
        match self {
            Stage::Filter(f) => Some(Configurable::Filter(f.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStage {
    pub label: String,
    pub table: String,
    pub as_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStage {
    pub label: String,
    pub predicate: Expression,
}

impl FilterStage {
    pub fn accepts(&self, record: &Record) -> bool {
        self.predicate.is_true(record)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionJoinStage {
    pub label: String,
    pub table: String,
    pub as_name: Option<String>,
    pub join_type: JoinType,
    pub condition: JoinCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateralJoinStage {
    pub label: String,
    pub function: String,
    pub args: Vec<String>,
    pub as_name: Option<String>,
    pub fields: Vec<String>,
    pub join_type: JoinType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEmitStage {
    pub label: String,
    pub window: Arc<Window>,
}

/// Join step of the parent fragment.
///
/// `right_dependent_table` is the key the runtime wires the right stream
/// with: the right table name, or its source discriminator for a self-join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStage {
    pub label: String,
    pub window: Arc<Window>,
    pub left: Pipeline,
    pub right: Pipeline,
    pub right_dependent_table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightJoinRefStage {
    pub label: String,
    pub pipeline_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggExpr {
    Count(Field),
    Sum(Field),
    Min(Field),
    Max(Field),
    Avg(Field),
}

/// A two-phase field function to run around aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name as registered with the runtime (lowercase).
    pub function: String,
    pub args: Vec<String>,
    /// Record key the function writes.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupByStage {
    pub label: String,
    pub keys: Vec<Field>,
    pub aggregates: Vec<(AggExpr, String)>,
    pub functions: Vec<FunctionCall>,
}

/// Field functions of a statement without grouping. Each row is both the raw
/// tuple and the result, so both passes run per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichStage {
    pub label: String,
    pub functions: Vec<FunctionCall>,
}

/// HAVING filter over grouped results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HavingStage {
    pub label: String,
    /// Statement text, for diagnostics.
    pub content: String,
    pub predicate: Expression,
}

impl HavingStage {
    /// Evaluation errors exclude the row; they are logged and never propagated.
    pub fn accepts(&self, record: &Record) -> bool {
        match self.predicate.evaluate(record) {
            Ok(keep) => keep,
            Err(e) => {
                info!(sql = %self.content, value = ?record, error = %e, "having filter error");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Configurable {
    Window(Arc<Window>),
    Filter(FilterStage),
}

impl Configurable {
    pub fn name(&self) -> &str {
        match self {
            Configurable::Window(w) => w.name(),
            Configurable::Filter(f) => &f.label,
        }
    }
}
