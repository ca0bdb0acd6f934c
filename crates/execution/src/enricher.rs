use std::collections::HashSet;
use std::sync::Arc;

use flowplan_common::{PlanError, Properties, Record, Result};
use flowplan_planner::{EnrichStage, FunctionCall, GroupByStage};
use serde_json::Value;
use tracing::debug;

use crate::function::TwoPhaseFunction;
use crate::registry::function_for_call;

/// Runs the field functions of one stage around aggregation.
///
/// For an ungrouped stage each row is its own result, so the runtime calls
/// both passes on the same record.
#[derive(Debug, Clone, Default)]
pub struct TwoPhaseEnricher {
    functions: Vec<Arc<dyn TwoPhaseFunction>>,
}

impl TwoPhaseEnricher {
    /// Resolve every function call of a grouping stage.
    ///
    /// Two calls writing the same output key are rejected.
    pub fn for_stage(stage: &GroupByStage) -> Result<Self> {
        Self::for_calls(&stage.label, &stage.functions)
    }

    /// Resolve every function call of an ungrouped stage.
    pub fn for_enrich_stage(stage: &EnrichStage) -> Result<Self> {
        Self::for_calls(&stage.label, &stage.functions)
    }

    fn for_calls(label: &str, calls: &[FunctionCall]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut functions = Vec::with_capacity(calls.len());
        for call in calls {
            if !seen.insert(call.output.as_str()) {
                return Err(PlanError::InvalidArgument(format!(
                    "output {} is written by more than one function in {label}",
                    call.output
                )));
            }
            functions.push(function_for_call(call)?);
        }
        debug!(stage = %label, functions = functions.len(), "resolved two-phase functions");
        Ok(Self { functions })
    }

    /// Record keys written by the resolved functions, in call order.
    pub fn output_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.output_name()).collect()
    }

    /// Whether the stage declared no functions.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Per-tuple pass, before the raw tuple is folded into a group.
    pub fn pre_aggregate(&self, raw: &Value, record: &mut Record) -> Result<()> {
        for f in &self.functions {
            f.apply(raw, record)?;
        }
        Ok(())
    }

    /// Per-result pass at window close; `ctx` carries window metadata.
    pub fn post_aggregate(&self, mut record: Option<&mut Record>, ctx: &Properties) -> Result<()> {
        for f in &self.functions {
            f.second_calcu(record.as_deref_mut(), ctx)?;
        }
        Ok(())
    }
}
