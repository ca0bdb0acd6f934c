use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

/// Settings for one statement compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Namespace stamped on every pipeline and window of the compiled plan.
    pub namespace: String,
    /// Name of the root pipeline; sub-pipeline and window names derive from it.
    pub root_pipeline_name: String,
    /// Move single-side conjuncts of a pre-join WHERE below the join.
    pub push_down_pre_join_filters: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            root_pipeline_name: "root".to_string(),
            push_down_pre_join_filters: true,
        }
    }
}

impl PlannerConfig {
    /// Reject configurations that would produce unnamed pipelines.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(PlanError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.root_pipeline_name.trim().is_empty() {
            return Err(PlanError::InvalidConfig(
                "root_pipeline_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
