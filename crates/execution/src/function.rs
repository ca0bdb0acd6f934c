//! Two-phase field functions run around windowed aggregation.

use std::fmt::Debug;

use flowplan_common::{PlanError, Properties, Record, Result};
use serde_json::Value;

/// Runtime contract for a field function.
///
/// `apply` runs once per raw tuple before grouping; `second_calcu` runs once
/// per emitted (possibly aggregated) result with read-only window metadata.
/// Both write only under [`TwoPhaseFunction::output_name`].
pub trait TwoPhaseFunction: Send + Sync + Debug {
    /// Stable lowercase function name (`window_boundary_time`).
    fn name(&self) -> &str;

    /// Record key this function writes.
    fn output_name(&self) -> &str;

    /// Pre-aggregation pass over the raw tuple.
    fn apply(&self, raw: &Value, record: &mut Record) -> Result<()>;

    /// Post-aggregation pass. Fails when there is no result record to write to.
    fn second_calcu(&self, record: Option<&mut Record>, ctx: &Properties) -> Result<()>;
}

fn require_record<'a>(
    function: &dyn TwoPhaseFunction,
    record: Option<&'a mut Record>,
) -> Result<&'a mut Record> {
    record.ok_or_else(|| {
        PlanError::InvalidArgument(format!(
            "{} cannot write {} without a target record",
            function.name(),
            function.output_name()
        ))
    })
}

/// Window boundary accessor: copies a window property (`window_start` or
/// `window_end`) into the result once the window closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBoundaryTimeFunction {
    field_name: String,
    output: String,
}

impl WindowBoundaryTimeFunction {
    pub const NAME: &'static str = "window_boundary_time";

    pub fn new(field_name: impl Into<String>, output: impl Into<String>) -> Result<Self> {
        let field_name = field_name.into();
        if field_name != "window_start" && field_name != "window_end" {
            return Err(PlanError::InvalidArgument(format!(
                "{} expects window_start or window_end, got '{field_name}'",
                Self::NAME
            )));
        }
        Ok(Self {
            field_name,
            output: output.into(),
        })
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

impl TwoPhaseFunction for WindowBoundaryTimeFunction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn output_name(&self) -> &str {
        &self.output
    }

    fn apply(&self, _raw: &Value, _record: &mut Record) -> Result<()> {
        // boundaries exist only once the window closes
        Ok(())
    }

    fn second_calcu(&self, record: Option<&mut Record>, ctx: &Properties) -> Result<()> {
        let record = require_record(self, record)?;
        let value = ctx.get(&self.field_name).cloned().unwrap_or(Value::Null);
        record.put(self.output.clone(), value);
        Ok(())
    }
}

/// Extracts a nested member of the raw tuple by `/`-separated path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFieldFunction {
    path: Vec<String>,
    output: String,
}

impl JsonFieldFunction {
    pub const NAME: &'static str = "json_field";

    pub fn new(path: &str, output: impl Into<String>) -> Result<Self> {
        let path: Vec<String> = path
            .split('/')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if path.is_empty() {
            return Err(PlanError::InvalidArgument(format!(
                "{} requires a non-empty path",
                Self::NAME
            )));
        }
        Ok(Self {
            path,
            output: output.into(),
        })
    }

    fn extract<'a>(&self, raw: &'a Value) -> Option<&'a Value> {
        self.path.iter().try_fold(raw, |value, part| match value {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl TwoPhaseFunction for JsonFieldFunction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn output_name(&self) -> &str {
        &self.output
    }

    fn apply(&self, raw: &Value, record: &mut Record) -> Result<()> {
        let value = self.extract(raw).cloned().unwrap_or(Value::Null);
        record.put(self.output.clone(), value);
        Ok(())
    }

    fn second_calcu(&self, record: Option<&mut Record>, _ctx: &Properties) -> Result<()> {
        // value was computed before grouping; only the target must exist
        require_record(self, record).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use flowplan_common::{PlanError, Properties, Record};
    use serde_json::{json, Value};

    use super::{JsonFieldFunction, TwoPhaseFunction, WindowBoundaryTimeFunction};

    fn window_ctx() -> Properties {
        let mut ctx = Properties::new();
        ctx.insert("window_start".to_string(), json!("2024-01-01 00:00:00"));
        ctx.insert("window_end".to_string(), json!("2024-01-01 00:05:00"));
        ctx
    }

    #[test]
    fn window_boundary_is_a_no_op_before_aggregation() {
        let f = WindowBoundaryTimeFunction::new("window_start", "ws").expect("function");
        let mut rec = Record::new();
        f.apply(&json!({"a": 1}), &mut rec).expect("apply");
        assert!(rec.is_empty());
    }

    #[test]
    fn window_boundary_writes_context_value_after_aggregation() {
        let f = WindowBoundaryTimeFunction::new("window_end", "we").expect("function");
        let mut rec = Record::new();
        f.second_calcu(Some(&mut rec), &window_ctx()).expect("second pass");
        assert_eq!(rec.get("we"), Some(&json!("2024-01-01 00:05:00")));

        let mut rec = Record::new();
        f.second_calcu(Some(&mut rec), &Properties::new()).expect("second pass");
        assert_eq!(rec.get("we"), Some(&Value::Null));
    }

    #[test]
    fn second_pass_without_record_is_invalid_argument() {
        let f = WindowBoundaryTimeFunction::new("window_start", "ws").expect("function");
        let err = f.second_calcu(None, &window_ctx()).expect_err("must fail");
        assert!(matches!(err, PlanError::InvalidArgument(_)), "err={err}");

        let f = JsonFieldFunction::new("a/b", "ab").expect("function");
        assert!(matches!(
            f.second_calcu(None, &Properties::new()),
            Err(PlanError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_boundary_is_rejected() {
        assert!(WindowBoundaryTimeFunction::new("window_middle", "x").is_err());
    }

    #[test]
    fn json_field_follows_path() {
        let f = JsonFieldFunction::new("user/tags/1", "tag").expect("function");
        let mut rec = Record::new();
        f.apply(&json!({"user": {"tags": ["a", "b"]}}), &mut rec)
            .expect("apply");
        assert_eq!(rec.get("tag"), Some(&json!("b")));

        f.apply(&json!({"user": {}}), &mut rec).expect("apply");
        assert_eq!(rec.get("tag"), Some(&Value::Null));
        assert!(JsonFieldFunction::new("//", "x").is_err());
    }
}
