//! Two-phase function registry: resolves planned function calls to runtime functions.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use flowplan_common::{PlanError, Properties, Record, Result};
use flowplan_planner::FunctionCall;
use serde_json::Value;

use crate::function::{JsonFieldFunction, TwoPhaseFunction, WindowBoundaryTimeFunction};

/// Builds a function instance for one planned call.
pub type FunctionFactory =
    Arc<dyn Fn(&FunctionCall) -> Result<Arc<dyn TwoPhaseFunction>> + Send + Sync>;

type FactoryMap = HashMap<String, FunctionFactory>;

fn registry() -> &'static RwLock<FactoryMap> {
    static REGISTRY: OnceLock<RwLock<FactoryMap>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register or replace a function factory.
///
/// Returns `true` when an existing factory with same name was replaced.
/// Registered factories take precedence over built-in functions.
pub fn register_function_factory(name: &str, factory: FunctionFactory) -> bool {
    registry()
        .write()
        .expect("function registry lock poisoned")
        .insert(name.to_ascii_lowercase(), factory)
        .is_some()
}

/// Deregister a function factory by name.
///
/// Returns `true` when an existing factory was removed.
pub fn deregister_function_factory(name: &str) -> bool {
    registry()
        .write()
        .expect("function registry lock poisoned")
        .remove(&name.to_ascii_lowercase())
        .is_some()
}

/// Lookup a registered function factory by name.
pub fn get_function_factory(name: &str) -> Option<FunctionFactory> {
    registry()
        .read()
        .expect("function registry lock poisoned")
        .get(&name.to_ascii_lowercase())
        .cloned()
}

/// Instantiate the function for a planned call.
pub fn function_for_call(call: &FunctionCall) -> Result<Arc<dyn TwoPhaseFunction>> {
    if let Some(factory) = get_function_factory(&call.function) {
        return factory(call);
    }
    builtin(call)
}

fn builtin(call: &FunctionCall) -> Result<Arc<dyn TwoPhaseFunction>> {
    let single_arg = || match call.args.as_slice() {
        [arg] => Ok(arg.as_str()),
        _ => Err(PlanError::InvalidArgument(format!(
            "{}() takes exactly one argument, got {}",
            call.function,
            call.args.len()
        ))),
    };
    match call.function.to_ascii_lowercase().as_str() {
        WindowBoundaryTimeFunction::NAME => Ok(Arc::new(WindowBoundaryTimeFunction::new(
            single_arg()?,
            call.output.clone(),
        )?)),
        JsonFieldFunction::NAME => Ok(Arc::new(JsonFieldFunction::new(
            single_arg()?,
            call.output.clone(),
        )?)),
        other => Err(PlanError::Planning(format!("unknown function: {other}"))),
    }
}

/// Resolve `call` and run its pre-aggregation pass.
pub fn invoke_apply(call: &FunctionCall, raw: &Value, record: &mut Record) -> Result<()> {
    function_for_call(call)?.apply(raw, record)
}

/// Resolve `call` and run its post-aggregation pass.
pub fn invoke_second_calcu(
    call: &FunctionCall,
    record: Option<&mut Record>,
    ctx: &Properties,
) -> Result<()> {
    function_for_call(call)?.second_calcu(record, ctx)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowplan_common::{PlanError, Properties, Record, Result};
    use flowplan_planner::FunctionCall;
    use serde_json::{json, Value};

    use super::{
        deregister_function_factory, function_for_call, get_function_factory, invoke_apply,
        invoke_second_calcu, register_function_factory,
    };
    use crate::function::TwoPhaseFunction;

    #[derive(Debug)]
    struct Constant {
        output: String,
    }

    impl TwoPhaseFunction for Constant {
        fn name(&self) -> &str {
            "constant_test"
        }

        fn output_name(&self) -> &str {
            &self.output
        }

        fn apply(&self, _raw: &Value, record: &mut Record) -> Result<()> {
            record.put(self.output.clone(), json!(42));
            Ok(())
        }

        fn second_calcu(&self, record: Option<&mut Record>, _ctx: &Properties) -> Result<()> {
            record
                .ok_or_else(|| PlanError::InvalidArgument("no record".to_string()))
                .map(|_| ())
        }
    }

    fn call(function: &str, args: &[&str], output: &str) -> FunctionCall {
        FunctionCall {
            function: function.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            output: output.to_string(),
        }
    }

    #[test]
    fn registered_factory_is_resolved_case_insensitively() {
        let replaced = register_function_factory(
            "Constant_Test",
            Arc::new(|c: &FunctionCall| -> Result<Arc<dyn TwoPhaseFunction>> {
                Ok(Arc::new(Constant {
                    output: c.output.clone(),
                }))
            }),
        );
        assert!(!replaced);
        assert!(get_function_factory("constant_test").is_some());

        let mut rec = Record::new();
        invoke_apply(&call("CONSTANT_TEST", &[], "k"), &json!({}), &mut rec).expect("apply");
        assert_eq!(rec.get("k"), Some(&json!(42)));

        assert!(deregister_function_factory("constant_test"));
        assert!(!deregister_function_factory("constant_test"));
        assert!(function_for_call(&call("constant_test", &[], "k")).is_err());
    }

    #[test]
    fn builtins_resolve_from_planned_calls() {
        let f = function_for_call(&call("window_boundary_time", &["window_start"], "ws"))
            .expect("builtin");
        assert_eq!(f.output_name(), "ws");

        let mut ctx = Properties::new();
        ctx.insert("window_start".to_string(), json!(1000));
        let mut rec = Record::new();
        invoke_second_calcu(
            &call("window_boundary_time", &["window_start"], "ws"),
            Some(&mut rec),
            &ctx,
        )
        .expect("second pass");
        assert_eq!(rec.get("ws"), Some(&json!(1000)));
    }

    #[test]
    fn bad_calls_are_rejected() {
        let err = function_for_call(&call("nope", &[], "x")).expect_err("unknown");
        assert!(err.to_string().contains("unknown function: nope"), "err={err}");
        let err = function_for_call(&call("json_field", &[], "x")).expect_err("arity");
        assert!(matches!(err, PlanError::InvalidArgument(_)), "err={err}");
    }
}
