#![deny(missing_docs)]

//! Runtime side of compiled plans: two-phase field functions.
//!
//! Architecture role:
//! - function contract invoked by the runtime before and after aggregation
//! - name-keyed registry resolving planned calls to function instances
//! - per-stage enricher driving both passes over a record
//!
//! Key modules:
//! - [`function`]
//! - [`registry`]
//! - [`enricher`]

/// Per-stage driver of both function passes.
pub mod enricher;
/// Two-phase function contract and built-in functions.
#[allow(missing_docs)]
pub mod function;
/// Function factory registry.
pub mod registry;

// Re-export only what you want at the crate root (no globs).
pub use enricher::TwoPhaseEnricher;
pub use function::{JsonFieldFunction, TwoPhaseFunction, WindowBoundaryTimeFunction};
pub use registry::{
    deregister_function_factory, function_for_call, get_function_factory, invoke_apply,
    invoke_second_calcu, register_function_factory, FunctionFactory,
};
