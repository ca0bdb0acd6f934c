use thiserror::Error;

/// Canonical error taxonomy shared by the flowplan crates.
///
/// Classification guidance:
/// - [`PlanError::InvalidStatement`]: a statement rejected while it is being constructed
/// - [`PlanError::Planning`]: name/shape failures discovered while compiling a statement
/// - [`PlanError::Execution`]: predicate evaluation failures against a concrete record
/// - [`PlanError::InvalidArgument`]: caller contract violations when invoking functions
/// - [`PlanError::InvalidConfig`]: planner configuration that cannot be used
/// - [`PlanError::Unsupported`]: syntactically valid SQL outside the supported subset
#[derive(Debug, Error)]
pub enum PlanError {
    /// Construction-time validation failure.
    ///
    /// Examples:
    /// - HAVING references a field that GROUP BY / aggregation does not produce
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// Compilation failures. The whole statement fails, no partial plan is returned.
    ///
    /// Examples:
    /// - unresolvable field in a join condition
    /// - `or` at the top of a join condition
    /// - no usable equi-join key in a stream-stream join
    #[error("planning error: {0}")]
    Planning(String),

    /// Evaluation failures against one record.
    ///
    /// Never propagated past the predicate or row it concerns; callers turn it
    /// into "row excluded".
    #[error("execution error: {0}")]
    Execution(String),

    /// A function was invoked in a way its contract forbids.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid or inconsistent planner configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Valid request for a feature/shape not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard flowplan result alias.
pub type Result<T> = std::result::Result<T, PlanError>;
