//! Error types for process construction and execution.
//!
//! Errors split into two families with very different handling:
//!
//! - **Construction errors** (`Configuration`) are fatal and reported before
//!   any execution - a missing handler registration or an edge referencing an
//!   unknown step can never be recovered at runtime.
//! - **Execution errors** surface as `OnError` *events* inside the running
//!   process and flow through the graph like any other event; the variants
//!   here exist so executors can build accurate error records and so fatal
//!   dispatch failures can abort a superstep.
//!
//! Cancellation is not an error: a cancelled run resolves to
//! [`RunOutcome::Cancelled`](crate::orchestrator::RunOutcome).

use thiserror::Error;

/// Convenience result type using [`ProcessError`].
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors raised by the orchestration engine.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process definition is invalid.
    ///
    /// Raised at orchestrator construction: unknown handler registrations,
    /// edges targeting steps that do not exist, duplicate step ids, or edge
    /// groups naming undeclared sources.
    #[error("invalid process definition: {0}")]
    Configuration(String),

    /// A message named an entry point the destination step does not expose.
    #[error("step '{step}' has no function '{function}'")]
    UnknownFunction { step: String, function: String },

    /// General execution failure not attributable to a single step.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A payload or state value could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = ProcessError::UnknownFunction {
            step: "Echo".into(),
            function: "Missing".into(),
        };
        assert_eq!(err.to_string(), "step 'Echo' has no function 'Missing'");

        let err = ProcessError::Configuration("duplicate step id 'Echo'".into());
        assert_eq!(
            err.to_string(),
            "invalid process definition: duplicate step id 'Echo'"
        );
    }
}
