//! Runtime error types for the opsflow workflow engine.
//!
//! All fallible operations return `OpsflowResult<T>`. The human-interaction
//! suspension is deliberately NOT a variant here: it travels as
//! [`crate::interaction::Suspension`] on a separate channel so that no error
//! handler can absorb it.

use thiserror::Error;

/// The unified error type for opsflow.
#[derive(Debug, Error)]
pub enum OpsflowError {
    /// A reasoning oracle raised instead of returning a judgment.
    #[error("oracle '{oracle}' failed: {reason}")]
    Oracle { oracle: String, reason: String },

    /// An oracle returned output that failed verification.
    #[error("malformed result from '{oracle}': {reason}")]
    MalformedResult { oracle: String, reason: String },

    /// A stage was asked to run without the slots it depends on.
    #[error("stage '{stage}' is missing its precondition: {reason}")]
    PreconditionMissing { stage: String, reason: String },

    /// The engine hit its per-run transition ceiling.
    ///
    /// Fatal: the run is aborted instead of looping.
    #[error("transition ceiling of {limit} exceeded at node '{node}'")]
    StepLimitExceeded { limit: u64, node: String },

    /// `resume` was called on an instance that is not waiting for input.
    #[error("instance '{instance_id}' is not suspended")]
    NotSuspended { instance_id: String },

    /// `resume` named a request other than the one outstanding.
    #[error("instance '{instance_id}' is waiting on request {expected}, not {received}")]
    ResumeMismatch {
        instance_id: String,
        expected: String,
        received: String,
    },

    /// No checkpoint exists for the instance.
    #[error("no checkpoint found for instance '{instance_id}'")]
    InstanceNotFound { instance_id: String },

    /// The checkpoint store could not read or write a snapshot.
    #[error("checkpoint operation failed: {reason}")]
    CheckpointFailed { reason: String },

    /// The audit writer could not persist a transition record.
    ///
    /// Fatal: a transition that cannot be audited does not happen.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// A configuration document is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The engine reached a node or state combination it cannot handle.
    #[error("state machine error: {reason}")]
    StateMachineError { reason: String },

    /// A JSON Schema document could not be applied.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },
}

impl OpsflowError {
    /// Shorthand for an oracle failure.
    pub fn oracle(oracle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Oracle {
            oracle: oracle.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the opsflow crates.
pub type OpsflowResult<T> = Result<T, OpsflowError>;
