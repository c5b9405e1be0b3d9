//! Workflow engine error types.

use std::time::Duration;

use thiserror::Error;

use super::execution::ExecutionStatus;
use crate::ai::AgentError;
use crate::integrations::DocumentError;

/// Result type for engine operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Template is malformed (no steps, duplicate ids, rejected step types).
    #[error("Invalid template '{template_id}': {reason}")]
    InvalidTemplate { template_id: String, reason: String },

    /// Template id is not registered in the catalog.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// No execution with this id in memory or in the store.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Operation is not valid for the execution's current status.
    #[error("Cannot {action} execution {execution_id} while it is {status}")]
    InvalidTransition { execution_id: String, action: &'static str, status: ExecutionStatus },

    /// Execution is gated on a human-input step; only confirmation releases it.
    #[error("Execution {0} is waiting for human input")]
    AwaitingHumanInput(String),

    /// Execution store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors produced while executing a single step.
///
/// Every variant turns the step (and its execution) `failed`.
#[derive(Debug, Error)]
pub enum StepError {
    /// Agent gateway returned an error.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Step executor did not finish within the configured bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Step executor panicked.
    #[error("executor panicked: {0}")]
    Panicked(String),

    /// Deliverable could not be rendered or stored.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Executor-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Execution store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend refused or is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = WorkflowError::InvalidTransition {
            execution_id: "exec-1".to_string(),
            action: "resume",
            status: ExecutionStatus::Completed,
        };
        assert_eq!(err.to_string(), "Cannot resume execution exec-1 while it is completed");
    }

    #[test]
    fn test_step_error_wraps_agent_error() {
        let err: StepError = AgentError::NoResponse.into();
        assert!(err.to_string().starts_with("agent error"));
    }
}
