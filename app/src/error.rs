// ==============================================================================
// error.rs - Pipeline Error Types
// ==============================================================================
// Description: Error taxonomy shared by every orchestration component
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the orchestration core
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Orchestration errors
///
/// Transient fragment incompleteness and deadline exhaustion are not errors:
/// they are handled by re-dispatch. Everything here either aborts the current
/// invocation or ends up as a `failed` Job Record.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Blob store error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    DuplicateRun(String),

    #[error("Invalid stage name: {0}")]
    InvalidStage(String),

    #[error("Invalid lineage token: {0}")]
    InvalidLineage(String),

    #[error("No handler registered for stage: {0}")]
    UnknownStage(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task {0} has already re-dispatched itself in this invocation")]
    AlreadyCheckpointed(String),

    #[error("Cannot re-dispatch {0}: task was not started from the message bus")]
    NotResumable(String),

    #[error("No progress in {stage}: {remaining} of {original} work units remain")]
    NoProgress {
        stage: String,
        original: usize,
        remaining: usize,
    },

    #[error("Barrier timed out after waiting {waited:?} for upstream tasks")]
    BarrierTimeout { waited: Duration },

    #[error("Fragments under {prefix} did not stabilise: expected {expected}, found {found} after {attempts} attempts")]
    MergeStalled {
        prefix: String,
        expected: usize,
        found: usize,
        attempts: u32,
    },

    #[error("Run {0} has already failed")]
    RunAborted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True for errors that stop an invocation without failing the run
    pub fn is_abort(&self) -> bool {
        matches!(self, PipelineError::RunAborted(_))
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(e: redis::RedisError) -> Self {
        PipelineError::Bus(e.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::JobStore(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_progress_message() {
        let err = PipelineError::NoProgress {
            stage: "split".to_string(),
            original: 4,
            remaining: 4,
        };
        assert_eq!(err.to_string(), "No progress in split: 4 of 4 work units remain");
    }

    #[test]
    fn test_abort_classification() {
        assert!(PipelineError::RunAborted("run-1".to_string()).is_abort());
        assert!(!PipelineError::Bus("down".to_string()).is_abort());
    }
}
