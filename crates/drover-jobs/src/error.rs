//! Job error types.

use crate::job::JobStatus;
use drover_core::{DroverError, Fault, FaultKind, JobId};
use drover_resilience::Retryable;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Classified retrieval fault.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// The job was cancelled while it was running.
    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    /// Shutdown was requested while the job was running.
    #[error("Interrupted by shutdown")]
    Interrupted,

    /// The ledger could not be persisted.
    #[error("Ledger persistence failed: {0}")]
    Persistence(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The requested status change is not allowed.
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// A submission could not be understood.
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error.
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns the fault kind if this error is a classified fault.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            JobError::Fault(fault) => Some(fault.kind),
            _ => None,
        }
    }
}

impl Retryable for JobError {
    fn fault_kind(&self) -> Option<FaultKind> {
        JobError::fault_kind(self)
    }

    fn interrupted() -> Self {
        JobError::Interrupted
    }
}

impl From<DroverError> for JobError {
    fn from(err: DroverError) -> Self {
        match err {
            DroverError::Fault(fault) => JobError::Fault(fault),
            DroverError::Interrupted => JobError::Interrupted,
            DroverError::Io(e) => JobError::Io(e),
            DroverError::Serialization(e) => JobError::Serialization(e),
            other => JobError::Internal(other.to_string()),
        }
    }
}
