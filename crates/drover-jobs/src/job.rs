//! Job definitions and ledger records.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use drover_core::{FaultKind, JobId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Opaque checkpoint a capability writes while a job runs.
pub type ProgressCheckpoint = Map<String, Value>;

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker, or left running by a previous process.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with a fault. Can be resumed.
    Failed,
    /// Cancelled by an operator.
    Cancelled,
}

impl JobStatus {
    /// Every status.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Returns the snake_case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true for statuses the scheduler may hand out.
    pub const fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }

    /// Returns true if `next` is a legal successor of this status.
    pub const fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Queued | InProgress | Cancelled)
                | (InProgress, InProgress | Completed | Failed | Cancelled)
                | (Failed | Cancelled, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| JobError::InvalidSubmission(format!("Unknown job status: {s}")))
    }
}

/// A job as submitted by an operator. Priority may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Retrieval capability name.
    #[serde(alias = "retriever")]
    pub capability: String,

    /// Operation (endpoint) of the capability.
    #[serde(alias = "endpoint")]
    pub operation: String,

    /// Capability parameters.
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Scheduling priority, lower runs first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl JobSpec {
    /// Creates a spec without parameters.
    pub fn new(capability: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            operation: operation.into(),
            params: Map::new(),
            priority: None,
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Resolves the priority and produces the request stored in the ledger.
    pub fn into_request(self, default_priority: i64) -> JobRequest {
        JobRequest {
            capability: self.capability,
            operation: self.operation,
            params: self.params,
            priority: self.priority.unwrap_or(default_priority),
        }
    }
}

/// The semantic content of a job. Its hash is the job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(alias = "retriever")]
    pub capability: String,
    #[serde(alias = "endpoint")]
    pub operation: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub priority: i64,
}

impl JobRequest {
    /// Derives the content id of this request.
    pub fn job_id(&self) -> JobResult<JobId> {
        Ok(JobId::from_content(self)?)
    }
}

/// Summary stored when a job completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResultSummary {
    pub items_fetched: u64,
    pub external_call_count: u64,
    pub records_fetched: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<String>,
}

/// Last failure recorded for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FaultKind>,
}

impl JobFailure {
    /// Creates a failure with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    /// Captures an error, keeping its fault kind.
    pub fn from_error(err: &JobError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.fault_kind(),
        }
    }
}

/// A job as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub request_details: JobRequest,
    #[serde(default)]
    pub progress: ProgressCheckpoint,
    #[serde(default)]
    pub result: Option<JobResultSummary>,
    #[serde(default)]
    pub error: Option<JobFailure>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a queued record.
    pub fn new(id: JobId, request_details: JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            request_details,
            progress: ProgressCheckpoint::new(),
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            last_updated: now,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
        }
    }

    /// Scheduling priority.
    pub fn priority(&self) -> i64 {
        self.request_details.priority
    }

    /// Capability name.
    pub fn capability(&self) -> &str {
        &self.request_details.capability
    }

    /// Merges an update into the record, validating any status change.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> JobResult<()> {
        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return Err(JobError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.status,
                    to: next,
                });
            }
            match next {
                JobStatus::Completed => self.completed_at = Some(now),
                JobStatus::Failed => self.failed_at = Some(now),
                JobStatus::Cancelled => self.cancelled_at = Some(now),
                JobStatus::Queued | JobStatus::InProgress => {}
            }
            self.status = next;
        }

        if let Some(details) = update.request_details {
            self.request_details = details;
        }
        if let Some(progress) = update.progress {
            self.progress.extend(progress);
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if update.clear_error {
            self.error = None;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }

        self.last_updated = now;
        Ok(())
    }
}

/// Partial update merged into a [`JobRecord`].
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub request_details: Option<JobRequest>,
    pub progress: Option<ProgressCheckpoint>,
    pub result: Option<JobResultSummary>,
    pub error: Option<JobFailure>,
    pub clear_error: bool,
}

impl JobUpdate {
    /// An update that changes the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: JobRequest) -> Self {
        self.request_details = Some(details);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCheckpoint) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: JobResultSummary) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: JobFailure) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn clearing_error(mut self) -> Self {
        self.clear_error = true;
        self
    }
}
