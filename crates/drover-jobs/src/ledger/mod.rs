//! Durable job ledger.
//!
//! The ledger is the single source of truth for every job. All mutations run
//! under one async writer lock; each is applied to a copy of the document,
//! persisted, and only then made visible. A failed write leaves the in-memory
//! ledger exactly as it was.

mod store;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use store::{JsonFileStore, LedgerDocument, LedgerStore, MemoryStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::error::{JobError, JobResult};
use crate::job::{
    JobFailure, JobRecord, JobResultSummary, JobStatus, JobUpdate, ProgressCheckpoint,
};
use chrono::Utc;
use drover_core::JobId;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Persisted record of every job's status, checkpoint and outcome.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    state: Mutex<LedgerDocument>,
    claims: parking_lot::Mutex<HashSet<JobId>>,
}

impl Ledger {
    /// Opens the ledger from `store`.
    ///
    /// A missing or unreadable document yields an empty ledger.
    pub async fn open(store: Arc<dyn LedgerStore>) -> JobResult<Self> {
        let document = match store.load().await {
            Ok(Some(document)) => {
                info!(
                    store = %store.describe(),
                    jobs = document.jobs.len(),
                    "Ledger loaded"
                );
                document
            }
            Ok(None) => {
                info!(store = %store.describe(), "No ledger found, starting empty");
                LedgerDocument::default()
            }
            Err(JobError::Serialization(e)) => {
                warn!(
                    store = %store.describe(),
                    error = %e,
                    "Ledger document is corrupt, starting empty"
                );
                LedgerDocument::default()
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            store,
            state: Mutex::new(document),
            claims: parking_lot::Mutex::new(HashSet::new()),
        })
    }

    /// Persists the current document.
    pub async fn save(&self) -> JobResult<()> {
        let guard = self.state.lock().await;
        self.persist(&guard).await
    }

    /// Merges `update` into the job, creating it when unknown.
    ///
    /// Creating a job requires `update.request_details`.
    pub async fn upsert(&self, id: &JobId, update: JobUpdate) -> JobResult<JobRecord> {
        self.mutate(|doc| {
            let now = Utc::now();
            if let Some(record) = doc.jobs.get_mut(id) {
                record.apply(update, now)?;
                return Ok(record.clone());
            }

            let details = update
                .request_details
                .clone()
                .ok_or_else(|| JobError::NotFound(id.clone()))?;
            let mut record = JobRecord::new(id.clone(), details, now);
            record.apply(update, now)?;
            doc.jobs.insert(id.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.state.lock().await.jobs.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<JobRecord> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    /// Jobs whose status is in `statuses`. An empty filter returns every job.
    pub async fn by_status(&self, statuses: &[JobStatus]) -> Vec<JobRecord> {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .cloned()
            .collect()
    }

    /// Queued and in-progress jobs.
    pub async fn active(&self) -> Vec<JobRecord> {
        self.by_status(&[JobStatus::Queued, JobStatus::InProgress])
            .await
    }

    /// Cancels the given jobs, or every active job when `ids` is `None`.
    ///
    /// Completed and failed jobs are left untouched. Returns the ids that were
    /// actually cancelled.
    pub async fn cancel(&self, ids: Option<&[JobId]>) -> JobResult<Vec<JobId>> {
        let cancelled = self
            .mutate(|doc| {
                let now = Utc::now();
                let targets: Vec<JobId> = match ids {
                    Some(ids) => ids.to_vec(),
                    None => doc.jobs.keys().cloned().collect(),
                };

                let mut cancelled = Vec::new();
                for id in targets {
                    match doc.jobs.get_mut(&id) {
                        Some(record) if record.status.is_active() => {
                            record.apply(JobUpdate::status(JobStatus::Cancelled), now)?;
                            cancelled.push(id);
                        }
                        Some(record) => {
                            debug!(job_id = %id, status = %record.status, "Job not active, not cancelled");
                        }
                        None => warn!(job_id = %id, "Cannot cancel unknown job"),
                    }
                }
                Ok(cancelled)
            })
            .await?;

        info!(count = cancelled.len(), "Jobs cancelled");
        Ok(cancelled)
    }

    /// Marks an active, unclaimed job as in progress and claims it for this
    /// process. Returns `None` when the job cannot be claimed.
    pub async fn claim(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        let mut guard = self.state.lock().await;

        match guard.jobs.get(id) {
            Some(record) if record.status.is_active() => {}
            _ => return Ok(None),
        }
        if self.claims.lock().contains(id) {
            return Ok(None);
        }

        let mut draft = guard.clone();
        let now = Utc::now();
        let record = match draft.jobs.get_mut(id) {
            Some(record) => {
                record.apply(JobUpdate::status(JobStatus::InProgress), now)?;
                record.attempts += 1;
                record.clone()
            }
            None => return Ok(None),
        };

        self.commit(&mut guard, draft).await?;
        self.claims.lock().insert(id.clone());

        debug!(job_id = %id, attempts = record.attempts, "Job claimed");
        Ok(Some(record))
    }

    /// Drops this process's claim on a job.
    pub fn release(&self, id: &JobId) {
        self.claims.lock().remove(id);
    }

    /// Returns true if a worker in this process holds the job.
    pub fn is_claimed(&self, id: &JobId) -> bool {
        self.claims.lock().contains(id)
    }

    /// Writes a progress checkpoint.
    ///
    /// Fails with [`JobError::Cancelled`] once the job has been cancelled so
    /// the running capability can stop.
    pub async fn record_progress(&self, id: &JobId, progress: ProgressCheckpoint) -> JobResult<()> {
        self.mutate(|doc| {
            let record = doc
                .jobs
                .get_mut(id)
                .ok_or_else(|| JobError::NotFound(id.clone()))?;
            if record.status == JobStatus::Cancelled {
                return Err(JobError::Cancelled(id.clone()));
            }
            record.apply(JobUpdate::default().with_progress(progress), Utc::now())
        })
        .await
    }

    pub async fn complete(&self, id: &JobId, result: JobResultSummary) -> JobResult<JobRecord> {
        self.upsert(
            id,
            JobUpdate::status(JobStatus::Completed)
                .with_result(result)
                .clearing_error(),
        )
        .await
    }

    pub async fn fail(&self, id: &JobId, failure: JobFailure) -> JobResult<JobRecord> {
        self.upsert(id, JobUpdate::status(JobStatus::Failed).with_error(failure))
            .await
    }

    /// Puts a failed or cancelled job back in the queue, keeping its checkpoint.
    pub async fn requeue(&self, id: &JobId) -> JobResult<JobRecord> {
        if self.get(id).await.is_none() {
            return Err(JobError::NotFound(id.clone()));
        }
        self.upsert(id, JobUpdate::status(JobStatus::Queued).clearing_error())
            .await
    }

    async fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut LedgerDocument) -> JobResult<R>,
    ) -> JobResult<R> {
        let mut guard = self.state.lock().await;
        let mut draft = guard.clone();
        let out = apply(&mut draft)?;
        self.commit(&mut guard, draft).await?;
        Ok(out)
    }

    async fn commit(
        &self,
        guard: &mut MutexGuard<'_, LedgerDocument>,
        mut draft: LedgerDocument,
    ) -> JobResult<()> {
        draft.last_updated = Some(Utc::now());
        self.persist(&draft).await?;
        **guard = draft;
        Ok(())
    }

    async fn persist(&self, document: &LedgerDocument) -> JobResult<()> {
        self.store.save(document).await.map_err(|e| match e {
            JobError::Persistence(_) => e,
            other => JobError::Persistence(other.to_string()),
        })
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("store", &self.store.describe())
            .finish_non_exhaustive()
    }
}
