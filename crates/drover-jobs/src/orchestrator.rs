//! Request orchestration.
//!
//! The [`RequestManager`] merges submissions into the ledger, drains the
//! scheduler with a fixed number of workers, runs each job through the
//! router under the retry policy, and records the outcome.

use crate::error::{JobError, JobResult};
use crate::job::{JobFailure, JobRecord, JobResultSummary, JobSpec, JobStatus, JobUpdate};
use crate::ledger::Ledger;
use crate::metrics::JobMetrics;
use crate::router::Router;
use crate::scheduler::{ClaimedJob, Scheduler};
use drover_config::OrchestratorConfig;
use drover_core::JobId;
use drover_resilience::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts produced by one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub submitted: usize,
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub interrupted: usize,
}

impl ProcessSummary {
    fn merge(&mut self, other: ProcessSummary) {
        self.submitted += other.submitted;
        self.skipped += other.skipped;
        self.completed += other.completed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.interrupted += other.interrupted;
    }
}

/// Result of merging submissions into the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// New jobs and re-queued failed or cancelled jobs.
    pub submitted: Vec<JobId>,
    /// Jobs already queued, running or completed.
    pub skipped: Vec<JobId>,
}

enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubmissionFile {
    List(Vec<JobSpec>),
    Wrapped { requests: Vec<JobSpec> },
}

/// Coordinates the ledger, scheduler, router and retry policy.
#[derive(Clone)]
pub struct RequestManager {
    ledger: Arc<Ledger>,
    scheduler: Arc<Scheduler>,
    router: Arc<Router>,
    retry: Arc<RetryPolicy>,
    settings: OrchestratorConfig,
    shutdown: CancellationToken,
}

impl RequestManager {
    /// Creates a manager and seeds its scheduler from the ledger.
    pub async fn new(
        ledger: Arc<Ledger>,
        router: Arc<Router>,
        retry: RetryPolicy,
        settings: OrchestratorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::from_ledger(ledger.clone()).await);
        Self {
            ledger,
            scheduler,
            router,
            retry: Arc::new(retry),
            settings,
            shutdown,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Reads a JSON list of submissions from `path`.
    ///
    /// A `{"requests": [...]}` wrapper is accepted too.
    pub async fn load_submissions(path: impl AsRef<Path>) -> JobResult<Vec<JobSpec>> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let file: SubmissionFile = serde_json::from_str(&contents).map_err(|e| {
            JobError::InvalidSubmission(format!("{}: {e}", path.display()))
        })?;
        let specs = match file {
            SubmissionFile::List(specs) | SubmissionFile::Wrapped { requests: specs } => specs,
        };
        info!(path = %path.display(), count = specs.len(), "Loaded submissions");
        Ok(specs)
    }

    /// Merges submissions into the ledger and schedules them.
    ///
    /// Unknown jobs are inserted as queued, failed or cancelled jobs are
    /// re-queued with their checkpoint, and anything else is left alone.
    pub async fn submit(&self, specs: Vec<JobSpec>) -> JobResult<SubmitReport> {
        let mut report = SubmitReport::default();

        for spec in specs {
            let request = spec.into_request(self.settings.default_priority);
            let id = request.job_id()?;
            let capability = request.capability.clone();
            let priority = request.priority;

            match self.ledger.get(&id).await {
                None => {
                    self.ledger
                        .upsert(&id, JobUpdate::status(JobStatus::Queued).with_details(request))
                        .await?;
                    info!(job_id = %id, capability = %capability, priority, "Job submitted");
                }
                Some(record) if matches!(record.status, JobStatus::Failed | JobStatus::Cancelled) => {
                    self.ledger.requeue(&id).await?;
                    info!(job_id = %id, previous = %record.status, "Job re-queued");
                }
                Some(record) => {
                    debug!(job_id = %id, status = %record.status, "Job already known, skipping");
                    report.skipped.push(id);
                    continue;
                }
            }

            JobMetrics::job_submitted(&capability);
            self.scheduler.add(&id, priority).await;
            report.submitted.push(id);
        }

        Ok(report)
    }

    /// Submits `new_jobs`, then processes everything scheduled.
    pub async fn process_jobs(&self, new_jobs: Vec<JobSpec>) -> JobResult<ProcessSummary> {
        let report = self.submit(new_jobs).await?;
        self.scheduler.refresh().await;

        let mut summary = self.run_workers().await?;
        summary.submitted = report.submitted.len();
        summary.skipped = report.skipped.len();

        info!(
            submitted = summary.submitted,
            skipped = summary.skipped,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            interrupted = summary.interrupted,
            "Processing finished"
        );
        Ok(summary)
    }

    /// Re-queues failed jobs and schedules every queued or in-progress job.
    ///
    /// Returns the number of jobs added to the scheduler.
    pub async fn resume_incomplete(&self) -> JobResult<usize> {
        for record in self.ledger.by_status(&[JobStatus::Failed]).await {
            self.ledger.requeue(&record.id).await?;
            debug!(job_id = %record.id, "Failed job re-queued for resume");
        }

        let added = self.scheduler.refresh().await;
        info!(added, scheduled = self.scheduler.len(), "Resumed incomplete jobs");
        Ok(added)
    }

    /// Jobs with one of `statuses`, or every job when empty.
    pub async fn list(&self, statuses: &[JobStatus]) -> Vec<JobRecord> {
        let mut jobs = self.ledger.by_status(statuses).await;
        jobs.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        jobs
    }

    pub async fn status(&self, id: &JobId) -> Option<JobRecord> {
        self.ledger.get(id).await
    }

    /// Cancels one job. Returns false if it was not active.
    pub async fn cancel(&self, id: &JobId) -> JobResult<bool> {
        let cancelled = self.ledger.cancel(Some(std::slice::from_ref(id))).await?;
        Ok(!cancelled.is_empty())
    }

    /// Cancels the listed jobs, or every active job when `ids` is empty.
    pub async fn clear(&self, ids: &[JobId]) -> JobResult<Vec<JobId>> {
        if ids.is_empty() {
            self.ledger.cancel(None).await
        } else {
            self.ledger.cancel(Some(ids)).await
        }
    }

    /// Drains the scheduler with the configured number of workers.
    pub async fn run_workers(&self) -> JobResult<ProcessSummary> {
        let concurrency = self.settings.concurrency.max(1);
        JobMetrics::update_scheduled(self.scheduler.len());
        info!(concurrency, scheduled = self.scheduler.len(), "Starting workers");

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            let manager = self.clone();
            workers.spawn(async move { manager.worker_loop(worker_id).await });
        }

        let mut summary = ProcessSummary::default();
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(tally)) => summary.merge(tally),
                Ok(Err(e)) => {
                    error!(error = %e, "Worker stopped with error");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    first_error.get_or_insert(JobError::Internal(e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn worker_loop(self, worker_id: usize) -> JobResult<ProcessSummary> {
        let mut tally = ProcessSummary::default();

        loop {
            if self.shutdown.is_cancelled() {
                info!(worker_id, "Shutdown requested, worker stopping");
                break;
            }

            let Some(job) = self.scheduler.pop().await? else {
                debug!(worker_id, "Scheduler empty, worker stopping");
                break;
            };

            match self.process_one(worker_id, job).await? {
                JobOutcome::Completed => tally.completed += 1,
                JobOutcome::Failed => tally.failed += 1,
                JobOutcome::Cancelled => tally.cancelled += 1,
                JobOutcome::Interrupted => tally.interrupted += 1,
            }
            JobMetrics::update_scheduled(self.scheduler.len());
        }

        Ok(tally)
    }

    /// Runs one claimed job to an outcome. Errors only when the outcome
    /// cannot be written to the ledger.
    async fn process_one(&self, worker_id: usize, job: ClaimedJob) -> JobResult<JobOutcome> {
        let ClaimedJob { id, record } = job;
        let capability = record.capability().to_string();
        let started = Instant::now();

        info!(
            worker_id,
            job_id = %id,
            capability = %capability,
            attempts = record.attempts,
            "Processing job"
        );

        let result = self
            .retry
            .execute(&capability, &self.shutdown, || {
                self.router.route(&record, &self.shutdown)
            })
            .await;

        let outcome = match result {
            Ok(route) => {
                let summary = JobResultSummary {
                    items_fetched: route.items_fetched,
                    external_call_count: route.external_call_count,
                    records_fetched: route.records_fetched,
                    last_processed_time: self.last_processed_time(&id).await,
                };
                match self.scheduler.complete(&id, summary).await {
                    Ok(_) => {
                        info!(
                            job_id = %id,
                            records = route.records_fetched,
                            calls = route.external_call_count,
                            elapsed_secs = route.elapsed.as_secs_f64(),
                            "Job completed"
                        );
                        JobMetrics::job_completed(&capability, started.elapsed());
                        Ok(JobOutcome::Completed)
                    }
                    Err(JobError::InvalidTransition {
                        from: JobStatus::Cancelled,
                        ..
                    }) => {
                        info!(job_id = %id, "Job was cancelled while running");
                        JobMetrics::job_cancelled(&capability);
                        Ok(JobOutcome::Cancelled)
                    }
                    Err(e) => {
                        error!(job_id = %id, error = %e, "Failed to mark job as complete");
                        Err(e)
                    }
                }
            }
            Err(JobError::Cancelled(_)) => {
                info!(job_id = %id, "Job was cancelled while running");
                JobMetrics::job_cancelled(&capability);
                Ok(JobOutcome::Cancelled)
            }
            Err(JobError::Interrupted) => {
                warn!(job_id = %id, "Job interrupted by shutdown, left in progress");
                JobMetrics::job_interrupted(&capability);
                Ok(JobOutcome::Interrupted)
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Job failed");
                let kind = e.fault_kind().map_or("other", |k| k.as_str());
                JobMetrics::job_failed(&capability, kind, started.elapsed());
                match self.scheduler.fail(&id, JobFailure::from_error(&e)).await {
                    Ok(_) => Ok(JobOutcome::Failed),
                    Err(JobError::InvalidTransition {
                        from: JobStatus::Cancelled,
                        ..
                    }) => Ok(JobOutcome::Cancelled),
                    Err(e) => {
                        error!(job_id = %id, error = %e, "Failed to mark job as failed");
                        Err(e)
                    }
                }
            }
        };

        self.ledger.release(&id);
        outcome
    }

    async fn last_processed_time(&self, id: &JobId) -> Option<String> {
        self.ledger.get(id).await.and_then(|record| {
            record
                .progress
                .get("last_processed_time")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("ledger", &self.ledger)
            .field("scheduler", &self.scheduler)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
