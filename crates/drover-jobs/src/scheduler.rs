//! Priority scheduler over the ledger's active jobs.

use crate::error::JobResult;
use crate::job::{JobFailure, JobRecord, JobResultSummary};
use crate::ledger::Ledger;
use drover_core::JobId;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A scheduled entry. Lower priority runs first; equal priorities run in
/// enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueuedEntry {
    pub priority: i64,
    pub sequence: u64,
    pub id: JobId,
}

/// A job handed out by [`Scheduler::pop`], already claimed in the ledger.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub record: JobRecord,
}

#[derive(Default)]
struct SchedulerState {
    heap: BinaryHeap<Reverse<QueuedEntry>>,
    members: HashSet<JobId>,
    next_sequence: u64,
}

impl SchedulerState {
    fn push(&mut self, id: JobId, priority: i64) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(QueuedEntry {
            priority,
            sequence,
            id,
        }));
        true
    }

    fn pop(&mut self) -> Option<QueuedEntry> {
        let Reverse(entry) = self.heap.pop()?;
        self.members.remove(&entry.id);
        Some(entry)
    }
}

/// Priority queue of job ids backed by the ledger.
///
/// The scheduler holds no authoritative status. Every pop re-validates the
/// head against the ledger through [`Ledger::claim`].
pub struct Scheduler {
    ledger: Arc<Ledger>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    /// Seeds a scheduler with every queued or in-progress job.
    pub async fn from_ledger(ledger: Arc<Ledger>) -> Self {
        let scheduler = Self {
            ledger,
            state: Mutex::new(SchedulerState::default()),
        };
        scheduler.refresh().await;
        scheduler
    }

    /// Adds a job. Only queued or in-progress jobs are accepted, and a job
    /// already scheduled is not added twice.
    pub async fn add(&self, id: &JobId, priority: i64) -> bool {
        match self.ledger.get(id).await {
            Some(record) if record.status.is_active() => {}
            Some(record) => {
                debug!(job_id = %id, status = %record.status, "Not scheduling inactive job");
                return false;
            }
            None => {
                debug!(job_id = %id, "Not scheduling unknown job");
                return false;
            }
        }
        self.state.lock().push(id.clone(), priority)
    }

    /// Removes the head and claims it. Stale entries are skipped.
    pub async fn pop(&self) -> JobResult<Option<ClaimedJob>> {
        loop {
            let Some(entry) = self.state.lock().pop() else {
                return Ok(None);
            };

            match self.ledger.claim(&entry.id).await {
                Ok(Some(record)) => {
                    return Ok(Some(ClaimedJob {
                        id: entry.id,
                        record,
                    }));
                }
                Ok(None) => {
                    debug!(job_id = %entry.id, "Skipping stale scheduler entry");
                }
                Err(e) => {
                    let mut state = self.state.lock();
                    if state.members.insert(entry.id.clone()) {
                        state.heap.push(Reverse(entry));
                    }
                    return Err(e);
                }
            }
        }
    }

    /// The head entry, without removing it.
    pub fn peek(&self) -> Option<QueuedEntry> {
        self.state.lock().heap.peek().map(|Reverse(entry)| entry.clone())
    }

    pub async fn complete(&self, id: &JobId, result: JobResultSummary) -> JobResult<JobRecord> {
        self.ledger.complete(id, result).await
    }

    pub async fn fail(&self, id: &JobId, failure: JobFailure) -> JobResult<JobRecord> {
        self.ledger.fail(id, failure).await
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Schedules every active ledger job not already present, oldest first.
    /// Returns the number added.
    pub async fn refresh(&self) -> usize {
        let mut active = self.ledger.active().await;
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut state = self.state.lock();
        let added = active
            .into_iter()
            .filter(|record| state.push(record.id.clone(), record.priority()))
            .count();

        debug!(added, scheduled = state.heap.len(), "Scheduler refreshed");
        added
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("len", &self.len()).finish()
    }
}
