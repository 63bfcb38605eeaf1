//! Shared fixtures for the drover-jobs integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use drover_config::{OrchestratorConfig, RetryConfig};
use drover_core::{Fault, FaultKind, JobId};
use drover_jobs::{
    Capability, CapabilityContext, CheckpointHandle, FetchOutcome, Fetch, JobRecord, JobResult,
    JobSpec, JobStatus, JobUpdate, Ledger, LedgerDocument, MemoryStore, PayloadSink,
    ProgressCheckpoint, RequestManager, Router,
};
use drover_resilience::RetryPolicy;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const FAKE: &str = "fake";
pub const FAKE_OP: &str = "fetch";

pub async fn memory_ledger() -> (Arc<MemoryStore>, Arc<Ledger>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::open(store.clone()).await.unwrap());
    (store, ledger)
}

pub async fn ledger_with(document: LedgerDocument) -> (Arc<MemoryStore>, Arc<Ledger>) {
    let store = Arc::new(MemoryStore::with_document(document));
    let ledger = Arc::new(Ledger::open(store.clone()).await.unwrap());
    (store, ledger)
}

pub fn spec(name: &str) -> JobSpec {
    JobSpec::new(FAKE, FAKE_OP).with_param("name", name)
}

pub fn spec_with_priority(name: &str, priority: i64) -> JobSpec {
    spec(name).with_priority(priority)
}

/// Inserts a queued job and returns its record.
pub async fn insert(ledger: &Ledger, spec: JobSpec) -> JobRecord {
    let request = spec.into_request(100);
    let id = request.job_id().unwrap();
    ledger
        .upsert(&id, JobUpdate::status(JobStatus::Queued).with_details(request))
        .await
        .unwrap()
}

/// Retry configuration with one-second base waits and no success pacing.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_wait_secs: 1.0,
        backoff_factor: 2.0,
        max_wait_secs: 10.0,
        success_wait_secs: 0.0,
        ..Default::default()
    }
}

pub fn retry_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default().with_config(FAKE, fast_retry(max_retries))
}

pub fn settings(concurrency: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        concurrency,
        ..Default::default()
    }
}

pub async fn manager(
    ledger: Arc<Ledger>,
    capability: Arc<dyn Capability>,
    retry: RetryPolicy,
    concurrency: usize,
    shutdown: CancellationToken,
) -> RequestManager {
    let router = Arc::new(Router::new(ledger.clone()));
    router.register_instance(capability);
    RequestManager::new(ledger, router, retry, settings(concurrency), shutdown).await
}

pub fn context(ledger: Arc<Ledger>, record: &JobRecord, shutdown: CancellationToken) -> CapabilityContext {
    CapabilityContext {
        job_id: record.id.clone(),
        operation: record.request_details.operation.clone(),
        params: record.request_details.params.clone(),
        progress: record.progress.clone(),
        checkpoint: CheckpointHandle::new(ledger, record.id.clone()),
        shutdown,
    }
}

/// One scripted reaction of [`ScriptedCapability`].
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(u64),
    Fail(Fault),
    CheckpointThenFail(&'static str, Fault),
    CheckpointThenSucceed(&'static str, u64),
}

/// Capability that replays a script and records what it saw.
#[derive(Default)]
pub struct ScriptedCapability {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    calls_by_job: Mutex<HashMap<JobId, usize>>,
    seen_progress: Mutex<Vec<ProgressCheckpoint>>,
}

impl ScriptedCapability {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn always_succeeds() -> Arc<Self> {
        Self::new([])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, id: &JobId) -> usize {
        self.calls_by_job.lock().get(id).copied().unwrap_or(0)
    }

    pub fn calls_by_job(&self) -> HashMap<JobId, usize> {
        self.calls_by_job.lock().clone()
    }

    pub fn seen_progress(&self) -> Vec<ProgressCheckpoint> {
        self.seen_progress.lock().clone()
    }
}

fn cursor(value: &str) -> ProgressCheckpoint {
    let mut progress = ProgressCheckpoint::new();
    progress.insert("cursor".to_string(), json!(value));
    progress
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        FAKE
    }

    fn operations(&self) -> Vec<String> {
        vec![FAKE_OP.to_string()]
    }

    fn required_params(&self, _operation: &str) -> Vec<String> {
        vec!["name".to_string()]
    }

    async fn fetch(&self, ctx: CapabilityContext) -> JobResult<FetchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_job.lock().entry(ctx.job_id.clone()).or_default() += 1;
        self.seen_progress.lock().push(ctx.progress.clone());

        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed(1));
        match step {
            Step::Succeed(records) => Ok(outcome(records)),
            Step::Fail(fault) => Err(fault.into()),
            Step::CheckpointThenFail(value, fault) => {
                ctx.checkpoint.save(cursor(value)).await?;
                Err(fault.into())
            }
            Step::CheckpointThenSucceed(value, records) => {
                ctx.checkpoint.save(cursor(value)).await?;
                Ok(outcome(records))
            }
        }
    }
}

fn outcome(records: u64) -> FetchOutcome {
    FetchOutcome {
        items_fetched: records,
        external_call_count: 1,
        records_fetched: records,
    }
}

/// Upstream double for the daily-window capability.
#[derive(Default)]
pub struct FakeFetch {
    queries: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<Fault>>>,
    items_per_call: usize,
}

impl FakeFetch {
    pub fn new(items_per_call: usize) -> Arc<Self> {
        Arc::new(Self {
            items_per_call,
            ..Self::default()
        })
    }

    /// Makes the next fetch whose query contains `needle` fail with `kind`.
    pub fn fail_once(&self, needle: &str, kind: FaultKind) {
        self.failures
            .lock()
            .entry(needle.to_string())
            .or_default()
            .push_back(Fault::new(kind, format!("scripted failure for {needle}")));
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn fetch(&self, _operation: &str, query: &str, _count: u64) -> Result<Vec<Value>, Fault> {
        self.queries.lock().push(query.to_string());

        let scripted = {
            let mut failures = self.failures.lock();
            failures
                .iter_mut()
                .find(|(needle, queue)| query.contains(needle.as_str()) && !queue.is_empty())
                .and_then(|(_, queue)| queue.pop_front())
        };
        if let Some(fault) = scripted {
            return Err(fault);
        }

        Ok((0..self.items_per_call)
            .map(|i| json!({"query": query, "n": i}))
            .collect())
    }
}

/// Sink that keeps items in memory and can be made to fail.
#[derive(Default)]
pub struct MemorySink {
    items: Mutex<Vec<Value>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[async_trait]
impl PayloadSink for MemorySink {
    async fn write(&self, _capability: &str, _query: &str, items: &[Value]) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
        }
        self.items.lock().extend_from_slice(items);
        Ok(())
    }
}

pub const NO_PACING: Duration = Duration::ZERO;
