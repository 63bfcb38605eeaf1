//! Dispatch from (capability, operation) to a retrieval capability.

use crate::error::{JobError, JobResult};
use crate::job::{JobRecord, ProgressCheckpoint};
use crate::ledger::Ledger;
use async_trait::async_trait;
use drover_core::{Fault, JobId};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counts reported by a capability for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub items_fetched: u64,
    pub external_call_count: u64,
    pub records_fetched: u64,
}

/// Outcome of routing one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub items_fetched: u64,
    pub external_call_count: u64,
    pub records_fetched: u64,
    pub elapsed: Duration,
}

/// Writes progress checkpoints for one job.
#[derive(Clone)]
pub struct CheckpointHandle {
    ledger: Arc<Ledger>,
    job_id: JobId,
}

impl CheckpointHandle {
    pub fn new(ledger: Arc<Ledger>, job_id: JobId) -> Self {
        Self { ledger, job_id }
    }

    /// Persists `progress`. Returns [`JobError::Cancelled`] once the job has
    /// been cancelled.
    pub async fn save(&self, progress: ProgressCheckpoint) -> JobResult<()> {
        self.ledger.record_progress(&self.job_id, progress).await
    }
}

/// Everything a capability receives for one run.
#[derive(Clone)]
pub struct CapabilityContext {
    pub job_id: JobId,
    pub operation: String,
    pub params: Map<String, Value>,
    pub progress: ProgressCheckpoint,
    pub checkpoint: CheckpointHandle,
    pub shutdown: CancellationToken,
}

impl CapabilityContext {
    /// A string parameter.
    pub fn param_str(&self, name: &str) -> JobResult<&str> {
        self.params
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Fault::configuration(format!("Parameter '{name}' must be a string")).into())
    }

    /// A non-negative integer parameter. Numeric strings are accepted.
    pub fn param_u64(&self, name: &str) -> JobResult<u64> {
        let value = self.params.get(name);
        value
            .and_then(Value::as_u64)
            .or_else(|| value.and_then(Value::as_str).and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| {
                Fault::configuration(format!("Parameter '{name}' must be a non-negative integer"))
                    .into()
            })
    }
}

/// A pluggable retrieval capability.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Supported operations.
    fn operations(&self) -> Vec<String>;

    /// Parameters `operation` cannot run without.
    fn required_params(&self, operation: &str) -> Vec<String>;

    /// Runs the job, checkpointing through `ctx.checkpoint`.
    async fn fetch(&self, ctx: CapabilityContext) -> JobResult<FetchOutcome>;
}

/// Builds a capability instance on first use.
pub type CapabilityFactory = Arc<dyn Fn() -> JobResult<Arc<dyn Capability>> + Send + Sync>;

/// Capability registry and dispatcher.
pub struct Router {
    ledger: Arc<Ledger>,
    factories: RwLock<HashMap<String, CapabilityFactory>>,
    instances: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl Router {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a factory under `name`. The instance is built lazily.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> JobResult<Arc<dyn Capability>> + Send + Sync + 'static,
    {
        let name = name.into();
        info!(capability = %name, "Registered capability");
        self.instances.write().remove(&name);
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// Registers a ready-made instance under its own name.
    pub fn register_instance(&self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        self.register(name, move || Ok(capability.clone()));
    }

    /// Registered capability names.
    pub fn capabilities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the cached instance for `name`, building it on first use.
    pub fn capability(&self, name: &str) -> JobResult<Arc<dyn Capability>> {
        if let Some(instance) = self.instances.read().get(name) {
            return Ok(instance.clone());
        }

        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::configuration(format!("Unknown capability: {name}")))?;

        let mut instances = self.instances.write();
        if let Some(instance) = instances.get(name) {
            return Ok(instance.clone());
        }
        let instance = factory()?;
        debug!(capability = %name, "Capability instantiated");
        instances.insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    /// Validates the job against its capability and runs it.
    ///
    /// The latest checkpoint is read from the ledger so a retried run resumes
    /// where the previous attempt stopped.
    pub async fn route(&self, job: &JobRecord, shutdown: &CancellationToken) -> JobResult<RouteOutcome> {
        let details = &job.request_details;
        let capability = self.capability(&details.capability)?;

        if !capability.operations().iter().any(|op| op == &details.operation) {
            return Err(Fault::configuration(format!(
                "Capability {} does not support operation {}",
                details.capability, details.operation
            ))
            .into());
        }

        let missing: Vec<String> = capability
            .required_params(&details.operation)
            .into_iter()
            .filter(|p| !details.params.contains_key(p))
            .collect();
        if !missing.is_empty() {
            return Err(Fault::configuration(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            ))
            .into());
        }

        let progress = self
            .ledger
            .get(&job.id)
            .await
            .map(|record| record.progress)
            .unwrap_or_else(|| job.progress.clone());

        let ctx = CapabilityContext {
            job_id: job.id.clone(),
            operation: details.operation.clone(),
            params: details.params.clone(),
            progress,
            checkpoint: CheckpointHandle::new(self.ledger.clone(), job.id.clone()),
            shutdown: shutdown.clone(),
        };

        debug!(
            job_id = %job.id,
            capability = %details.capability,
            operation = %details.operation,
            "Routing job"
        );

        let started = Instant::now();
        let outcome = capability.fetch(ctx).await.map_err(|e| match e {
            JobError::Fault(fault) => JobError::Fault(
                fault
                    .with_context(format!(
                        "capability {} operation {}",
                        details.capability, details.operation
                    ))
                    .with_context(format!("job {}", job.id.short())),
            ),
            other => other,
        })?;

        Ok(RouteOutcome {
            items_fetched: outcome.items_fetched,
            external_call_count: outcome.external_call_count,
            records_fetched: outcome.records_fetched,
            elapsed: started.elapsed(),
        })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}
