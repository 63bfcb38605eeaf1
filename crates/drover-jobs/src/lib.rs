//! Drover Jobs - Durable Request Orchestration
//!
//! Long-running retrieval jobs against a rate-limited upstream:
//! - A persisted ledger that records every status change before anyone sees it
//! - A priority scheduler rebuilt from the ledger on every start
//! - A router dispatching jobs to pluggable capabilities
//! - Fault-aware retries per capability
//! - Checkpointed progress so interrupted jobs resume where they stopped
//!
//! # Architecture
//!
//! ```text
//!   submissions
//!       │
//!       ▼
//!  ┌──────────────────┐   dedup / persist   ┌──────────────┐
//!  │  RequestManager  │ ──────────────────▶ │    Ledger    │◀─────┐
//!  └────────┬─────────┘                     └──────┬───────┘      │
//!           │ pop (claim)                          │ active jobs  │ checkpoints
//!           ▼                                      ▼              │
//!  ┌──────────────────┐                     ┌──────────────┐      │
//!  │     Workers      │ ◀────────────────── │  Scheduler   │      │
//!  └────────┬─────────┘                     └──────────────┘      │
//!           │ RetryPolicy::execute                                │
//!           ▼                                                     │
//!  ┌──────────────────┐        fetch        ┌──────────────┐      │
//!  │      Router      │ ──────────────────▶ │  Capability  │ ─────┘
//!  └──────────────────┘                     └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use drover_jobs::prelude::*;
//!
//! let ledger = Arc::new(Ledger::open(Arc::new(JsonFileStore::new(path))).await?);
//! let router = Arc::new(Router::new(ledger.clone()));
//! router.register_instance(Arc::new(my_capability));
//!
//! let manager = RequestManager::new(ledger, router, retry, settings, shutdown).await;
//! let summary = manager
//!     .process_jobs(vec![JobSpec::new("xtwitter", DAILY_OPERATION)
//!         .with_param("query", "#rust")
//!         .with_param("count", 100)])
//!     .await?;
//! ```

pub mod capability;
pub mod error;
pub mod job;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod router;
pub mod scheduler;

pub use capability::{
    parse_date_range, DailyWindowCapability, DailyWindowSettings, Fetch, JsonlSink, PayloadSink,
    DAILY_OPERATION,
};
pub use error::{JobError, JobResult};
pub use job::{
    JobFailure, JobRecord, JobRequest, JobResultSummary, JobSpec, JobStatus, JobUpdate,
    ProgressCheckpoint,
};
pub use ledger::{JsonFileStore, Ledger, LedgerDocument, LedgerStore, MemoryStore};
#[cfg(feature = "sqlite")]
pub use ledger::SqliteStore;
pub use metrics::{register_metrics, JobMetrics};
pub use orchestrator::{ProcessSummary, RequestManager, SubmitReport};
pub use router::{
    Capability, CapabilityContext, CapabilityFactory, CheckpointHandle, FetchOutcome, RouteOutcome,
    Router,
};
pub use scheduler::{ClaimedJob, QueuedEntry, Scheduler};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::job::{JobSpec, JobStatus};
    pub use crate::ledger::{JsonFileStore, Ledger, LedgerStore};
    pub use crate::orchestrator::RequestManager;
    pub use crate::router::{Capability, CapabilityContext, FetchOutcome, Router};
    pub use crate::{JobError, JobResult, DAILY_OPERATION};
    pub use drover_core::{Fault, FaultKind, JobId};
    pub use drover_resilience::RetryPolicy;
    pub use std::sync::Arc;
}
