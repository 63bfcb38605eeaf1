//! Day-windowed feed retrieval.
//!
//! A query is split into one upstream call per calendar day, newest day
//! first. After every day the next day to fetch is checkpointed, so a job
//! that fails or is interrupted resumes at the day it stopped on.

use super::PayloadSink;
use crate::error::{JobError, JobResult};
use crate::job::ProgressCheckpoint;
use crate::router::{Capability, CapabilityContext, FetchOutcome};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use drover_config::XTwitterConfig;
use drover_core::Fault;
use drover_resilience::sleep_or_cancel;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Operation served by [`DailyWindowCapability`].
pub const DAILY_OPERATION: &str = "data/twitter/tweets/recent";

const CURSOR_KEY: &str = "last_processed_time";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Transport used to query the upstream for one window.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Returns the items matching `query`, at most `count` of them.
    async fn fetch(&self, operation: &str, query: &str, count: u64) -> Result<Vec<Value>, Fault>;
}

/// Tunables for [`DailyWindowCapability`].
#[derive(Debug, Clone)]
pub struct DailyWindowSettings {
    /// Look-back when the query has no `since:` bound.
    pub default_timeframe_months: u32,
    /// Pause between consecutive days.
    pub pacing: Duration,
}

impl Default for DailyWindowSettings {
    fn default() -> Self {
        Self::from_config(&XTwitterConfig::default())
    }
}

impl DailyWindowSettings {
    pub fn from_config(config: &XTwitterConfig) -> Self {
        Self {
            default_timeframe_months: config.default_timeframe_months,
            pacing: config.pacing(),
        }
    }
}

/// Retrieves a query one day at a time, checkpointing after each day.
pub struct DailyWindowCapability {
    name: String,
    fetcher: Arc<dyn Fetch>,
    sink: Arc<dyn PayloadSink>,
    settings: DailyWindowSettings,
    today: Option<NaiveDate>,
}

impl DailyWindowCapability {
    pub fn new(
        name: impl Into<String>,
        fetcher: Arc<dyn Fetch>,
        sink: Arc<dyn PayloadSink>,
        settings: DailyWindowSettings,
    ) -> Self {
        Self {
            name: name.into(),
            fetcher,
            sink,
            settings,
            today: None,
        }
    }

    /// Pins the date used when the query has no `until:` bound.
    #[must_use]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Splits `since:YYYY-MM-DD` and `until:YYYY-MM-DD` tokens out of a query.
///
/// Returns `(since, until, remaining query)`.
pub fn parse_date_range(query: &str) -> Result<(Option<NaiveDate>, Option<NaiveDate>, String), Fault> {
    let mut since = None;
    let mut until = None;
    let mut rest = Vec::new();

    for token in query.split_whitespace() {
        if let Some(value) = token.strip_prefix("since:") {
            since = Some(parse_day(value)?);
        } else if let Some(value) = token.strip_prefix("until:") {
            until = Some(parse_day(value)?);
        } else {
            rest.push(token);
        }
    }

    Ok((since, until, rest.join(" ")))
}

fn parse_day(value: &str) -> Result<NaiveDate, Fault> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| Fault::configuration(format!("Invalid date '{value}': {e}")))
}

#[async_trait]
impl Capability for DailyWindowCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn operations(&self) -> Vec<String> {
        vec![DAILY_OPERATION.to_string()]
    }

    fn required_params(&self, _operation: &str) -> Vec<String> {
        vec!["query".to_string(), "count".to_string()]
    }

    async fn fetch(&self, ctx: CapabilityContext) -> JobResult<FetchOutcome> {
        let query = ctx.param_str("query")?;
        let count = ctx.param_u64("count")?;
        if query.trim().is_empty() || count == 0 {
            return Err(Fault::configuration("Query and count must be non-empty").into());
        }

        let (since, until, cleaned) = parse_date_range(query)?;
        let end = until.unwrap_or_else(|| self.today());
        let lookback = Days::new(30 * u64::from(self.settings.default_timeframe_months));
        let start = since.unwrap_or_else(|| end.checked_sub_days(lookback).unwrap_or(NaiveDate::MIN));

        let mut current = ctx
            .progress
            .get(CURSOR_KEY)
            .and_then(Value::as_str)
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
            .unwrap_or(end)
            .min(end);

        info!(
            job_id = %ctx.job_id,
            query = %cleaned,
            start = %start,
            end = %end,
            resume_from = %current,
            "Starting daily retrieval"
        );

        let mut outcome = FetchOutcome::default();

        while current >= start {
            if ctx.shutdown.is_cancelled() {
                return Err(JobError::Interrupted);
            }

            let Some(next_day) = current.succ_opt() else {
                break;
            };
            let window = format!(
                "{cleaned} since:{} until:{}",
                current.format(DATE_FORMAT),
                next_day.format(DATE_FORMAT)
            );

            let items = self.fetcher.fetch(&ctx.operation, &window, count).await?;
            outcome.external_call_count += 1;

            if !items.is_empty() {
                self.sink
                    .write(&self.name, &cleaned, &items)
                    .await
                    .map_err(|e| Fault::data_processing(format!("Failed to save items: {e}")))?;
            }
            let fetched = items.len() as u64;
            outcome.items_fetched += fetched;
            outcome.records_fetched += fetched;

            debug!(job_id = %ctx.job_id, day = %current, items = fetched, "Day retrieved");

            let Some(previous) = current.pred_opt() else {
                break;
            };
            current = previous;

            let mut progress = ProgressCheckpoint::new();
            progress.insert(CURSOR_KEY.to_string(), json!(current.format(DATE_FORMAT).to_string()));
            progress.insert("items_count".to_string(), json!(fetched));
            ctx.checkpoint.save(progress).await?;

            if current >= start && !sleep_or_cancel(self.settings.pacing, &ctx.shutdown).await {
                return Err(JobError::Interrupted);
            }
        }

        info!(
            job_id = %ctx.job_id,
            records = outcome.records_fetched,
            calls = outcome.external_call_count,
            "Daily retrieval finished"
        );
        Ok(outcome)
    }
}
