//! Job processing metrics.
//!
//! Only names and descriptions live here; installing an exporter is left to
//! the binary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the orchestration engine.
pub mod names {
    /// Total jobs submitted (new or re-queued).
    pub const JOBS_SUBMITTED_TOTAL: &str = "drover_jobs_submitted_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "drover_jobs_completed_total";
    /// Total jobs failed.
    pub const JOBS_FAILED_TOTAL: &str = "drover_jobs_failed_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "drover_jobs_cancelled_total";
    /// Total jobs interrupted by shutdown.
    pub const JOBS_INTERRUPTED_TOTAL: &str = "drover_jobs_interrupted_total";
    /// Total retried attempts, emitted by the retry executor.
    pub const RETRIES_TOTAL: &str = drover_resilience::RETRIES_TOTAL;

    /// Jobs currently scheduled.
    pub const JOBS_SCHEDULED: &str = "drover_jobs_scheduled";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "drover_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total number of jobs submitted");
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of jobs cancelled");
    describe_counter!(
        names::JOBS_INTERRUPTED_TOTAL,
        "Total number of jobs interrupted by shutdown"
    );
    describe_counter!(names::RETRIES_TOTAL, "Total number of retried attempts");

    describe_gauge!(names::JOBS_SCHEDULED, "Current number of scheduled jobs");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_submitted(capability: &str) {
        counter!(names::JOBS_SUBMITTED_TOTAL, "capability" => capability.to_string()).increment(1);
    }

    pub fn job_completed(capability: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "capability" => capability.to_string()).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "capability" => capability.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(capability: &str, fault_kind: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "capability" => capability.to_string(),
            "fault_kind" => fault_kind.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "capability" => capability.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_cancelled(capability: &str) {
        counter!(names::JOBS_CANCELLED_TOTAL, "capability" => capability.to_string()).increment(1);
    }

    pub fn job_interrupted(capability: &str) {
        counter!(names::JOBS_INTERRUPTED_TOTAL, "capability" => capability.to_string()).increment(1);
    }

    pub fn update_scheduled(scheduled: usize) {
        gauge!(names::JOBS_SCHEDULED).set(scheduled as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        register_metrics();
    }

    #[test]
    fn test_job_metrics() {
        JobMetrics::job_submitted("xtwitter");
        JobMetrics::job_completed("xtwitter", Duration::from_secs(1));
        JobMetrics::job_failed("xtwitter", "rate_limit", Duration::from_secs(5));
        JobMetrics::update_scheduled(3);
    }
}
