//! Pipeline counters and derived statistics.
//!
//! All reads and writes go through one reader/writer lock. Readers do not
//! block each other; a poisoned lock is recovered rather than propagated.

use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug)]
struct Counters {
    jobs_submitted: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    jobs_retried: u64,
    retries_cancelled: u64,
    results_dropped: u64,
    jobs_abandoned: u64,
    sink_failures: u64,
    notify_failures: u64,
    total_processing: Duration,
    processed_jobs: u64,
    started: Instant,
    start_time: DateTime<Utc>,
    period_started: Instant,
    period_start: DateTime<Utc>,
}

impl Counters {
    fn new() -> Self {
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            jobs_submitted: 0,
            jobs_succeeded: 0,
            jobs_failed: 0,
            jobs_retried: 0,
            retries_cancelled: 0,
            results_dropped: 0,
            jobs_abandoned: 0,
            sink_failures: 0,
            notify_failures: 0,
            total_processing: Duration::ZERO,
            processed_jobs: 0,
            started: now,
            start_time: wall,
            period_started: now,
            period_start: wall,
        }
    }
}

/// Thread-safe metrics collector shared by every pipeline component.
#[derive(Debug)]
pub struct MetricsCollector {
    inner: RwLock<Counters>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a collector whose start time is now.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Counters::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Counters> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Counters> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_job_submitted(&self) {
        self.write().jobs_submitted += 1;
    }

    pub fn record_job_succeeded(&self) {
        self.write().jobs_succeeded += 1;
    }

    pub fn record_job_failed(&self) {
        self.write().jobs_failed += 1;
    }

    /// A retry attempt was re-enqueued.
    pub fn record_job_retried(&self) {
        self.write().jobs_retried += 1;
    }

    /// A pending retry was discarded by shutdown.
    pub fn record_retry_cancelled(&self) {
        self.write().retries_cancelled += 1;
    }

    /// A result could not be handed to the result handler.
    pub fn record_result_dropped(&self) {
        self.write().results_dropped += 1;
    }

    /// Jobs left in the queue at shutdown.
    pub fn record_jobs_abandoned(&self, count: u64) {
        self.write().jobs_abandoned += count;
    }

    pub fn record_sink_failure(&self) {
        self.write().sink_failures += 1;
    }

    pub fn record_notify_failure(&self) {
        self.write().notify_failures += 1;
    }

    /// Add one attempt's processing time.
    pub fn record_processing_duration(&self, duration: Duration) {
        let mut counters = self.write();
        counters.total_processing += duration;
        counters.processed_jobs += 1;
    }

    /// Zero every counter and open a new reporting period.
    ///
    /// The original start time is kept so uptime keeps growing.
    pub fn reset(&self) {
        let mut counters = self.write();
        let started = counters.started;
        let start_time = counters.start_time;
        *counters = Counters::new();
        counters.started = started;
        counters.start_time = start_time;
    }

    /// Point-in-time copy with derived values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.read();
        let uptime = c.started.elapsed();
        let period = c.period_started.elapsed();

        let terminal = c.jobs_succeeded + c.jobs_failed;
        let success_rate_percent = if terminal == 0 {
            0.0
        } else {
            c.jobs_succeeded as f64 / terminal as f64 * 100.0
        };

        let uptime_secs = uptime.as_secs_f64();
        let throughput_per_sec = if uptime_secs > 0.0 {
            c.processed_jobs as f64 / uptime_secs
        } else {
            0.0
        };

        let avg_processing_ms = if c.processed_jobs == 0 {
            0.0
        } else {
            c.total_processing.as_secs_f64() * 1000.0 / c.processed_jobs as f64
        };

        MetricsSnapshot {
            jobs_submitted: c.jobs_submitted,
            jobs_succeeded: c.jobs_succeeded,
            jobs_failed: c.jobs_failed,
            jobs_retried: c.jobs_retried,
            retries_cancelled: c.retries_cancelled,
            results_dropped: c.results_dropped,
            jobs_abandoned: c.jobs_abandoned,
            sink_failures: c.sink_failures,
            notify_failures: c.notify_failures,
            processed_jobs: c.processed_jobs,
            total_jobs: terminal,
            success_rate_percent,
            throughput_per_sec,
            avg_processing_ms,
            total_processing_ms: c.total_processing.as_millis() as u64,
            uptime_secs,
            start_time: c.start_time,
            period_start: c.period_start,
            period_secs: period.as_secs_f64(),
        }
    }
}

/// Counters and derived values at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub retries_cancelled: u64,
    pub results_dropped: u64,
    pub jobs_abandoned: u64,
    pub sink_failures: u64,
    pub notify_failures: u64,
    /// Attempts whose duration was recorded.
    pub processed_jobs: u64,
    /// Jobs with a terminal disposition (succeeded + failed).
    pub total_jobs: u64,
    /// `succeeded / (succeeded + failed) × 100`, zero before any terminal job.
    pub success_rate_percent: f64,
    /// Processed attempts per second since start.
    pub throughput_per_sec: f64,
    pub avg_processing_ms: f64,
    pub total_processing_ms: u64,
    pub uptime_secs: f64,
    pub start_time: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_secs: f64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Pipeline Metrics ===")?;
        writeln!(f, "Uptime:          {:.1}s", self.uptime_secs)?;
        writeln!(f, "Jobs submitted:  {}", self.jobs_submitted)?;
        writeln!(f, "Jobs succeeded:  {}", self.jobs_succeeded)?;
        writeln!(f, "Jobs failed:     {}", self.jobs_failed)?;
        writeln!(f, "Jobs retried:    {}", self.jobs_retried)?;
        writeln!(f, "Success rate:    {:.2}%", self.success_rate_percent)?;
        writeln!(f, "Throughput:      {:.2} jobs/s", self.throughput_per_sec)?;
        writeln!(f, "Avg processing:  {:.2}ms", self.avg_processing_ms)?;
        writeln!(f, "Total processing: {}ms", self.total_processing_ms)?;
        if self.results_dropped + self.jobs_abandoned + self.retries_cancelled > 0 {
            writeln!(
                f,
                "Lost:            {} dropped, {} abandoned, {} retries cancelled",
                self.results_dropped, self.jobs_abandoned, self.retries_cancelled
            )?;
        }
        if self.sink_failures + self.notify_failures > 0 {
            writeln!(
                f,
                "I/O failures:    {} sink, {} notify",
                self.sink_failures, self.notify_failures
            )?;
        }
        write!(f, "========================")
    }
}
