//! Centralized default constants for the sluice pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the binary reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// WORKER POOL
// =============================================================================

/// Default number of workers draining the job queue.
pub const WORKER_COUNT: usize = 5;

/// Default batch size. The job queue holds `2 × BATCH_SIZE` jobs and the
/// result queue holds `BATCH_SIZE` results.
pub const BATCH_SIZE: usize = 100;

/// Job queue capacity multiplier applied to the batch size.
pub const JOB_QUEUE_FACTOR: usize = 2;

/// Default deadline for enqueueing a job, in milliseconds.
pub const SUBMIT_TIMEOUT_MS: u64 = 5_000;

/// Default per-attempt processing timeout in seconds (5 minutes).
pub const PROCESSING_TIMEOUT_SECS: u64 = 300;

/// Default deadline for handing a result to the result queue, in milliseconds.
pub const RESULT_SEND_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// RETRY
// =============================================================================

/// Default maximum attempts per message (the first attempt included).
pub const MAX_RETRIES: u32 = 3;

/// Linear retry backoff unit in milliseconds: attempt `n` waits `n × unit`.
pub const RETRY_BACKOFF_UNIT_MS: u64 = 1_000;

/// Attempts for each sink/notifier call made by the result handler.
pub const IO_RETRY_ATTEMPTS: u32 = 3;

/// Linear backoff unit between sink/notifier attempts, in milliseconds.
pub const IO_RETRY_BACKOFF_MS: u64 = 1_000;

/// Timeout for a single sink/notifier call in seconds.
pub const IO_CALL_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// OBSERVABILITY
// =============================================================================

/// Default periodic metrics log interval in seconds.
pub const METRICS_LOG_INTERVAL_SECS: u64 = 30;

/// Default pipeline event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DOWNSTREAM
// =============================================================================

/// Topic that success/failure notifications are published on.
pub const RESULT_TOPIC: &str = "processing-results";

/// Sink key namespace for successful outputs.
pub const PROCESSED_PREFIX: &str = "processed";

/// Sink key namespace for terminal failure envelopes.
pub const FAILED_PREFIX: &str = "failed";

/// Content type of everything the result handler writes.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Default webhook HTTP request timeout in seconds.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// SOURCES
// =============================================================================

/// Default fetch timeout for pull-style message sources, in milliseconds.
pub const SOURCE_FETCH_TIMEOUT_MS: u64 = 1_000;

/// Default poll interval of the synthetic API source, in milliseconds.
pub const API_POLL_INTERVAL_MS: u64 = 10_000;
