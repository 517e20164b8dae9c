//! Structured logging field name constants for sluice.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across every component.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Terminal failures, exhausted sink/notifier retries, dropped results |
//! | WARN  | Failed attempts that will be retried, individual I/O retry attempts |
//! | INFO  | Lifecycle events (start, stop), periodic metrics |
//! | DEBUG | Per-job progress, decision points |
//! | TRACE | Queue polling |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Component emitting the event.
/// Values: "manager", "worker", "retry", "results", "metrics", "sink", "notifier"
pub const COMPONENT: &str = "component";

/// Worker identity (1-based).
pub const WORKER_ID: &str = "worker_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID, stable across the attempts of one message.
pub const JOB_ID: &str = "job_id";

/// Message identifier as supplied by the source.
pub const MESSAGE_ID: &str = "message_id";

/// Source kind tag ("kafka", "file", "api", ...).
pub const SOURCE_KIND: &str = "source_kind";

/// Attempt number, starting at 1.
pub const ATTEMPT: &str = "attempt";

/// Sink object key.
pub const SINK_KEY: &str = "sink_key";

/// Notification topic.
pub const TOPIC: &str = "topic";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Delay before a scheduled retry, in milliseconds.
pub const DELAY_MS: &str = "delay_ms";

/// Number of jobs waiting in the job queue.
pub const QUEUE_SIZE: &str = "queue_size";

/// Number of messages in a submitted batch.
pub const BATCH_SIZE: &str = "batch_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
