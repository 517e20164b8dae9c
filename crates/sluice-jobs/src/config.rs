//! Pipeline configuration.

use std::time::Duration;

use sluice_core::{defaults, Error, Result};

/// Retry policy for the result handler's sink and notifier calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRetryPolicy {
    /// Attempts per call, the first one included.
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` is followed by a wait of `n × unit`.
    pub backoff_unit: Duration,
    /// Timeout applied to each individual call.
    pub call_timeout: Duration,
}

impl Default for IoRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::IO_RETRY_ATTEMPTS,
            backoff_unit: Duration::from_millis(defaults::IO_RETRY_BACKOFF_MS),
            call_timeout: Duration::from_secs(defaults::IO_CALL_TIMEOUT_SECS),
        }
    }
}

impl IoRetryPolicy {
    /// Delay after a failed `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

/// Configuration for the pipeline manager.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of workers draining the job queue.
    pub worker_count: usize,
    /// Drives queue sizing: job queue = 2 × batch size, result queue = batch size.
    pub batch_size: usize,
    /// Deadline for enqueueing a job before `QueueTimeout` is returned.
    pub submit_timeout: Duration,
    /// Maximum attempts per message, the first one included.
    pub max_retries: u32,
    /// Interval of the periodic metrics log line.
    pub metrics_log_interval: Duration,
    /// Linear retry backoff unit: attempt `n` is retried after `n × unit`.
    pub retry_backoff_unit: Duration,
    /// Per-attempt processing timeout.
    pub processing_timeout: Duration,
    /// How long a worker may block handing a result to the result queue.
    pub result_send_timeout: Duration,
    /// Retry policy for sink and notifier calls.
    pub io_retry: IoRetryPolicy,
    /// Topic for success/failure notifications.
    pub result_topic: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::WORKER_COUNT,
            batch_size: defaults::BATCH_SIZE,
            submit_timeout: Duration::from_millis(defaults::SUBMIT_TIMEOUT_MS),
            max_retries: defaults::MAX_RETRIES,
            metrics_log_interval: Duration::from_secs(defaults::METRICS_LOG_INTERVAL_SECS),
            retry_backoff_unit: Duration::from_millis(defaults::RETRY_BACKOFF_UNIT_MS),
            processing_timeout: Duration::from_secs(defaults::PROCESSING_TIMEOUT_SECS),
            result_send_timeout: Duration::from_millis(defaults::RESULT_SEND_TIMEOUT_MS),
            io_retry: IoRetryPolicy::default(),
            result_topic: defaults::RESULT_TOPIC.to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PIPELINE_WORKERS` | `5` | Number of workers |
    /// | `PIPELINE_BATCH_SIZE` | `100` | Batch size (job queue holds twice this) |
    /// | `PIPELINE_SUBMIT_TIMEOUT_MS` | `5000` | Enqueue deadline |
    /// | `PIPELINE_MAX_RETRIES` | `3` | Attempts per message |
    /// | `PIPELINE_METRICS_INTERVAL_SECS` | `30` | Metrics log interval |
    /// | `PIPELINE_RETRY_BACKOFF_MS` | `1000` | Linear retry backoff unit |
    /// | `PIPELINE_PROCESSING_TIMEOUT_SECS` | `300` | Per-attempt timeout |
    /// | `PIPELINE_RESULT_SEND_TIMEOUT_MS` | `5000` | Result queue hand-off deadline |
    /// | `PIPELINE_IO_RETRY_ATTEMPTS` | `3` | Sink/notifier attempts |
    /// | `PIPELINE_IO_RETRY_BACKOFF_MS` | `1000` | Sink/notifier backoff unit |
    /// | `PIPELINE_IO_TIMEOUT_SECS` | `30` | Sink/notifier call timeout |
    /// | `PIPELINE_RESULT_TOPIC` | `processing-results` | Notification topic |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let base = Self::default();
        let io_base = IoRetryPolicy::default();

        Self {
            worker_count: env_parse("PIPELINE_WORKERS").unwrap_or(base.worker_count),
            batch_size: env_parse("PIPELINE_BATCH_SIZE").unwrap_or(base.batch_size),
            submit_timeout: env_parse("PIPELINE_SUBMIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.submit_timeout),
            max_retries: env_parse("PIPELINE_MAX_RETRIES").unwrap_or(base.max_retries),
            metrics_log_interval: env_parse("PIPELINE_METRICS_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.metrics_log_interval),
            retry_backoff_unit: env_parse("PIPELINE_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.retry_backoff_unit),
            processing_timeout: env_parse("PIPELINE_PROCESSING_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.processing_timeout),
            result_send_timeout: env_parse("PIPELINE_RESULT_SEND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.result_send_timeout),
            io_retry: IoRetryPolicy {
                max_attempts: env_parse("PIPELINE_IO_RETRY_ATTEMPTS")
                    .unwrap_or(io_base.max_attempts),
                backoff_unit: env_parse("PIPELINE_IO_RETRY_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(io_base.backoff_unit),
                call_timeout: env_parse("PIPELINE_IO_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(io_base.call_timeout),
            },
            result_topic: std::env::var("PIPELINE_RESULT_TOPIC")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(base.result_topic),
        }
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the batch size (and with it the queue capacities).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the enqueue deadline.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Set the maximum attempts per message.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the periodic metrics log interval.
    pub fn with_metrics_log_interval(mut self, interval: Duration) -> Self {
        self.metrics_log_interval = interval;
        self
    }

    /// Set the linear retry backoff unit.
    pub fn with_retry_backoff_unit(mut self, unit: Duration) -> Self {
        self.retry_backoff_unit = unit;
        self
    }

    /// Set the per-attempt processing timeout.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Set the result queue hand-off deadline.
    pub fn with_result_send_timeout(mut self, timeout: Duration) -> Self {
        self.result_send_timeout = timeout;
        self
    }

    /// Set the sink/notifier retry policy.
    pub fn with_io_retry(mut self, policy: IoRetryPolicy) -> Self {
        self.io_retry = policy;
        self
    }

    /// Set the notification topic.
    pub fn with_result_topic(mut self, topic: impl Into<String>) -> Self {
        self.result_topic = topic.into();
        self
    }

    /// Capacity of the bounded job queue.
    pub fn job_queue_capacity(&self) -> usize {
        self.batch_size * defaults::JOB_QUEUE_FACTOR
    }

    /// Capacity of the result queue.
    pub fn result_queue_capacity(&self) -> usize {
        self.batch_size
    }

    /// Delay before resubmitting a job whose `attempt` just failed.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_backoff_unit * attempt
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker count must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be greater than 0".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max retries must be at least 1".into()));
        }
        if self.io_retry.max_attempts == 0 {
            return Err(Error::Config(
                "sink/notifier attempts must be at least 1".into(),
            ));
        }
        if self.metrics_log_interval.is_zero() {
            return Err(Error::Config(
                "metrics log interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
