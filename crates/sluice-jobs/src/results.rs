//! Result handler: the single consumer of the result queue.
//!
//! Successes go to the sink under the `processed/` namespace and terminal
//! failures under `failed/`, each followed by a notification. Non-terminal
//! failures (a retry is pending) only contribute their processing time.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sluice_core::defaults::{FAILED_PREFIX, JSON_CONTENT_TYPE, PROCESSED_PREFIX};
use sluice_core::{
    DurableSink, Error, FailureRecord, Notification, Notifier, ProcessingResult, Result,
};

use crate::config::{IoRetryPolicy, PipelineConfig};
use crate::events::{EventBus, PipelineEvent};
use crate::metrics::MetricsCollector;

/// Time-bucketed sink key: `<prefix>/YYYY/MM/DD/HH/<message_id>.json`.
///
/// Writes of the same message id within one UTC hour land on the same key.
pub fn result_key(prefix: &str, at: DateTime<Utc>, message_id: &str) -> String {
    format!("{prefix}/{}/{message_id}.json", at.format("%Y/%m/%d/%H"))
}

pub(crate) struct ResultHandler {
    sink: Arc<dyn DurableSink>,
    notifier: Option<Arc<dyn Notifier>>,
    io_retry: IoRetryPolicy,
    topic: String,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
}

impl ResultHandler {
    pub fn new(
        sink: Arc<dyn DurableSink>,
        notifier: Option<Arc<dyn Notifier>>,
        config: &PipelineConfig,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
    ) -> Self {
        Self {
            sink,
            notifier,
            io_retry: config.io_retry.clone(),
            topic: config.result_topic.clone(),
            metrics,
            events,
        }
    }

    /// Drain results until every sender is gone.
    ///
    /// Cancellation does not stop the loop; results still arriving from
    /// in-flight attempts are written before the handler exits.
    pub async fn run(self, mut rx: mpsc::Receiver<ProcessingResult>, token: CancellationToken) {
        let mut draining = false;
        loop {
            tokio::select! {
                biased;
                next = rx.recv() => match next {
                    Some(result) => self.handle(result).await,
                    None => break,
                },
                _ = token.cancelled(), if !draining => {
                    draining = true;
                    info!(
                        subsystem = "jobs",
                        component = "results",
                        "Shutdown requested, draining remaining results"
                    );
                }
            }
        }
        debug!(subsystem = "jobs", component = "results", "Result handler stopped");
    }

    pub async fn handle(&self, result: ProcessingResult) {
        if !result.reissued {
            self.metrics.record_processing_duration(result.duration);
        }

        if result.success {
            self.handle_success(result).await;
        } else if result.retrying {
            debug!(
                subsystem = "jobs",
                component = "results",
                job_id = %result.job_id,
                message_id = %result.message_id,
                attempt = result.attempt,
                "Attempt failed with retry pending"
            );
        } else {
            self.handle_failure(result).await;
        }
    }

    async fn handle_success(&self, result: ProcessingResult) {
        let now = Utc::now();
        let key = result_key(PROCESSED_PREFIX, now, &result.message_id);

        if let Err(e) = self
            .with_io_retry("sink", &key, || {
                self.sink.put(&key, &result.output, JSON_CONTENT_TYPE)
            })
            .await
        {
            self.metrics.record_sink_failure();
            error!(
                subsystem = "jobs",
                component = "results",
                message_id = %result.message_id,
                sink_key = %key,
                error = %e,
                "Failed to store processed result"
            );
        }

        let notification = Notification::new(
            self.topic.clone(),
            result.message_id.clone(),
            result.output.clone(),
        )
        .with_header("status", "success")
        .with_header("processing_duration", format_duration(&result))
        .with_header("processed_at", now.to_rfc3339())
        .with_header("attempt", result.attempt.to_string());
        self.notify(&notification).await;

        self.metrics.record_job_succeeded();
        debug!(
            subsystem = "jobs",
            component = "results",
            job_id = %result.job_id,
            message_id = %result.message_id,
            attempt = result.attempt,
            sink_key = %key,
            "Job succeeded"
        );
        self.events.emit(PipelineEvent::JobSucceeded {
            job_id: result.job_id,
            message_id: result.message_id,
            attempt: result.attempt,
        });
    }

    async fn handle_failure(&self, result: ProcessingResult) {
        let now = Utc::now();
        let key = result_key(FAILED_PREFIX, now, &result.message_id);
        let error_text = result.error.clone().unwrap_or_default();

        error!(
            subsystem = "jobs",
            component = "results",
            job_id = %result.job_id,
            message_id = %result.message_id,
            attempt = result.attempt,
            error = %error_text,
            "Job failed permanently"
        );

        match serde_json::to_vec_pretty(&FailureRecord::new(&result, now)) {
            Ok(envelope) => {
                if let Err(e) = self
                    .with_io_retry("sink", &key, || {
                        self.sink.put(&key, &envelope, JSON_CONTENT_TYPE)
                    })
                    .await
                {
                    self.metrics.record_sink_failure();
                    error!(
                        subsystem = "jobs",
                        component = "results",
                        message_id = %result.message_id,
                        sink_key = %key,
                        error = %e,
                        "Failed to store failure record"
                    );
                }
            }
            Err(e) => {
                self.metrics.record_sink_failure();
                error!(
                    subsystem = "jobs",
                    component = "results",
                    message_id = %result.message_id,
                    error = %e,
                    "Failed to encode failure record"
                );
            }
        }

        let notification = Notification::new(
            self.topic.clone(),
            result.message_id.clone(),
            error_text.clone().into_bytes(),
        )
        .with_header("status", "failed")
        .with_header("error", error_text.clone())
        .with_header("processing_duration", format_duration(&result))
        .with_header("failed_at", now.to_rfc3339())
        .with_header("attempt", result.attempt.to_string());
        self.notify(&notification).await;

        self.metrics.record_job_failed();
        self.events.emit(PipelineEvent::JobFailed {
            job_id: result.job_id,
            message_id: result.message_id,
            attempt: result.attempt,
            error: error_text,
        });
    }

    async fn notify(&self, notification: &Notification) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = self
            .with_io_retry("notifier", &notification.key, || notifier.send(notification))
            .await
        {
            self.metrics.record_notify_failure();
            error!(
                subsystem = "jobs",
                component = "results",
                topic = %notification.topic,
                message_id = %notification.key,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    /// Run one sink or notifier call with a per-call timeout and linear backoff.
    async fn with_io_retry<F, Fut>(&self, target: &str, key: &str, mut call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let policy = &self.io_retry;
        let attempts = policy.max_attempts.max(1);
        let mut last_error = Error::Internal(format!("{target} call never attempted"));

        for attempt in 1..=attempts {
            match tokio::time::timeout(policy.call_timeout, call()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = timeout_error(target, policy.call_timeout.as_millis());
                }
            }

            if attempt < attempts {
                let backoff = policy.backoff(attempt);
                warn!(
                    subsystem = "jobs",
                    component = "results",
                    io_target = target,
                    key,
                    attempt,
                    max_attempts = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last_error,
                    "I/O call failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
        Err(last_error)
    }
}

fn timeout_error(target: &str, millis: u128) -> Error {
    let message = format!("{target} call timed out after {millis}ms");
    match target {
        "notifier" => Error::Notifier(message),
        _ => Error::Sink(message),
    }
}

fn format_duration(result: &ProcessingResult) -> String {
    format!("{}ms", result.duration.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use sluice_core::{Job, Message, SourceKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FlakySink {
        failures_left: AtomicU32,
        writes: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl DurableSink for FlakySink {
        async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Sink("unavailable".into()));
            }
            self.writes
                .lock()
                .unwrap()
                .push((key.to_string(), data.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        handler: ResultHandler,
        sink: Arc<FlakySink>,
        notifier: Arc<RecordingNotifier>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture(sink_failures: u32) -> Fixture {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicU32::new(sink_failures),
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = Arc::new(MetricsCollector::new());
        let config = PipelineConfig::default().with_io_retry(IoRetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
            call_timeout: Duration::from_secs(1),
        });
        let handler = ResultHandler::new(
            sink.clone(),
            Some(notifier.clone()),
            &config,
            metrics.clone(),
            EventBus::new(16),
        );
        Fixture {
            handler,
            sink,
            notifier,
            metrics,
        }
    }

    fn result(success: bool) -> ProcessingResult {
        let job = Job::new(Message::new("msg-1", SourceKind::Api, b"{}".to_vec()));
        let mut result = ProcessingResult::for_job(&job, Utc::now());
        result.success = success;
        result.duration = Duration::from_millis(12);
        if success {
            result.output = br#"{"done":true}"#.to_vec();
        } else {
            result.error = Some("bad payload".into());
        }
        result
    }

    #[test]
    fn test_result_key_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 41, 0).unwrap();
        assert_eq!(
            result_key("processed", at, "abc"),
            "processed/2024/03/07/09/abc.json"
        );
        assert_eq!(result_key("failed", at, "abc"), "failed/2024/03/07/09/abc.json");
    }

    #[tokio::test]
    async fn test_success_written_and_notified() {
        let f = fixture(0);
        f.handler.handle(result(true)).await;

        let writes = f.sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].0.starts_with("processed/"));
        assert!(writes[0].0.ends_with("/msg-1.json"));
        assert_eq!(writes[0].1, br#"{"done":true}"#);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status(), Some("success"));
        assert_eq!(sent[0].key, "msg-1");
        assert_eq!(sent[0].topic, "processing-results");
        assert_eq!(sent[0].headers.get("processing_duration").unwrap(), "12ms");

        let snap = f.metrics.snapshot();
        assert_eq!(snap.jobs_succeeded, 1);
        assert_eq!(snap.processed_jobs, 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_writes_envelope() {
        let f = fixture(0);
        f.handler.handle(result(false)).await;

        let writes = f.sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].0.starts_with("failed/"));
        let record: FailureRecord = serde_json::from_slice(&writes[0].1).unwrap();
        assert_eq!(record.message_id, "msg-1");
        assert_eq!(record.error, "bad payload");
        assert_eq!(record.attempt, 1);
        assert_eq!(record.duration_ms, 12);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent[0].status(), Some("failed"));
        assert_eq!(sent[0].headers.get("error").unwrap(), "bad payload");
        assert_eq!(
            sent[0].headers.get("failed_at").unwrap(),
            &record.failed_at.to_rfc3339()
        );
        assert_eq!(f.metrics.snapshot().jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_reissued_terminal_failure_counts_duration_once() {
        let f = fixture(0);
        let mut first = result(false);
        first.retrying = true;
        let mut terminal = first.clone();
        terminal.retrying = false;
        terminal.reissued = true;

        f.handler.handle(first).await;
        f.handler.handle(terminal).await;

        let snap = f.metrics.snapshot();
        assert_eq!(snap.processed_jobs, 1);
        assert_eq!(snap.jobs_failed, 1);
        let writes = f.sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].0.starts_with("failed/"));
    }

    #[tokio::test]
    async fn test_retrying_failure_only_records_duration() {
        let f = fixture(0);
        let mut r = result(false);
        r.retrying = true;
        f.handler.handle(r).await;

        assert!(f.sink.writes.lock().unwrap().is_empty());
        assert!(f.notifier.sent.lock().unwrap().is_empty());
        let snap = f.metrics.snapshot();
        assert_eq!(snap.jobs_failed, 0);
        assert_eq!(snap.processed_jobs, 1);
    }

    #[tokio::test]
    async fn test_sink_retried_until_success() {
        let f = fixture(2);
        f.handler.handle(result(true)).await;
        assert_eq!(f.sink.writes.lock().unwrap().len(), 1);
        assert_eq!(f.metrics.snapshot().sink_failures, 0);
    }

    #[tokio::test]
    async fn test_sink_exhaustion_is_counted_not_fatal() {
        let f = fixture(10);
        f.handler.handle(result(true)).await;

        assert!(f.sink.writes.lock().unwrap().is_empty());
        let snap = f.metrics.snapshot();
        assert_eq!(snap.sink_failures, 1);
        assert_eq!(snap.jobs_succeeded, 1);
        // Notification still goes out
        assert_eq!(f.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_until_senders_close() {
        let f = fixture(0);
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        token.cancel();

        for _ in 0..3 {
            tx.send(result(true)).await.unwrap();
        }
        drop(tx);
        f.handler.run(rx, token).await;

        assert_eq!(f.metrics.snapshot().jobs_succeeded, 3);
        // Same message id within the hour overwrites the same key
        let writes = f.sink.writes.lock().unwrap();
        assert!(writes.iter().all(|(k, _)| k == &writes[0].0));
    }
}
