//! Delayed resubmission of failed attempts.
//!
//! Each scheduled retry is a timer task owned by a [`TaskTracker`], so the
//! manager can cancel and await every pending retry during shutdown. Waiting
//! for a retry never occupies a worker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use sluice_core::{Error, Job, ProcessingResult};

use crate::events::{EventBus, PipelineEvent};
use crate::metrics::MetricsCollector;
use crate::queue::{JobQueue, ResultSender};

/// Spawns cancellable retry timers that re-enqueue the next attempt.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    queue: JobQueue,
    results: ResultSender,
    tracker: TaskTracker,
    token: CancellationToken,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
}

impl RetryScheduler {
    pub fn new(
        queue: JobQueue,
        results: ResultSender,
        tracker: TaskTracker,
        token: CancellationToken,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            results,
            tracker,
            token,
            metrics,
            events,
        }
    }

    /// Re-enqueue `next` after `delay`.
    ///
    /// `last` is the failed attempt that caused the retry. If the queue stays
    /// full for the whole submit timeout it is delivered as the terminal
    /// failure instead, so the job still gets exactly one disposition.
    pub fn schedule(&self, next: Job, delay: Duration, last: ProcessingResult) {
        let this = self.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = this.token.cancelled() => {
                    this.metrics.record_retry_cancelled();
                    info!(
                        subsystem = "jobs",
                        component = "retry",
                        job_id = %next.id,
                        message_id = %next.message.id,
                        attempt = next.attempt,
                        "Pending retry cancelled by shutdown"
                    );
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            this.resubmit(next, last).await;
        });
    }

    async fn resubmit(&self, next: Job, mut last: ProcessingResult) {
        let job_id = next.id;
        let message_id = next.message.id.clone();
        let attempt = next.attempt;

        match self.queue.enqueue(next).await {
            Ok(()) => {
                self.metrics.record_job_retried();
                debug!(
                    subsystem = "jobs",
                    component = "retry",
                    %job_id,
                    %message_id,
                    attempt,
                    "Retry attempt enqueued"
                );
                self.events.emit(PipelineEvent::RetryScheduled {
                    job_id,
                    message_id,
                    attempt,
                });
            }
            Err(Error::QueueTimeout { timeout }) => {
                error!(
                    subsystem = "jobs",
                    component = "retry",
                    %job_id,
                    %message_id,
                    attempt,
                    timeout_ms = timeout.as_millis() as u64,
                    "Job queue full, recording last attempt as terminal failure"
                );
                last.retrying = false;
                last.reissued = true;
                self.results.deliver(last).await;
            }
            Err(e) => {
                self.metrics.record_retry_cancelled();
                info!(
                    subsystem = "jobs",
                    component = "retry",
                    %job_id,
                    %message_id,
                    attempt,
                    error = %e,
                    "Retry dropped during shutdown"
                );
            }
        }
    }

    /// Retry timers that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sluice_core::{Message, SourceKind};
    use tokio::sync::mpsc;

    struct Harness {
        scheduler: RetryScheduler,
        jobs: mpsc::Receiver<Job>,
        results: mpsc::Receiver<ProcessingResult>,
        tracker: TaskTracker,
        token: CancellationToken,
        metrics: Arc<MetricsCollector>,
    }

    fn harness(queue_capacity: usize, submit_timeout: Duration) -> Harness {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let metrics = Arc::new(MetricsCollector::new());
        let events = EventBus::new(16);
        let (job_tx, jobs) = mpsc::channel(queue_capacity);
        let (result_tx, results) = mpsc::channel(4);
        let scheduler = RetryScheduler::new(
            JobQueue::new(job_tx, token.clone(), submit_timeout),
            ResultSender::new(result_tx, Duration::from_secs(1), metrics.clone(), events.clone()),
            tracker.clone(),
            token.clone(),
            metrics.clone(),
            events,
        );
        Harness {
            scheduler,
            jobs,
            results,
            tracker,
            token,
            metrics,
        }
    }

    fn failed(job: &Job) -> ProcessingResult {
        let mut result = ProcessingResult::for_job(job, Utc::now());
        result.error = Some("boom".into());
        result
    }

    #[tokio::test]
    async fn test_retry_enqueued_after_delay() {
        let mut h = harness(4, Duration::from_secs(1));
        let first = Job::new(Message::new("m", SourceKind::Kafka, b"x".to_vec()));
        let next = first.next_attempt();

        let started = std::time::Instant::now();
        h.scheduler
            .schedule(next, Duration::from_millis(40), failed(&first));
        assert_eq!(h.scheduler.pending(), 1);

        let job = h.jobs.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(35));
        assert_eq!(job.id, first.id);
        assert_eq!(job.attempt, 2);

        h.tracker.close();
        h.tracker.wait().await;
        assert_eq!(h.metrics.snapshot().jobs_retried, 1);
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_discards_pending_retry() {
        let mut h = harness(4, Duration::from_secs(1));
        let first = Job::new(Message::new("m", SourceKind::Kafka, b"x".to_vec()));
        h.scheduler
            .schedule(first.next_attempt(), Duration::from_secs(60), failed(&first));

        h.token.cancel();
        h.tracker.close();
        h.tracker.wait().await;

        let snap = h.metrics.snapshot();
        assert_eq!(snap.retries_cancelled, 1);
        assert_eq!(snap.jobs_retried, 0);
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_turns_retry_into_terminal_failure() {
        let mut h = harness(1, Duration::from_millis(20));
        let blocker = Job::new(Message::new("blocker", SourceKind::Api, b"{}".to_vec()));
        h.scheduler.queue.enqueue(blocker).await.unwrap();

        let first = Job::new(Message::new("m", SourceKind::Kafka, b"x".to_vec()));
        let mut last = failed(&first);
        last.retrying = true;
        h.scheduler
            .schedule(first.next_attempt(), Duration::from_millis(1), last);

        let terminal = h.results.recv().await.unwrap();
        assert_eq!(terminal.message_id, "m");
        assert_eq!(terminal.attempt, 1);
        assert!(terminal.is_terminal_failure());
        assert!(terminal.reissued);
        assert_eq!(h.metrics.snapshot().jobs_retried, 0);
    }
}
