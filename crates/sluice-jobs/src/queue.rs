//! Sending halves of the job and result queues.
//!
//! [`JobQueue`] is shared by the manager and retry timers; it waits for space
//! up to the submit deadline and refuses work once shutdown begins.
//! [`ResultSender`] is shared by workers and retry timers; it waits up to the
//! result send deadline and records anything it has to drop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use sluice_core::{Error, Job, ProcessingResult, Result};

use crate::events::{EventBus, PipelineEvent};
use crate::metrics::MetricsCollector;

/// Bounded submission handle for the job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    token: CancellationToken,
    submit_timeout: Duration,
}

impl JobQueue {
    pub fn new(tx: mpsc::Sender<Job>, token: CancellationToken, submit_timeout: Duration) -> Self {
        Self {
            tx,
            token,
            submit_timeout,
        }
    }

    /// Enqueue a job, waiting at most the submit timeout for space.
    ///
    /// Returns [`Error::QueueTimeout`] when the queue stayed full and
    /// [`Error::ShuttingDown`] once cancellation has been requested or the
    /// queue has been closed.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let job_id = job.id;
        let attempt = job.attempt;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::ShuttingDown),
            sent = self.tx.send_timeout(job, self.submit_timeout) => match sent {
                Ok(()) => {
                    debug!(subsystem = "jobs", component = "queue", %job_id, attempt, "Job enqueued");
                    Ok(())
                }
                Err(SendTimeoutError::Timeout(_)) => Err(Error::QueueTimeout {
                    timeout: self.submit_timeout,
                }),
                Err(SendTimeoutError::Closed(_)) => Err(Error::ShuttingDown),
            },
        }
    }

    /// Jobs currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Hands results to the result handler without ever dropping them silently.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<ProcessingResult>,
    send_timeout: Duration,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
}

impl ResultSender {
    pub fn new(
        tx: mpsc::Sender<ProcessingResult>,
        send_timeout: Duration,
        metrics: Arc<MetricsCollector>,
        events: EventBus,
    ) -> Self {
        Self {
            tx,
            send_timeout,
            metrics,
            events,
        }
    }

    /// Send a result, blocking up to the send timeout.
    ///
    /// A result that cannot be delivered is counted in `results_dropped`,
    /// logged at ERROR and announced as [`PipelineEvent::ResultDropped`].
    /// Returns whether the result was delivered.
    pub async fn deliver(&self, result: ProcessingResult) -> bool {
        let (result, reason) = match self.tx.send_timeout(result, self.send_timeout).await {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(r)) => (r, "result queue full"),
            Err(SendTimeoutError::Closed(r)) => (r, "result queue closed"),
        };

        self.metrics.record_result_dropped();
        error!(
            subsystem = "jobs",
            component = "results",
            job_id = %result.job_id,
            message_id = %result.message_id,
            attempt = result.attempt,
            success = result.success,
            reason,
            "Dropping processing result"
        );
        self.events.emit(PipelineEvent::ResultDropped {
            job_id: result.job_id,
            message_id: result.message_id,
            attempt: result.attempt,
        });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sluice_core::{Message, SourceKind};

    fn job(id: &str) -> Job {
        Job::new(Message::new(id, SourceKind::Api, b"{}".to_vec()))
    }

    #[tokio::test]
    async fn test_enqueue_and_len() {
        let (tx, mut rx) = mpsc::channel(2);
        let queue = JobQueue::new(tx, CancellationToken::new(), Duration::from_millis(50));

        queue.enqueue(job("a")).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.capacity(), 2);
        assert_eq!(rx.recv().await.unwrap().message_id(), "a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_times_out_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = JobQueue::new(tx, CancellationToken::new(), Duration::from_millis(30));
        queue.enqueue(job("a")).await.unwrap();

        let started = std::time::Instant::now();
        let err = queue.enqueue(job("b")).await.unwrap_err();
        assert!(matches!(err, Error::QueueTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_enqueue_after_cancel_is_shutting_down() {
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let queue = JobQueue::new(tx, token.clone(), Duration::from_secs(5));
        token.cancel();
        assert!(matches!(
            queue.enqueue(job("a")).await,
            Err(Error::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_waiting_enqueue() {
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let queue = JobQueue::new(tx, token.clone(), Duration::from_secs(30));
        queue.enqueue(job("a")).await.unwrap();

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(job("b")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_enqueue_on_closed_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let queue = JobQueue::new(tx, CancellationToken::new(), Duration::from_secs(1));
        rx.close();
        assert!(matches!(
            queue.enqueue(job("a")).await,
            Err(Error::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_deliver_drops_and_counts_when_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let metrics = Arc::new(MetricsCollector::new());
        let events = EventBus::new(8);
        let mut sub = events.subscribe();
        let sender = ResultSender::new(tx, Duration::from_millis(10), metrics.clone(), events);

        let j = job("gone");
        assert!(!sender.deliver(ProcessingResult::for_job(&j, Utc::now())).await);
        assert_eq!(metrics.snapshot().results_dropped, 1);
        assert!(matches!(
            sub.recv().await.unwrap(),
            PipelineEvent::ResultDropped { ref message_id, .. } if message_id == "gone"
        ));
    }

    #[tokio::test]
    async fn test_deliver_waits_for_space() {
        let (tx, mut rx) = mpsc::channel(1);
        let metrics = Arc::new(MetricsCollector::new());
        let sender = ResultSender::new(tx, Duration::from_secs(2), metrics.clone(), EventBus::new(8));

        let j = job("x");
        assert!(sender.deliver(ProcessingResult::for_job(&j, Utc::now())).await);
        let pending = tokio::spawn({
            let sender = sender.clone();
            let j = j.clone();
            async move { sender.deliver(ProcessingResult::for_job(&j, Utc::now())).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.recv().await.is_some());
        assert!(pending.await.unwrap());
        assert_eq!(metrics.snapshot().results_dropped, 0);
    }
}
