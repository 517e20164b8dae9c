//! Pool worker: competitive consumer of the shared job queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sluice_core::{Error, Job, ProcessingResult, Result};

use crate::config::PipelineConfig;
use crate::events::{EventBus, PipelineEvent};
use crate::handler::{ProcessContext, ProcessOutput, ProcessorRegistry};
use crate::queue::ResultSender;
use crate::retry::RetryScheduler;

/// Receiving half of the job queue, shared by every worker.
pub type SharedJobReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Everything a worker needs besides its identity.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub jobs: SharedJobReceiver,
    pub registry: Arc<ProcessorRegistry>,
    pub config: Arc<PipelineConfig>,
    pub results: ResultSender,
    pub retries: RetryScheduler,
    pub events: EventBus,
    pub token: CancellationToken,
    pub in_flight: Arc<AtomicUsize>,
}

/// One member of the worker pool.
pub(crate) struct Worker {
    id: usize,
    shared: WorkerShared,
}

impl Worker {
    pub fn new(id: usize, shared: WorkerShared) -> Self {
        Self { id, shared }
    }

    /// Take jobs until cancelled or the queue closes.
    ///
    /// Cancellation is only observed between jobs; an attempt that has been
    /// dequeued always runs to completion and produces its result.
    pub async fn run(self) {
        debug!(subsystem = "jobs", component = "worker", worker_id = self.id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shared.token.cancelled() => None,
                job = recv_shared(&self.shared.jobs, &self.shared.in_flight) => job,
            };
            let Some(job) = next else { break };

            self.handle(job).await;
            self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        debug!(subsystem = "jobs", component = "worker", worker_id = self.id, "Worker stopped");
    }

    async fn handle(&self, job: Job) {
        let config = &self.shared.config;
        let mut result = self.execute(&job).await;
        let mut retry = None;

        if !result.success {
            if job.attempt < config.max_retries {
                let delay = config.retry_delay(job.attempt);
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    worker_id = self.id,
                    job_id = %job.id,
                    message_id = %job.message.id,
                    attempt = job.attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Attempt failed, scheduling retry"
                );
                result.retrying = true;
                retry = Some((job.next_attempt(), delay, result.clone()));
            } else {
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    worker_id = self.id,
                    job_id = %job.id,
                    message_id = %job.message.id,
                    attempt = job.attempt,
                    "Retries exhausted"
                );
            }
        }

        // The next attempt is only armed once this attempt's result is handed off
        self.shared.results.deliver(result).await;
        if let Some((next, delay, last)) = retry {
            self.shared.retries.schedule(next, delay, last);
        }
    }

    /// Run the processor for one attempt and build its result.
    async fn execute(&self, job: &Job) -> ProcessingResult {
        let message = &job.message;
        let processed_at = Utc::now();
        let started = Instant::now();

        self.shared.events.emit(PipelineEvent::JobStarted {
            job_id: job.id,
            message_id: message.id.clone(),
            source_kind: message.source_kind.clone(),
            attempt: job.attempt,
            worker_id: self.id,
        });
        debug!(
            subsystem = "jobs",
            component = "worker",
            worker_id = self.id,
            job_id = %job.id,
            message_id = %message.id,
            source_kind = %message.source_kind,
            attempt = job.attempt,
            "Processing job"
        );

        let processor = self.shared.registry.resolve(&message.source_kind);
        let ctx = ProcessContext::new(self.id, job.id, job.attempt);
        let timeout = self.shared.config.processing_timeout;
        let outcome = run_guarded(timeout, processor.process(&ctx, message)).await;

        let mut result = ProcessingResult::for_job(job, processed_at);
        result.duration = started.elapsed();
        result.metadata.insert("source".into(), message.source_kind.to_string());
        result.metadata.insert("worker_id".into(), self.id.to_string());
        result.metadata.insert("original_size".into(), message.size().to_string());
        result.metadata.insert("attempt".into(), job.attempt.to_string());
        for (key, value) in &message.headers {
            result.metadata.insert(format!("header_{key}"), value.clone());
        }

        match outcome {
            Ok(output) => {
                result.success = true;
                result.metadata.extend(output.metadata);
                result
                    .metadata
                    .insert("output_size".into(), output.payload.len().to_string());
                result.output = output.payload;
                debug!(
                    subsystem = "jobs",
                    component = "worker",
                    worker_id = self.id,
                    job_id = %job.id,
                    duration_ms = result.duration.as_millis() as u64,
                    "Attempt succeeded"
                );
            }
            Err(e) => {
                result.error = Some(e.to_string());
            }
        }
        result
    }
}

async fn recv_shared(jobs: &SharedJobReceiver, in_flight: &AtomicUsize) -> Option<Job> {
    let job = jobs.lock().await.recv().await;
    if job.is_some() {
        in_flight.fetch_add(1, Ordering::SeqCst);
    }
    job
}

/// Await a processor future with a deadline, turning panics into errors.
async fn run_guarded<F>(timeout: Duration, fut: F) -> Result<ProcessOutput>
where
    F: std::future::Future<Output = Result<ProcessOutput>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => Err(Error::Processing(format!(
            "processor panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Err(_) => Err(Error::Processing(format!(
            "processing exceeded timeout of {}ms",
            timeout.as_millis()
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
