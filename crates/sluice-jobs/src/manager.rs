//! Pipeline manager: lifecycle, submission and the shared queues.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use sluice_core::{DurableSink, Error, Job, Message, Notifier, Result};

use crate::config::PipelineConfig;
use crate::events::{EventBus, PipelineEvent};
use crate::handler::{MessageProcessor, ProcessorRegistry};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::queue::{JobQueue, ResultSender};
use crate::results::ResultHandler;
use crate::retry::RetryScheduler;
use crate::worker::{SharedJobReceiver, Worker, WorkerShared};

/// Metrics snapshot merged with live queue and pool state.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    #[serde(flatten)]
    pub totals: MetricsSnapshot,
    /// Jobs waiting in the job queue.
    pub queue_size: usize,
    pub queue_capacity: usize,
    /// Size of the worker pool while running, zero otherwise.
    pub active_workers: usize,
    /// Attempts currently being processed.
    pub in_flight: usize,
    /// Retry timers not yet fired.
    pub pending_retries: usize,
    pub started: bool,
}

impl PipelineMetrics {
    /// Nothing queued, processing or waiting to be retried.
    pub fn is_idle(&self) -> bool {
        self.queue_size == 0 && self.in_flight == 0 && self.pending_retries == 0
    }
}

/// Handles owned by a running pipeline.
struct Runtime {
    token: CancellationToken,
    queue: JobQueue,
    jobs: SharedJobReceiver,
    retries: RetryScheduler,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
    result_handler: JoinHandle<()>,
    reporter: JoinHandle<()>,
}

enum Lifecycle {
    NotStarted,
    Running(Box<Runtime>),
    Stopped,
}

/// Concurrent message pipeline.
///
/// Messages submitted while running are wrapped into jobs and processed by a
/// fixed pool of workers. Results flow to a single result handler that
/// writes them to the [`DurableSink`] and announces them on the [`Notifier`].
///
/// `NotStarted → Running → Stopped`; a stopped pipeline cannot be restarted.
pub struct PipelineManager {
    config: Arc<PipelineConfig>,
    registry: Arc<ProcessorRegistry>,
    sink: Arc<dyn DurableSink>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Arc<MetricsCollector>,
    events: EventBus,
    state: RwLock<Lifecycle>,
}

impl PipelineManager {
    /// Pipeline with default config and the built-in processors.
    pub fn new(sink: Arc<dyn DurableSink>) -> Self {
        Self {
            config: Arc::new(PipelineConfig::default()),
            registry: Arc::new(ProcessorRegistry::with_builtins()),
            sink,
            notifier: None,
            metrics: Arc::new(MetricsCollector::new()),
            events: EventBus::default(),
            state: RwLock::new(Lifecycle::NotStarted),
        }
    }

    pub fn builder(sink: Arc<dyn DurableSink>) -> PipelineBuilder {
        PipelineBuilder::new(sink)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawn the worker pool, the result handler and the metrics reporter.
    ///
    /// The pipeline stops taking work when `parent` is cancelled; `stop` must
    /// still be called to wait for in-flight work.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut state = self.state.write().await;
        match &*state {
            Lifecycle::Running(_) => return Err(Error::AlreadyStarted),
            Lifecycle::Stopped => return Err(Error::Stopped),
            Lifecycle::NotStarted => {}
        }

        let config = &self.config;
        let token = parent.child_token();
        let tracker = TaskTracker::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let (job_tx, job_rx) = mpsc::channel(config.job_queue_capacity());
        let (result_tx, result_rx) = mpsc::channel(config.result_queue_capacity());

        let queue = JobQueue::new(job_tx, token.clone(), config.submit_timeout);
        let results = ResultSender::new(
            result_tx,
            config.result_send_timeout,
            Arc::clone(&self.metrics),
            self.events.clone(),
        );
        let retries = RetryScheduler::new(
            queue.clone(),
            results.clone(),
            tracker.clone(),
            token.clone(),
            Arc::clone(&self.metrics),
            self.events.clone(),
        );
        let jobs: SharedJobReceiver = Arc::new(Mutex::new(job_rx));

        let shared = WorkerShared {
            jobs: Arc::clone(&jobs),
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
            results,
            retries: retries.clone(),
            events: self.events.clone(),
            token: token.clone(),
            in_flight: Arc::clone(&in_flight),
        };
        let workers = (1..=config.worker_count)
            .map(|id| tokio::spawn(Worker::new(id, shared.clone()).run()))
            .collect();
        drop(shared);

        let handler = ResultHandler::new(
            Arc::clone(&self.sink),
            self.notifier.clone(),
            config,
            Arc::clone(&self.metrics),
            self.events.clone(),
        );
        let result_handler = tokio::spawn(handler.run(result_rx, token.clone()));

        let reporter = tokio::spawn(report_metrics(
            Arc::clone(&self.metrics),
            config.metrics_log_interval,
            token.clone(),
        ));

        *state = Lifecycle::Running(Box::new(Runtime {
            token,
            queue,
            jobs,
            retries,
            tracker,
            in_flight,
            workers,
            result_handler,
            reporter,
        }));

        info!(
            subsystem = "jobs",
            component = "manager",
            workers = config.worker_count,
            batch_size = config.batch_size,
            queue_capacity = config.job_queue_capacity(),
            max_retries = config.max_retries,
            "Pipeline started"
        );
        self.events.emit(PipelineEvent::PipelineStarted {
            workers: config.worker_count,
        });
        Ok(())
    }

    /// Stop accepting work and wait for everything in flight.
    ///
    /// Returns after dequeued attempts have finished and their results have
    /// been written. Pending retries are cancelled; jobs never dequeued are
    /// discarded and counted in `jobs_abandoned`. A no-op if never started.
    pub async fn stop(&self) -> Result<()> {
        let runtime = {
            let mut state = self.state.write().await;
            match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Running(runtime) => runtime,
                Lifecycle::NotStarted => {
                    *state = Lifecycle::NotStarted;
                    return Ok(());
                }
                Lifecycle::Stopped => return Ok(()),
            }
        };
        let Runtime {
            token,
            queue,
            jobs,
            retries,
            tracker,
            in_flight: _,
            workers,
            result_handler,
            reporter,
        } = *runtime;

        info!(subsystem = "jobs", component = "manager", "Stopping pipeline");
        token.cancel();
        drop(queue);

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                error!(subsystem = "jobs", component = "manager", error = %e, "Worker task failed");
            }
        }

        tracker.close();
        tracker.wait().await;

        let abandoned = {
            let mut rx = jobs.lock().await;
            rx.close();
            let mut count = 0u64;
            while rx.try_recv().is_ok() {
                count += 1;
            }
            count
        };
        if abandoned > 0 {
            self.metrics.record_jobs_abandoned(abandoned);
            warn!(
                subsystem = "jobs",
                component = "manager",
                abandoned,
                "Discarded jobs that were never dequeued"
            );
        }

        // Last result sender goes with the scheduler; the handler then drains and exits.
        drop(retries);
        if let Err(e) = result_handler.await {
            error!(subsystem = "jobs", component = "manager", error = %e, "Result handler task failed");
        }
        if let Err(e) = reporter.await {
            error!(subsystem = "jobs", component = "manager", error = %e, "Metrics reporter task failed");
        }

        info!(
            subsystem = "jobs",
            component = "manager",
            summary = %self.metrics.snapshot(),
            "Pipeline stopped"
        );
        self.events.emit(PipelineEvent::PipelineStopped);
        Ok(())
    }

    /// Submit one message as a first attempt.
    pub async fn submit_message(&self, message: Message) -> Result<()> {
        let queue = self.running_queue().await?;
        self.enqueue(&queue, message).await
    }

    /// Submit messages in order, stopping at the first one declined.
    ///
    /// Messages accepted before the failure stay submitted.
    pub async fn submit_batch(&self, messages: Vec<Message>) -> Result<()> {
        let queue = self.running_queue().await?;
        let total = messages.len();

        for (accepted, message) in messages.into_iter().enumerate() {
            let message_id = message.id.clone();
            if let Err(source) = self.enqueue(&queue, message).await {
                warn!(
                    subsystem = "jobs",
                    component = "manager",
                    batch_size = total,
                    accepted,
                    message_id = %message_id,
                    error = %source,
                    "Batch submission stopped"
                );
                return Err(Error::BatchRejected {
                    accepted,
                    message_id,
                    source: Box::new(source),
                });
            }
        }

        debug!(subsystem = "jobs", component = "manager", batch_size = total, "Batch submitted");
        Ok(())
    }

    async fn running_queue(&self) -> Result<JobQueue> {
        match &*self.state.read().await {
            Lifecycle::Running(runtime) => Ok(runtime.queue.clone()),
            Lifecycle::NotStarted => Err(Error::NotStarted),
            Lifecycle::Stopped => Err(Error::ShuttingDown),
        }
    }

    async fn enqueue(&self, queue: &JobQueue, message: Message) -> Result<()> {
        let job = Job::new(message);
        let job_id = job.id;
        queue.enqueue(job).await?;
        self.metrics.record_job_submitted();
        debug!(subsystem = "jobs", component = "manager", %job_id, "Job submitted");
        Ok(())
    }

    /// Point-in-time metrics with live queue depth and pool size.
    pub async fn metrics(&self) -> PipelineMetrics {
        let totals = self.metrics.snapshot();
        match &*self.state.read().await {
            Lifecycle::Running(runtime) => PipelineMetrics {
                totals,
                queue_size: runtime.queue.len(),
                queue_capacity: runtime.queue.capacity(),
                active_workers: runtime.workers.len(),
                in_flight: runtime.in_flight.load(Ordering::SeqCst),
                pending_retries: runtime.retries.pending(),
                started: true,
            },
            _ => PipelineMetrics {
                totals,
                queue_size: 0,
                queue_capacity: self.config.job_queue_capacity(),
                active_workers: 0,
                in_flight: 0,
                pending_retries: 0,
                started: false,
            },
        }
    }

    /// Shared collector, for callers that want to reset periods.
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Subscribe to pipeline events.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Wait until nothing is queued, processing or pending retry.
    ///
    /// Idleness must be observed on two consecutive polls, which covers the
    /// moment between a job leaving the queue and its worker picking it up.
    pub async fn wait_until_idle(&self, poll: Duration) {
        let mut idle_polls = 0;
        while idle_polls < 2 {
            tokio::time::sleep(poll).await;
            if self.metrics().await.is_idle() {
                idle_polls += 1;
            } else {
                idle_polls = 0;
            }
        }
    }
}

async fn report_metrics(metrics: Arc<MetricsCollector>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let snap = metrics.snapshot();
                info!(
                    subsystem = "jobs",
                    component = "metrics",
                    jobs_submitted = snap.jobs_submitted,
                    jobs_succeeded = snap.jobs_succeeded,
                    jobs_failed = snap.jobs_failed,
                    jobs_retried = snap.jobs_retried,
                    success_rate = snap.success_rate_percent,
                    throughput = snap.throughput_per_sec,
                    avg_processing_ms = snap.avg_processing_ms,
                    uptime_secs = snap.uptime_secs,
                    "Pipeline metrics"
                );
            }
        }
    }
}

/// Builder for a [`PipelineManager`].
pub struct PipelineBuilder {
    sink: Arc<dyn DurableSink>,
    notifier: Option<Arc<dyn Notifier>>,
    config: PipelineConfig,
    registry: ProcessorRegistry,
}

impl PipelineBuilder {
    pub fn new(sink: Arc<dyn DurableSink>) -> Self {
        Self {
            sink,
            notifier: None,
            config: PipelineConfig::default(),
            registry: ProcessorRegistry::with_builtins(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Add or replace the processor for its source kind.
    pub fn with_processor<P: MessageProcessor + 'static>(mut self, processor: P) -> Self {
        self.registry.register(processor);
        self
    }

    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Validate the configuration and build the manager.
    pub fn build(self) -> Result<PipelineManager> {
        self.config.validate()?;
        Ok(PipelineManager {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry),
            sink: self.sink,
            notifier: self.notifier,
            metrics: Arc::new(MetricsCollector::new()),
            events: EventBus::default(),
            state: RwLock::new(Lifecycle::NotStarted),
        })
    }
}
