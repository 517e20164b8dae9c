//! Best-effort lifecycle events published on a broadcast channel.

use tokio::sync::broadcast;
use uuid::Uuid;

use sluice_core::SourceKind;

/// Event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Workers, result handler and reporter are running.
    PipelineStarted { workers: usize },
    /// Shutdown completed.
    PipelineStopped,
    /// A worker began an attempt.
    JobStarted {
        job_id: Uuid,
        message_id: String,
        source_kind: SourceKind,
        attempt: u32,
        worker_id: usize,
    },
    /// A failed attempt was re-enqueued as `attempt`.
    RetryScheduled {
        job_id: Uuid,
        message_id: String,
        attempt: u32,
    },
    /// The success result was written.
    JobSucceeded {
        job_id: Uuid,
        message_id: String,
        attempt: u32,
    },
    /// The terminal failure was written.
    JobFailed {
        job_id: Uuid,
        message_id: String,
        attempt: u32,
        error: String,
    },
    /// A result never reached the result handler.
    ResultDropped {
        job_id: Uuid,
        message_id: String,
        attempt: u32,
    },
}

/// Sending half shared by pipeline components.
///
/// Publishing never blocks; events sent with no subscriber are discarded and
/// lagging subscribers miss the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(sluice_core::defaults::EVENT_BUS_CAPACITY)
    }
}
