//! Message processors and the registry that selects them by source kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use sluice_core::{Message, Result, SourceKind};

use crate::processors::{ApiProcessor, FileProcessor, GenericProcessor, KafkaProcessor};

/// Context provided to processors for one attempt.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Worker executing the attempt (1-based).
    pub worker_id: usize,
    /// Job the attempt belongs to.
    pub job_id: Uuid,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl ProcessContext {
    /// Create a new context.
    pub fn new(worker_id: usize, job_id: Uuid, attempt: u32) -> Self {
        Self {
            worker_id,
            job_id,
            attempt,
        }
    }

    /// Worker tag written into processed payloads (`worker-<id>`).
    pub fn processed_by(&self) -> String {
        format!("worker-{}", self.worker_id)
    }
}

/// Transformed payload and processor-specific metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl ProcessOutput {
    /// Create an output with no metadata.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Trait for source-specific message transforms.
///
/// Returning an error fails the attempt; the worker decides whether the job
/// is retried.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// The source kind this processor handles.
    fn kind(&self) -> SourceKind;

    /// Transform one message.
    async fn process(&self, ctx: &ProcessContext, message: &Message) -> Result<ProcessOutput>;
}

/// Processors keyed by source kind, with one fallback for unrecognized kinds.
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<SourceKind, Arc<dyn MessageProcessor>>,
    fallback: Arc<dyn MessageProcessor>,
}

impl ProcessorRegistry {
    /// Empty registry: every kind goes to the generic fallback.
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
            fallback: Arc::new(GenericProcessor),
        }
    }

    /// Registry with the built-in Kafka, File and API processors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(KafkaProcessor);
        registry.register(FileProcessor);
        registry.register(ApiProcessor);
        registry
    }

    /// Register a processor, replacing any existing one for its kind.
    pub fn register<P: MessageProcessor + 'static>(&mut self, processor: P) {
        self.register_arc(Arc::new(processor));
    }

    /// Register a shared processor, replacing any existing one for its kind.
    pub fn register_arc(&mut self, processor: Arc<dyn MessageProcessor>) {
        let kind = processor.kind();
        tracing::debug!(source_kind = %kind, "Registered message processor");
        self.processors.insert(kind, processor);
    }

    /// Replace the fallback processor.
    pub fn set_fallback<P: MessageProcessor + 'static>(&mut self, processor: P) {
        self.fallback = Arc::new(processor);
    }

    /// Processor for `kind`, or the fallback when none is registered.
    pub fn resolve(&self, kind: &SourceKind) -> Arc<dyn MessageProcessor> {
        self.processors
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Whether a dedicated processor is registered for `kind`.
    pub fn contains(&self, kind: &SourceKind) -> bool {
        self.processors.contains_key(kind)
    }

    /// Registered kinds (fallback excluded).
    pub fn kinds(&self) -> Vec<SourceKind> {
        self.processors.keys().cloned().collect()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
