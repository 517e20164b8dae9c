//! # sluice-jobs
//!
//! Concurrent message pipeline for sluice.
//!
//! This crate provides:
//! - A bounded job queue with submit deadlines and backpressure
//! - A fixed pool of workers consuming the queue competitively
//! - Processors selected by source kind, with a generic fallback
//! - Linear-backoff retries on cancellable timer tasks
//! - A single result handler writing to a durable sink and notifier
//! - Metrics and lifecycle events via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sluice_jobs::{Message, PipelineConfig, PipelineManager, SourceKind};
//! use sluice_io::MemorySink;
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = PipelineManager::builder(Arc::new(MemorySink::new()))
//!     .with_config(PipelineConfig::from_env())
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! pipeline.start(&shutdown).await?;
//!
//! let mut events = pipeline.events();
//! pipeline
//!     .submit_message(Message::new("order-1", SourceKind::Api, br#"{"id":1}"#.to_vec()))
//!     .await?;
//! println!("{:?}", events.recv().await?);
//!
//! pipeline.stop().await?;
//! println!("{}", pipeline.metrics().await.totals);
//! ```

pub mod config;
pub mod events;
pub mod handler;
pub mod manager;
pub mod metrics;
pub mod processors;
pub mod queue;
pub mod results;
pub mod retry;
mod worker;

// Re-export core types
pub use sluice_core::*;

pub use config::{IoRetryPolicy, PipelineConfig};
pub use events::{EventBus, PipelineEvent};
pub use handler::{MessageProcessor, ProcessContext, ProcessOutput, ProcessorRegistry};
pub use manager::{PipelineBuilder, PipelineManager, PipelineMetrics};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use processors::{ApiProcessor, FileProcessor, GenericProcessor, KafkaProcessor};
pub use results::result_key;
