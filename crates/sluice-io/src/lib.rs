//! # sluice-io
//!
//! Collaborators for the sluice pipeline.
//!
//! This crate provides:
//! - Durable sinks: filesystem (atomic writes) and in-memory
//! - Notifiers: HTTP webhook, in-process broadcast, structured log
//! - Message sources: file paths, input file lines, synthetic API documents

pub mod notify;
pub mod sink;
pub mod source;

pub use notify::{BroadcastNotifier, LogNotifier, WebhookNotifier};
pub use sink::{FilesystemSink, MemorySink};
pub use source::{LineSource, PathSource, SyntheticApiSource};
