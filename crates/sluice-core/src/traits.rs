//! Collaborator traits.
//!
//! The pipeline core only talks to the outside world through these traits,
//! which keeps concrete broker and object-store clients pluggable and lets
//! tests substitute in-memory implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Message, Notification};

// =============================================================================
// DURABLE SINK
// =============================================================================

/// Object store for results and failure records.
///
/// `put` overwrites any existing object at `key`, which is what makes
/// repeated delivery of the same message idempotent at the storage layer.
/// Implementations must be safe for concurrent callers.
#[async_trait]
pub trait DurableSink: Send + Sync {
    /// Store `data` under `key`, replacing any previous object.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<()>;
}

#[async_trait]
impl<T: DurableSink + ?Sized> DurableSink for Arc<T> {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        (**self).put(key, data, content_type).await
    }
}

// =============================================================================
// NOTIFIER
// =============================================================================

/// Publish endpoint for status events. Fire-and-forget from the core's view.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one notification.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn send(&self, notification: &Notification) -> Result<()> {
        (**self).send(notification).await
    }
}

// =============================================================================
// MESSAGE SOURCE
// =============================================================================

/// Pull-style provider of input messages.
#[async_trait]
pub trait MessageSource: Send {
    /// Fetch up to `max` messages, waiting at most `timeout`.
    ///
    /// Returns `Ok(Some(batch))` (possibly empty when the timeout elapsed with
    /// nothing available) or `Ok(None)` once the source is exhausted.
    async fn fetch_batch(&mut self, max: usize, timeout: Duration)
        -> Result<Option<Vec<Message>>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}
