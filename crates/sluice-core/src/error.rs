//! Error types for sluice.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using sluice's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sluice operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The job queue stayed full for the whole submission deadline.
    #[error("Timed out after {timeout:?} waiting for space in the job queue")]
    QueueTimeout { timeout: Duration },

    /// Submission attempted while the pipeline is stopping or stopped.
    #[error("Pipeline is shutting down")]
    ShuttingDown,

    /// `start` called on a running pipeline.
    #[error("Pipeline already started")]
    AlreadyStarted,

    /// Operation requires a running pipeline.
    #[error("Pipeline not started")]
    NotStarted,

    /// `start` called after `stop`; restart is not supported.
    #[error("Pipeline has been stopped and cannot be restarted")]
    Stopped,

    /// A batch submission stopped at the first declined message.
    #[error("Batch rejected at message {message_id} after {accepted} accepted: {source}")]
    BatchRejected {
        accepted: usize,
        message_id: String,
        #[source]
        source: Box<Error>,
    },

    /// A single processing attempt failed
    #[error("Processing error: {0}")]
    Processing(String),

    /// Durable sink write failed
    #[error("Sink error: {0}")]
    Sink(String),

    /// Downstream notification failed
    #[error("Notifier error: {0}")]
    Notifier(String),

    /// Message source failed to fetch
    #[error("Source error: {0}")]
    Source(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::QueueTimeout { .. }
            | Error::Sink(_)
            | Error::Notifier(_)
            | Error::Request(_)
            | Error::Io(_) => true,
            Error::BatchRejected { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
