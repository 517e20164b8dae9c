//! Data model shared across the pipeline.
//!
//! A [`Message`] enters at the ingestion boundary and is wrapped in a [`Job`]
//! per attempt. Each dequeued job yields exactly one [`ProcessingResult`],
//! which the result handler turns into a sink write and a [`Notification`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// SOURCE KIND
// =============================================================================

/// Origin of a message. Selects the processor that transforms it.
///
/// The set of named kinds is closed; anything else is carried as
/// [`SourceKind::Other`] and handled by the registry's fallback processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceKind {
    /// Records consumed from a message broker topic
    Kafka,
    /// A reference to a file on disk
    File,
    /// A JSON document fetched from an HTTP API
    Api,
    /// Any unrecognized tag
    Other(String),
}

impl SourceKind {
    /// The lowercase tag for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            SourceKind::Kafka => "kafka",
            SourceKind::File => "file",
            SourceKind::Api => "api",
            SourceKind::Other(tag) => tag,
        }
    }

    /// Whether this is one of the named kinds.
    pub fn is_known(&self) -> bool {
        !matches!(self, SourceKind::Other(_))
    }
}

impl FromStr for SourceKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => SourceKind::Kafka,
            "file" => SourceKind::File,
            "api" => SourceKind::Api,
            _ => SourceKind::Other(s.trim().to_string()),
        })
    }
}

impl From<String> for SourceKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for SourceKind {
    fn from(s: &str) -> Self {
        SourceKind::from(s.to_string())
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A unit of input data. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier supplied by the source; also the sink object name.
    pub id: String,
    /// Where the message came from.
    pub source_kind: SourceKind,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// String-keyed headers carried alongside the payload.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Create a message without headers.
    pub fn new(
        id: impl Into<String>,
        source_kind: impl Into<SourceKind>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            source_kind: source_kind.into(),
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

// =============================================================================
// JOB
// =============================================================================

/// One processing attempt wrapping a message.
///
/// `id` stays the same across attempts of one message; `attempt` starts at 1
/// and grows by exactly one per retry.
#[derive(Debug, Clone)]
pub struct Job {
    /// Stable identifier of the logical unit of work (UUIDv7).
    pub id: Uuid,
    /// The wrapped message, shared by every attempt.
    pub message: Arc<Message>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// When the first attempt was submitted.
    pub created_at: DateTime<Utc>,
    /// When this attempt was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Wrap a message into its first attempt.
    pub fn new(message: Message) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            message: Arc::new(message),
            attempt: 1,
            created_at: now,
            submitted_at: now,
        }
    }

    /// Build the next attempt of this job.
    pub fn next_attempt(&self) -> Self {
        Self {
            id: self.id,
            message: Arc::clone(&self.message),
            attempt: self.attempt + 1,
            created_at: self.created_at,
            submitted_at: Utc::now(),
        }
    }

    /// Identifier of the wrapped message.
    pub fn message_id(&self) -> &str {
        &self.message.id
    }
}

// =============================================================================
// PROCESSING RESULT
// =============================================================================

/// Outcome of one attempt. Produced once, consumed once by the result handler.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub job_id: Uuid,
    pub message_id: String,
    /// Attempt this result belongs to.
    pub attempt: u32,
    pub success: bool,
    /// Error detail when `success` is false.
    pub error: Option<String>,
    /// When processing of this attempt began.
    pub processed_at: DateTime<Utc>,
    /// Wall-clock processing time of this attempt.
    pub duration: Duration,
    /// Transformed payload (empty on failure).
    pub output: Vec<u8>,
    pub metadata: HashMap<String, String>,
    /// A later attempt of the same job has been scheduled.
    pub retrying: bool,
    /// Delivered again as the terminal outcome because its retry could not be
    /// enqueued. Its processing time was counted on the first delivery.
    pub reissued: bool,
}

impl ProcessingResult {
    /// Start a result for the given job; filled in by the worker.
    pub fn for_job(job: &Job, processed_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            message_id: job.message.id.clone(),
            attempt: job.attempt,
            success: false,
            error: None,
            processed_at,
            duration: Duration::ZERO,
            output: Vec::new(),
            metadata: HashMap::new(),
            retrying: false,
            reissued: false,
        }
    }

    /// Failed with no further attempt pending.
    pub fn is_terminal_failure(&self) -> bool {
        !self.success && !self.retrying
    }
}

/// Error envelope written to the failure namespace for a terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message_id: String,
    pub job_id: Uuid,
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl FailureRecord {
    /// Envelope for a terminal failure recorded at `failed_at`.
    pub fn new(result: &ProcessingResult, failed_at: DateTime<Utc>) -> Self {
        Self {
            message_id: result.message_id.clone(),
            job_id: result.job_id,
            attempt: result.attempt,
            error: result.error.clone().unwrap_or_default(),
            failed_at,
            duration_ms: result.duration.as_millis() as u64,
            metadata: result.metadata.clone(),
        }
    }
}

// =============================================================================
// NOTIFICATION
// =============================================================================

/// Status event published to the downstream notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl Notification {
    /// Create a notification without headers.
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: HashMap::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The `status` header, if set.
    pub fn status(&self) -> Option<&str> {
        self.headers.get("status").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_parse_known() {
        assert_eq!("kafka".parse::<SourceKind>().unwrap(), SourceKind::Kafka);
        assert_eq!("FILE".parse::<SourceKind>().unwrap(), SourceKind::File);
        assert_eq!(" api ".parse::<SourceKind>().unwrap(), SourceKind::Api);
    }

    #[test]
    fn test_source_kind_parse_unknown_keeps_tag() {
        let kind: SourceKind = "sensor".into();
        assert_eq!(kind, SourceKind::Other("sensor".to_string()));
        assert_eq!(kind.to_string(), "sensor");
        assert!(!kind.is_known());
    }

    #[test]
    fn test_source_kind_serde_as_string() {
        let json = serde_json::to_string(&SourceKind::Kafka).unwrap();
        assert_eq!(json, "\"kafka\"");
        let kind: SourceKind = serde_json::from_str("\"webhook\"").unwrap();
        assert_eq!(kind, SourceKind::Other("webhook".to_string()));
    }

    #[test]
    fn test_message_builder() {
        let msg = Message::new("m-1", SourceKind::Api, b"{}".to_vec())
            .with_header("api_endpoint", "/data");
        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.size(), 2);
        assert_eq!(msg.headers.get("api_endpoint").unwrap(), "/data");
    }

    #[test]
    fn test_job_starts_at_attempt_one() {
        let job = Job::new(Message::new("m-1", "kafka", "x"));
        assert_eq!(job.attempt, 1);
        assert_eq!(job.message_id(), "m-1");
        assert_eq!(job.created_at, job.submitted_at);
    }

    #[test]
    fn test_next_attempt_keeps_identity() {
        let first = Job::new(Message::new("m-1", "kafka", "x"));
        let second = first.next_attempt();
        let third = second.next_attempt();

        assert_eq!(second.id, first.id);
        assert_eq!(third.id, first.id);
        assert_eq!(second.attempt, 2);
        assert_eq!(third.attempt, 3);
        assert!(Arc::ptr_eq(&first.message, &third.message));
        assert_eq!(third.created_at, first.created_at);
    }

    #[test]
    fn test_result_terminal_failure() {
        let job = Job::new(Message::new("m-1", "kafka", "x"));
        let mut result = ProcessingResult::for_job(&job, Utc::now());
        assert!(result.is_terminal_failure());

        result.retrying = true;
        assert!(!result.is_terminal_failure());

        result.retrying = false;
        result.success = true;
        assert!(!result.is_terminal_failure());
        assert!(!result.reissued);
    }

    #[test]
    fn test_failure_record_uses_given_failure_time() {
        let job = Job::new(Message::new("m-9", "api", "{"));
        let mut result = ProcessingResult::for_job(&job, Utc::now());
        result.error = Some("invalid JSON".to_string());
        result.duration = Duration::from_millis(42);
        result.metadata.insert("format".into(), "api".into());

        let failed_at = Utc::now();
        let record = FailureRecord::new(&result, failed_at);
        assert_eq!(record.failed_at, failed_at);
        assert_eq!(record.message_id, "m-9");
        assert_eq!(record.job_id, job.id);
        assert_eq!(record.attempt, 1);
        assert_eq!(record.error, "invalid JSON");
        assert_eq!(record.duration_ms, 42);
        assert_eq!(record.metadata.get("format").unwrap(), "api");
    }

    #[test]
    fn test_notification_status() {
        let n = Notification::new("processing-results", "m-1", Vec::new())
            .with_header("status", "success");
        assert_eq!(n.status(), Some("success"));
        assert_eq!(n.topic, "processing-results");
    }
}
