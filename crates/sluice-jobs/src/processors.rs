//! Built-in processors for the named source kinds plus the generic fallback.
//!
//! Each processor wraps the input in a JSON document stamped with the
//! processing time, the worker tag and the message id.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value as JsonValue};

use sluice_core::{Error, Message, Result, SourceKind};

use crate::handler::{MessageProcessor, ProcessContext, ProcessOutput};

/// Tag reported by the fallback processor.
pub const GENERIC_KIND: &str = "generic";

fn encode(document: &JsonValue) -> Result<Vec<u8>> {
    serde_json::to_vec(document)
        .map_err(|e| Error::Processing(format!("failed to encode processed payload: {e}")))
}

fn parse_object(payload: &[u8]) -> std::result::Result<Map<String, JsonValue>, String> {
    match serde_json::from_slice::<JsonValue>(payload) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_type(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

// =============================================================================
// KAFKA
// =============================================================================

/// Broker records: JSON objects are validated and embedded, anything else is
/// carried as text.
pub struct KafkaProcessor;

#[async_trait]
impl MessageProcessor for KafkaProcessor {
    fn kind(&self) -> SourceKind {
        SourceKind::Kafka
    }

    async fn process(&self, ctx: &ProcessContext, message: &Message) -> Result<ProcessOutput> {
        let text = String::from_utf8_lossy(&message.payload);
        let (original, format, json_keys) = if text.trim_start().starts_with('{') {
            let object = parse_object(&message.payload)
                .map_err(|e| Error::Processing(format!("invalid JSON in Kafka message: {e}")))?;
            let keys = object.len();
            (JsonValue::Object(object), "json", Some(keys))
        } else {
            (JsonValue::String(text.into_owned()), "text", None)
        };

        let payload = encode(&json!({
            "original_data": original,
            "processed_at": Utc::now().to_rfc3339(),
            "processed_by": ctx.processed_by(),
            "message_id": message.id,
            "source": SourceKind::Kafka.as_str(),
        }))?;

        let mut output = ProcessOutput::new(payload).with_metadata("format", format);
        if let Some(keys) = json_keys {
            output = output.with_metadata("json_keys", keys);
        }
        tracing::debug!(message_id = %message.id, format, "Processed Kafka message");
        Ok(output)
    }
}

// =============================================================================
// FILE
// =============================================================================

/// File references: the payload is the path of the file to record.
pub struct FileProcessor;

#[async_trait]
impl MessageProcessor for FileProcessor {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    async fn process(&self, ctx: &ProcessContext, message: &Message) -> Result<ProcessOutput> {
        let path = std::str::from_utf8(&message.payload)
            .map_err(|e| Error::Processing(format!("file path is not valid UTF-8: {e}")))?
            .trim();
        if path.is_empty() {
            return Err(Error::Processing("file message carries an empty path".into()));
        }

        let payload = encode(&json!({
            "file_path": path,
            "processed_at": Utc::now().to_rfc3339(),
            "processed_by": ctx.processed_by(),
            "message_id": message.id,
            "source": SourceKind::File.as_str(),
            "status": "processed",
        }))?;

        tracing::debug!(message_id = %message.id, file_path = path, "Processed file message");
        Ok(ProcessOutput::new(payload)
            .with_metadata("file_path", path)
            .with_metadata("format", "file"))
    }
}

// =============================================================================
// API
// =============================================================================

/// API documents: the payload must be a JSON object, which gets enriched.
pub struct ApiProcessor;

#[async_trait]
impl MessageProcessor for ApiProcessor {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn process(&self, ctx: &ProcessContext, message: &Message) -> Result<ProcessOutput> {
        let api_data = parse_object(&message.payload)
            .map_err(|e| Error::Processing(format!("invalid JSON in API message: {e}")))?;
        let now = Utc::now();

        let payload = encode(&json!({
            "api_data": api_data,
            "processed_at": now.to_rfc3339(),
            "processed_by": ctx.processed_by(),
            "message_id": message.id,
            "source": SourceKind::Api.as_str(),
            "enrichment": {
                "processing_timestamp": now.timestamp(),
                "worker_id": ctx.worker_id,
                "data_size": message.size(),
            },
        }))?;

        tracing::debug!(message_id = %message.id, "Processed API message");
        Ok(ProcessOutput::new(payload).with_metadata("format", "api"))
    }
}

// =============================================================================
// GENERIC (fallback)
// =============================================================================

/// Fallback for unrecognized kinds: wraps the payload as lossy UTF-8 text.
pub struct GenericProcessor;

#[async_trait]
impl MessageProcessor for GenericProcessor {
    fn kind(&self) -> SourceKind {
        SourceKind::Other(GENERIC_KIND.to_string())
    }

    async fn process(&self, ctx: &ProcessContext, message: &Message) -> Result<ProcessOutput> {
        let payload = encode(&json!({
            "data": String::from_utf8_lossy(&message.payload),
            "processed_at": Utc::now().to_rfc3339(),
            "processed_by": ctx.processed_by(),
            "message_id": message.id,
            "source": message.source_kind.as_str(),
            "data_length": message.size(),
        }))?;

        tracing::debug!(message_id = %message.id, source_kind = %message.source_kind, "Processed generic message");
        Ok(ProcessOutput::new(payload).with_metadata("format", "generic"))
    }
}
