//! Message sources feeding the pipeline.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use sluice_core::{Error, Message, MessageSource, Result, SourceKind};

/// Time-ordered message id: `<prefix>-<unix nanos>-<sequence>`.
fn message_id(prefix: &str, seq: u64) -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
    format!("{prefix}-{nanos}-{seq}")
}

// =============================================================================
// PATHS
// =============================================================================

/// One `file`-kind message per path.
///
/// The payload is the path itself and the `file_path` header names it; the
/// file contents are not read.
#[derive(Debug)]
pub struct PathSource {
    pending: VecDeque<PathBuf>,
    emitted: u64,
}

impl PathSource {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            pending: paths.into_iter().collect(),
            emitted: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl MessageSource for PathSource {
    async fn fetch_batch(&mut self, max: usize, _timeout: Duration) -> Result<Option<Vec<Message>>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = max.max(1).min(self.pending.len());
        let batch = self
            .pending
            .drain(..take)
            .map(|path| {
                self.emitted += 1;
                let path = path.to_string_lossy().into_owned();
                Message::new(
                    message_id("file", self.emitted),
                    SourceKind::File,
                    path.clone().into_bytes(),
                )
                .with_header("file_path", path)
            })
            .collect();
        Ok(Some(batch))
    }

    fn name(&self) -> &str {
        "paths"
    }
}

// =============================================================================
// LINES
// =============================================================================

/// One `kafka`-kind message per non-empty line of each input file.
///
/// Files are read one at a time as earlier ones run out. Each message carries
/// `file_path` and 1-based `line` headers.
#[derive(Debug)]
pub struct LineSource {
    files: VecDeque<PathBuf>,
    buffered: VecDeque<Message>,
    emitted: u64,
}

impl LineSource {
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: files.into_iter().collect(),
            buffered: VecDeque::new(),
            emitted: 0,
        }
    }

    async fn load_next_file(&mut self) -> Result<bool> {
        let Some(path) = self.files.pop_front() else {
            return Ok(false);
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Source(format!("failed to read {}: {e}", path.display())))?;
        let shown = path.to_string_lossy().into_owned();

        let before = self.buffered.len();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.emitted += 1;
            self.buffered.push_back(
                Message::new(
                    message_id("kafka", self.emitted),
                    SourceKind::Kafka,
                    line.as_bytes().to_vec(),
                )
                .with_header("file_path", shown.clone())
                .with_header("line", (index + 1).to_string()),
            );
        }

        let loaded = self.buffered.len() - before;
        if loaded == 0 {
            warn!(file_path = %shown, "source: input file has no non-empty lines");
        } else {
            debug!(file_path = %shown, lines = loaded, "source: loaded input file");
        }
        Ok(true)
    }
}

#[async_trait]
impl MessageSource for LineSource {
    async fn fetch_batch(&mut self, max: usize, _timeout: Duration) -> Result<Option<Vec<Message>>> {
        while self.buffered.is_empty() {
            if !self.load_next_file().await? {
                return Ok(None);
            }
        }

        let take = max.max(1).min(self.buffered.len());
        Ok(Some(self.buffered.drain(..take).collect()))
    }

    fn name(&self) -> &str {
        "lines"
    }
}

// =============================================================================
// SYNTHETIC API
// =============================================================================

/// Emits one `api`-kind JSON document per poll interval. Never exhausted.
#[derive(Debug)]
pub struct SyntheticApiSource {
    ticker: Interval,
    emitted: u64,
}

impl SyntheticApiSource {
    /// The first document is available immediately.
    pub fn new(poll_interval: Duration) -> Self {
        let mut ticker = interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { ticker, emitted: 0 }
    }
}

#[async_trait]
impl MessageSource for SyntheticApiSource {
    async fn fetch_batch(&mut self, _max: usize, timeout: Duration) -> Result<Option<Vec<Message>>> {
        if tokio::time::timeout(timeout, self.ticker.tick()).await.is_err() {
            return Ok(Some(Vec::new()));
        }

        self.emitted += 1;
        let body = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "data": "sample_api_data",
        });
        let message = Message::new(
            message_id("api", self.emitted),
            SourceKind::Api,
            serde_json::to_vec(&body)?,
        )
        .with_header("api_endpoint", "/data");
        Ok(Some(vec![message]))
    }

    fn name(&self) -> &str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_path_source_batches_then_exhausts() {
        let mut source = PathSource::new(vec![
            PathBuf::from("/in/a.csv"),
            PathBuf::from("/in/b.csv"),
            PathBuf::from("/in/c.csv"),
        ]);

        let first = source.fetch_batch(2, WAIT).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].source_kind, SourceKind::File);
        assert_eq!(first[0].payload, b"/in/a.csv");
        assert_eq!(first[0].headers.get("file_path").unwrap(), "/in/a.csv");
        assert!(first[0].id.starts_with("file-"));
        assert_ne!(first[0].id, first[1].id);
        assert_eq!(source.remaining(), 1);

        assert_eq!(source.fetch_batch(2, WAIT).await.unwrap().unwrap().len(), 1);
        assert!(source.fetch_batch(2, WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_source_skips_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"a\":1}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "plain text").unwrap();

        let mut source = LineSource::new(vec![file.path().to_path_buf()]);
        let batch = source.fetch_batch(10, WAIT).await.unwrap().unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].source_kind, SourceKind::Kafka);
        assert_eq!(batch[0].payload, br#"{"a":1}"#);
        assert_eq!(batch[1].headers.get("line").unwrap(), "3");
        assert!(source.fetch_batch(10, WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_source_skips_empty_files() {
        let empty = NamedTempFile::new().unwrap();
        let mut full = NamedTempFile::new().unwrap();
        writeln!(full, "one").unwrap();

        let mut source =
            LineSource::new(vec![empty.path().to_path_buf(), full.path().to_path_buf()]);
        let batch = source.fetch_batch(10, WAIT).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"one");
    }

    #[tokio::test]
    async fn test_line_source_missing_file() {
        let mut source = LineSource::new(vec![PathBuf::from("/definitely/not/here.txt")]);
        let err = source.fetch_batch(10, WAIT).await.unwrap_err();
        assert!(matches!(err, Error::Source(_)));
    }

    #[tokio::test]
    async fn test_synthetic_api_source() {
        let mut source = SyntheticApiSource::new(Duration::from_secs(3600));

        let batch = source.fetch_batch(10, WAIT).await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].source_kind, SourceKind::Api);
        assert_eq!(batch[0].headers.get("api_endpoint").unwrap(), "/data");
        let body: serde_json::Value = serde_json::from_slice(&batch[0].payload).unwrap();
        assert_eq!(body["data"], "sample_api_data");

        // Next tick is an hour away
        let empty = source.fetch_batch(10, WAIT).await.unwrap().unwrap();
        assert!(empty.is_empty());
    }
}
