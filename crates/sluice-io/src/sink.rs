//! Durable sink implementations.
//!
//! [`FilesystemSink`] stores each object as a file below a base directory;
//! [`MemorySink`] keeps objects in a map for tests and dry runs. Both
//! overwrite on conflict.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use sluice_core::{DurableSink, Error, Result};

/// Check that a key is a relative path without `.` or `..` segments.
fn validate_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty() {
        return Err(Error::InvalidInput("sink key must not be empty".into()));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::InvalidInput(format!(
            "sink key must be a relative path without '.' or '..' segments: {key}"
        )));
    }
    Ok(path)
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Filesystem sink.
///
/// Object `key` is written to `{base_path}/{key}`; parent directories are
/// created on demand. Writes go to a temporary sibling first and are renamed
/// into place, so readers never observe a partial object.
#[derive(Debug, Clone)]
pub struct FilesystemSink {
    base_path: PathBuf,
}

impl FilesystemSink {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.base_path.join(validate_key(key)?))
    }

    /// Read an object back.
    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        Ok(fs::read(full_path).await?)
    }

    /// Write, read back and delete a probe object.
    ///
    /// Run at start-up so permission problems or a missing mount surface
    /// before the first result is lost.
    pub async fn validate(&self) -> Result<()> {
        let probe_key = ".health-check/probe.json";
        let probe = br#"{"probe":true}"#;

        self.put(probe_key, probe, "application/json").await?;
        let read_back = self.read(probe_key).await?;
        if read_back != probe {
            return Err(Error::Sink(format!(
                "health check read back {} bytes, expected {}",
                read_back.len(),
                probe.len()
            )));
        }

        let probe_path = self.full_path(probe_key)?;
        fs::remove_file(&probe_path).await?;
        if let Some(dir) = probe_path.parent() {
            let _ = fs::remove_dir(dir).await;
        }

        debug!(base_path = %self.base_path.display(), "sink: health check passed");
        Ok(())
    }
}

#[async_trait]
impl DurableSink for FilesystemSink {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        let full_path = self.full_path(key)?;
        debug!(sink_key = %key, full_path = %full_path.display(), size = data.len(), content_type, "sink: put");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "sink: create_dir_all failed");
                e
            })?;
        }

        // Unique temp name so concurrent writers of one key never share a file
        let temp_path = full_path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "sink: File::create failed");
            e
        })?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "sink: rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// In-memory sink keyed by object key.
#[derive(Debug, Default)]
pub struct MemorySink {
    objects: RwLock<BTreeMap<String, (Vec<u8>, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read_map().get(key).map(|(data, _)| data.clone())
    }

    /// Content type recorded for `key`.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.read_map().get(key).map(|(_, ct)| ct.clone())
    }

    /// All keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.read_map().keys().cloned().collect()
    }

    /// Keys starting with `prefix`, in lexical order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.read_map()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, (Vec<u8>, String)>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DurableSink for MemorySink {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        validate_key(key)?;
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("processed/2024/01/01/00/a.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("processed/../../escape").is_err());
        assert!(validate_key("./here").is_err());
    }

    #[tokio::test]
    async fn test_filesystem_put_creates_parents() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path());

        sink.put("processed/2024/01/01/00/m-1.json", b"{}", "application/json")
            .await
            .unwrap();
        let on_disk = std::fs::read(dir.path().join("processed/2024/01/01/00/m-1.json")).unwrap();
        assert_eq!(on_disk, b"{}");
    }

    #[tokio::test]
    async fn test_filesystem_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path());

        sink.put("k/v.json", b"first", "application/json").await.unwrap();
        sink.put("k/v.json", b"second", "application/json").await.unwrap();
        assert_eq!(sink.read("k/v.json").await.unwrap(), b"second");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("k")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_filesystem_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path());
        let err = sink.put("../outside.json", b"x", "application/json").await;
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_filesystem_validate_cleans_up() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path().join("out"));
        sink.validate().await.unwrap();
        assert!(!dir.path().join("out/.health-check/probe.json").exists());
    }

    #[tokio::test]
    async fn test_filesystem_read_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let sink = FilesystemSink::new(dir.path());
        assert!(matches!(sink.read("missing.json").await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_memory_sink_overwrite_semantics() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.put("failed/a.json", b"1", "application/json").await.unwrap();
        sink.put("processed/a.json", b"2", "text/plain").await.unwrap();
        sink.put("processed/a.json", b"3", "application/json").await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.get("processed/a.json").unwrap(), b"3");
        assert_eq!(sink.content_type("processed/a.json").unwrap(), "application/json");
        assert_eq!(sink.keys(), vec!["failed/a.json", "processed/a.json"]);
        assert_eq!(sink.keys_with_prefix("failed/"), vec!["failed/a.json"]);
        assert!(sink.get("missing").is_none());
    }
}
