//! Runner settings read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sluice_core::{defaults, Error, Result};

/// Where input messages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Each input path becomes one file message.
    File,
    /// Each non-empty line of each input file becomes one broker-style message.
    Lines,
    /// Synthetic API documents until interrupted.
    Api,
}

impl FromStr for SourceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "files" => Ok(SourceMode::File),
            "lines" | "kafka" => Ok(SourceMode::Lines),
            "api" => Ok(SourceMode::Api),
            other => Err(Error::Config(format!(
                "unknown SOURCE '{other}' (expected file, lines or api)"
            ))),
        }
    }
}

/// Settings for the `sluice` binary.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub source: SourceMode,
    pub input_files: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub notify_url: Option<String>,
    pub api_poll_interval: Duration,
    pub fetch_timeout: Duration,
}

impl RunnerConfig {
    /// Read settings from environment variables.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SOURCE` | `file` | `file`, `lines` or `api` |
    /// | `INPUT_FILES` | (none) | Comma-separated paths, required for `file` and `lines` |
    /// | `OUTPUT_DIR` | `./output` | Base directory of the filesystem sink |
    /// | `NOTIFY_URL` | (none) | Webhook for notifications; logs them when unset |
    /// | `API_POLL_INTERVAL_MS` | `10000` | Interval between synthetic API documents |
    /// | `SOURCE_FETCH_TIMEOUT_MS` | `1000` | Wait per source fetch |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let source = get("SOURCE")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(SourceMode::File);

        let input_files = get("INPUT_FILES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let output_dir = get("OUTPUT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        let notify_url = get("NOTIFY_URL").filter(|v| !v.trim().is_empty());

        let millis = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(default))
        };

        let config = Self {
            source,
            input_files,
            output_dir,
            notify_url,
            api_poll_interval: millis("API_POLL_INTERVAL_MS", defaults::API_POLL_INTERVAL_MS),
            fetch_timeout: millis("SOURCE_FETCH_TIMEOUT_MS", defaults::SOURCE_FETCH_TIMEOUT_MS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(self.source, SourceMode::File | SourceMode::Lines) && self.input_files.is_empty()
        {
            return Err(Error::Config(
                "INPUT_FILES is required when SOURCE is file or lines".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_source_mode_parse() {
        assert_eq!("FILE".parse::<SourceMode>().unwrap(), SourceMode::File);
        assert_eq!("lines".parse::<SourceMode>().unwrap(), SourceMode::Lines);
        assert_eq!("kafka".parse::<SourceMode>().unwrap(), SourceMode::Lines);
        assert_eq!(" api ".parse::<SourceMode>().unwrap(), SourceMode::Api);
        assert!(matches!("s3".parse::<SourceMode>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_api_mode_defaults() {
        let config = RunnerConfig::from_lookup(lookup(&[("SOURCE", "api")])).unwrap();
        assert_eq!(config.source, SourceMode::Api);
        assert!(config.input_files.is_empty());
        assert_eq!(config.output_dir, PathBuf::from("./output"));
        assert!(config.notify_url.is_none());
        assert_eq!(config.api_poll_interval, Duration::from_secs(10));
        assert_eq!(config.fetch_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_input_files_split_and_trimmed() {
        let config = RunnerConfig::from_lookup(lookup(&[
            ("INPUT_FILES", " a.txt, ,b.txt "),
            ("OUTPUT_DIR", "/tmp/out"),
            ("NOTIFY_URL", "http://hooks.local/sluice"),
            ("API_POLL_INTERVAL_MS", "nope"),
        ]))
        .unwrap();
        assert_eq!(config.source, SourceMode::File);
        assert_eq!(
            config.input_files,
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]
        );
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.notify_url.as_deref(), Some("http://hooks.local/sluice"));
        assert_eq!(config.api_poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_file_mode_requires_inputs() {
        let err = RunnerConfig::from_lookup(lookup(&[("SOURCE", "lines")])).unwrap_err();
        assert!(err.to_string().contains("INPUT_FILES"));
    }

    #[test]
    fn test_unknown_source_rejected() {
        assert!(RunnerConfig::from_lookup(lookup(&[("SOURCE", "ftp")])).is_err());
    }
}
