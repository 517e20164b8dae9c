//! `sluice` - runs the message pipeline against a local source.

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_core::{Error, Message, MessageSource, Notifier};
use sluice_io::{FilesystemSink, LineSource, LogNotifier, PathSource, SyntheticApiSource, WebhookNotifier};
use sluice_jobs::{PipelineConfig, PipelineManager};

use crate::config::{RunnerConfig, SourceMode};

/// Poll period while waiting for submitted work to drain.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Pause before resubmitting after the job queue stayed full.
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let pipeline_config = PipelineConfig::from_env();
    let runner = RunnerConfig::from_env().context("invalid runner configuration")?;

    let sink = FilesystemSink::new(&runner.output_dir);
    sink.validate()
        .await
        .with_context(|| format!("output directory {} is not usable", runner.output_dir.display()))?;

    let notifier: Arc<dyn Notifier> = match &runner.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone()).context("invalid NOTIFY_URL")?),
        None => Arc::new(LogNotifier),
    };

    let batch_size = pipeline_config.batch_size;
    let pipeline = PipelineManager::builder(Arc::new(sink))
        .with_config(pipeline_config)
        .with_notifier(notifier)
        .build()
        .context("invalid pipeline configuration")?;

    let shutdown = CancellationToken::new();
    pipeline.start(&shutdown).await?;
    info!(
        source = ?runner.source,
        inputs = runner.input_files.len(),
        output_dir = %runner.output_dir.display(),
        webhook = runner.notify_url.is_some(),
        "sluice started"
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let source: Box<dyn MessageSource> = match runner.source {
        SourceMode::File => Box::new(PathSource::new(runner.input_files.clone())),
        SourceMode::Lines => Box::new(LineSource::new(runner.input_files.clone())),
        SourceMode::Api => Box::new(SyntheticApiSource::new(runner.api_poll_interval)),
    };

    let fed = feed(&pipeline, source, batch_size, runner.fetch_timeout, &shutdown).await;
    if let Err(e) = &fed {
        error!(error = %e, "Source failed, stopping");
    } else if !shutdown.is_cancelled() {
        info!("Source exhausted, waiting for submitted work to finish");
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = pipeline.wait_until_idle(DRAIN_POLL) => {}
        }
    }

    pipeline.stop().await?;
    let metrics = pipeline.metrics().await;
    info!(summary = %metrics.totals, "sluice finished");

    fed.map_err(Into::into)
}

/// Pull batches from the source and submit them until it is exhausted or
/// shutdown is requested.
async fn feed(
    pipeline: &PipelineManager,
    mut source: Box<dyn MessageSource>,
    batch_size: usize,
    fetch_timeout: Duration,
    shutdown: &CancellationToken,
) -> sluice_core::Result<()> {
    loop {
        let fetched = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            fetched = source.fetch_batch(batch_size, fetch_timeout) => fetched?,
        };
        let Some(batch) = fetched else {
            info!(source = source.name(), "Source exhausted");
            return Ok(());
        };
        if batch.is_empty() {
            continue;
        }
        if !submit_all(pipeline, batch, shutdown).await {
            return Ok(());
        }
    }
}

/// Submit a batch, resubmitting the unaccepted tail while the queue is full.
///
/// Returns false once the pipeline refuses work for good.
async fn submit_all(pipeline: &PipelineManager, mut batch: Vec<Message>, shutdown: &CancellationToken) -> bool {
    loop {
        match pipeline.submit_batch(batch.clone()).await {
            Ok(()) => return true,
            Err(Error::BatchRejected {
                accepted,
                message_id,
                source,
            }) if source.is_transient() => {
                warn!(
                    accepted,
                    remaining = batch.len() - accepted,
                    message_id = %message_id,
                    error = %source,
                    "Job queue full, backing off"
                );
                batch.drain(..accepted);
                tokio::select! {
                    _ = shutdown.cancelled() => return false,
                    _ = tokio::time::sleep(BACKPRESSURE_PAUSE) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, dropped = batch.len(), "Pipeline refused batch");
                return false;
            }
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "sluice=info,sluice_jobs=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sluice=info,sluice_jobs=info,sluice_io=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sluice.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}
