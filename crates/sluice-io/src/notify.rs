//! Downstream notifier implementations.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use sluice_core::{defaults, Error, Notification, Notifier, Result};

/// Header carrying the notification topic.
pub const TOPIC_HEADER: &str = "X-Sluice-Topic";
/// Header carrying the notification key.
pub const KEY_HEADER: &str = "X-Sluice-Key";
/// Prefix for forwarded notification headers.
pub const HEADER_PREFIX: &str = "X-Sluice-";

// =============================================================================
// WEBHOOK
// =============================================================================

/// Delivers each notification as an HTTP POST.
///
/// The body is the notification payload. Topic, key and every notification
/// header travel as `X-Sluice-*` request headers. Values that are not plain
/// printable ASCII are percent-encoded. Any non-2xx response is an error,
/// which the result handler retries.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(defaults::WEBHOOK_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| Error::Config(format!("invalid webhook URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "webhook URL must be http or https: {url}"
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, notification: &Notification) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", defaults::JSON_CONTENT_TYPE)
            .header(TOPIC_HEADER, &*header_value(&notification.topic))
            .header(KEY_HEADER, &*header_value(&notification.key));
        for (name, value) in &notification.headers {
            request = request.header(
                format!("{HEADER_PREFIX}{name}"),
                &*header_value(value),
            );
        }
        request.body(notification.payload.clone())
    }
}

/// Header-safe form of a value: printable ASCII passes through, anything else
/// (newlines, control characters, non-ASCII text) is percent-encoded.
fn header_value(value: &str) -> Cow<'_, str> {
    if value.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
        Cow::Borrowed(value)
    } else {
        urlencoding::encode(value)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = self
            .request(notification)
            .send()
            .await
            .map_err(|e| Error::Notifier(format!("webhook delivery failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notifier(format!(
                "webhook returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        debug!(
            url = %self.url,
            topic = %notification.topic,
            key = %notification.key,
            status = status.as_u16(),
            "notifier: webhook delivered"
        );
        Ok(())
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// In-process fan-out to any number of subscribers.
///
/// Sending with no subscribers succeeds; lagging subscribers miss the oldest
/// notifications.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(defaults::EVENT_BUS_CAPACITY)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}

// =============================================================================
// LOG
// =============================================================================

/// Emits each notification as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            topic = %notification.topic,
            key = %notification.key,
            status = notification.status().unwrap_or("unknown"),
            attempt = notification.headers.get("attempt").map(String::as_str).unwrap_or(""),
            processing_duration = notification
                .headers
                .get("processing_duration")
                .map(String::as_str)
                .unwrap_or(""),
            payload_size = notification.payload.len(),
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification::new("processing-results", "m-1", b"{}".to_vec())
            .with_header("status", "success")
    }

    #[test]
    fn test_webhook_rejects_bad_urls() {
        assert!(matches!(
            WebhookNotifier::new("not a url"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            WebhookNotifier::new("ftp://example.com/hook"),
            Err(Error::Config(_))
        ));
        let notifier = WebhookNotifier::new("http://localhost:9/hook").unwrap();
        assert_eq!(notifier.url(), "http://localhost:9/hook");
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_notifier_error() {
        // Port 9 (discard) is closed on test hosts
        let notifier =
            WebhookNotifier::with_timeout("http://127.0.0.1:9/hook", Duration::from_millis(500))
                .unwrap();
        let err = notifier.send(&notification()).await.unwrap_err();
        assert!(matches!(err, Error::Notifier(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_header_value_passes_printable_ascii() {
        assert_eq!(header_value("2024-05-01T12:00:00+00:00"), "2024-05-01T12:00:00+00:00");
        assert_eq!(header_value("bad payload"), "bad payload");
        assert!(matches!(header_value("success"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_header_value_encodes_multiline_and_unicode() {
        let encoded = header_value("Processing error: caf\u{e9} line1\nline2\t!");
        assert_eq!(
            encoded,
            "Processing%20error%3A%20caf%C3%A9%20line1%0Aline2%09%21"
        );
        assert!(encoded.bytes().all(|b| b.is_ascii_graphic()));
    }

    #[test]
    fn test_webhook_request_accepts_any_error_text() {
        let notifier = WebhookNotifier::new("http://localhost:9/hook").unwrap();
        let failed = Notification::new("processing-results", "m-\u{e9}", b"x".to_vec())
            .with_header("status", "failed")
            .with_header("error", "Processing error: caf\u{e9} line1\nline2\u{7}");

        let request = notifier.request(&failed).build().unwrap();
        let headers = request.headers();
        assert_eq!(headers.get("x-sluice-status").unwrap(), "failed");
        assert_eq!(headers.get("x-sluice-key").unwrap(), "m-%C3%A9");
        assert_eq!(
            headers.get("x-sluice-error").unwrap(),
            "Processing%20error%3A%20caf%C3%A9%20line1%0Aline2%07"
        );
    }

    #[tokio::test]
    async fn test_broadcast_fans_out() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.send(&notification()).await.unwrap();
        assert_eq!(a.recv().await.unwrap().key, "m-1");
        assert_eq!(b.recv().await.unwrap().status(), Some("success"));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_succeeds() {
        let notifier = BroadcastNotifier::default();
        notifier.send(&notification()).await.unwrap();
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        LogNotifier.send(&notification()).await.unwrap();
    }
}
