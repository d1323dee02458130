use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook rejected message: {0}")]
    Rejected(reqwest::StatusCode),
}

/// Final delivery step behind the notification channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError>;
}

/// Slack-compatible incoming webhook.
pub struct WebhookSink {
    http: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
    mrkdwn: bool,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookMessage { text, mrkdwn: true })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(response.status()))
        }
    }
}

/// Best-effort, fire-and-forget notifications. Every message is logged; it is
/// forwarded to the sink only when it is an announcement or progress
/// forwarding is on. A full channel drops the message.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<String>>,
    forward_progress: bool,
}

impl Notifier {
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        forward_progress: bool,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(err) = sink.deliver(&text).await {
                    tracing::warn!(error = %err, "notification delivery failed");
                }
            }
        });
        (
            Self {
                tx: Some(tx),
                forward_progress,
            },
            handle,
        )
    }

    /// Logs only.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            forward_progress: false,
        }
    }

    pub fn progress(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{text}");
        if self.forward_progress {
            self.enqueue(text);
        }
    }

    pub fn announce(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{text}");
        self.enqueue(text);
    }

    fn enqueue(&self, text: String) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(text) {
            tracing::debug!(error = %err, "notification dropped");
        }
    }
}
