//! Outbound alert channels
//!
//! Each channel renders an [`AlertEvent`] in its own format and posts it:
//! - Slack incoming webhooks
//! - Loki push API

mod loki;
mod slack;

pub use loki::{parse_labels, LokiNotifier};
pub use slack::SlackNotifier;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::{AlertEvent, AlertKind};

/// Timeout for a single channel request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{channel} request failed: {source}")]
    Http {
        channel: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{channel} returned {status}")]
    Status {
        channel: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A destination for alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short channel name for logs
    fn name(&self) -> &'static str;

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(NotifyError::Client)
}

/// POSTs a JSON body and maps transport errors and non-2xx statuses.
pub(crate) async fn post_json<B: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    channel: &'static str,
    url: &str,
    body: &B,
) -> Result<(), NotifyError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|source| NotifyError::Http { channel, source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Status { channel, status });
    }
    Ok(())
}

/// Suffix describing why the event fired, shared by the channel renderers.
pub(crate) fn limit_suffix(event: &AlertEvent) -> String {
    match event.kind {
        AlertKind::Test => "(delivery check)".to_string(),
        AlertKind::ConnectFailure => "(connection failed)".to_string(),
        AlertKind::TooManyClients => "(too many clients, DB saturated)".to_string(),
        kind => format!("(limit {}={})", kind, event.threshold_value),
    }
}

/// ` max_connections=N` with a test marker, or empty when capacity is unknown.
pub(crate) fn capacity_suffix(event: &AlertEvent) -> String {
    if event.capacity <= 0 {
        return String::new();
    }
    if event.capacity_is_override {
        format!(" max_connections={} (test override)", event.capacity)
    } else {
        format!(" max_connections={}", event.capacity)
    }
}
