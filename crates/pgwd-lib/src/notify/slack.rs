//! Slack incoming webhook channel

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

use super::{
    capacity_suffix, http_client, limit_suffix, post_json, Notifier, NotifyError, REQUEST_TIMEOUT,
};
use crate::models::{AlertEvent, AlertKind};

const CHANNEL: &str = "slack";

/// Slack webhook payload (single attachment, coloured side bar)
#[derive(Debug, Clone, Serialize)]
pub struct SlackPayload {
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackAttachment {
    pub color: &'static str,
    pub text: String,
    pub fallback: String,
}

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(webhook_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        webhook_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            webhook_url: webhook_url.into(),
            client: http_client(timeout)?,
        })
    }

    /// Renders the event in health-check style: header, message, context bullets, counts
    pub fn payload(event: &AlertEvent, timestamp: &str) -> SlackPayload {
        let header = match event.kind {
            AlertKind::Test => ":white_check_mark: *pgwd* - Test notification",
            kind if kind.is_connection_failure() => ":warning: *pgwd* - Connection failure",
            _ => ":warning: *pgwd* - Threshold exceeded",
        };

        let mut text = String::new();
        let _ = writeln!(text, "{header}");
        let _ = writeln!(text, "*{}*", event.message);
        let _ = writeln!(text, "• *Time*: {timestamp}");

        let ctx = &event.context;
        for (label, value) in [
            ("Client", &ctx.client),
            ("Database", &ctx.database),
            ("Cluster", &ctx.cluster),
            ("Namespace", &ctx.namespace),
        ] {
            if !value.is_empty() {
                let _ = writeln!(text, "• *{label}*: {value}");
            }
        }

        let _ = write!(
            text,
            "• *Connections*: total={}, active={}, idle={}{} {}",
            event.stats.total,
            event.stats.active,
            event.stats.idle,
            capacity_suffix(event),
            limit_suffix(event)
        );

        let color = match event.kind {
            AlertKind::Test => "good",
            kind if kind.is_connection_failure() => "danger",
            _ => "warning",
        };

        SlackPayload {
            attachments: vec![SlackAttachment {
                color,
                text,
                fallback: event.message.clone(),
            }],
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let payload = Self::payload(event, &timestamp);
        post_json(&self.client, CHANNEL, &self.webhook_url, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_support::event;
    use mockito::Matcher;

    #[test]
    fn test_threshold_payload() {
        let payload = SlackNotifier::payload(&event(AlertKind::Total), "2024-01-01 00:00:00");
        let attachment = &payload.attachments[0];

        assert_eq!(attachment.color, "warning");
        assert!(attachment.text.starts_with(":warning: *pgwd* - Threshold exceeded"));
        assert!(attachment.text.contains("• *Client*: svc/postgres"));
        assert!(attachment.text.contains("• *Namespace*: db"));
        assert!(attachment
            .text
            .contains("total=90, active=85, idle=5 max_connections=100 (limit total=80)"));
        assert_eq!(attachment.fallback, "Total connections 90 >= 80 (total)");
    }

    #[test]
    fn test_test_and_failure_colors() {
        let test = SlackNotifier::payload(&event(AlertKind::Test), "t");
        assert_eq!(test.attachments[0].color, "good");
        assert!(test.attachments[0].text.contains("(delivery check)"));

        let failure = SlackNotifier::payload(&event(AlertKind::TooManyClients), "t");
        assert_eq!(failure.attachments[0].color, "danger");
        assert!(failure.attachments[0].text.contains("Connection failure"));
    }

    #[test]
    fn test_empty_context_is_omitted() {
        let mut ev = event(AlertKind::Idle);
        ev.context = Default::default();
        let payload = SlackNotifier::payload(&ev, "t");
        assert!(!payload.attachments[0].text.contains("*Cluster*"));
        assert!(!payload.attachments[0].text.contains("*Client*"));
    }

    #[tokio::test]
    async fn test_send_posts_attachment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(r#""color":"warning""#.to_string()))
            .with_status(200)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url())).unwrap();
        notifier.send(&event(AlertKind::Active)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_reports_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(404)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(format!("{}/hook", server.url())).unwrap();
        let err = notifier.send(&event(AlertKind::Active)).await.unwrap_err();

        assert!(matches!(err, NotifyError::Status { channel: "slack", .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_request_timeout_is_applied() {
        // Accepts the connection and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let notifier =
            SlackNotifier::with_timeout(format!("http://{addr}/hook"), Duration::from_millis(200))
                .unwrap();
        let started = std::time::Instant::now();
        let err = notifier.send(&event(AlertKind::Active)).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            NotifyError::Http { channel, source } => {
                assert_eq!(channel, "slack");
                assert!(source.is_timeout(), "expected timeout, got {source}");
            }
            other => panic!("expected HTTP error, got {other}"),
        }
        server.abort();
    }
}
