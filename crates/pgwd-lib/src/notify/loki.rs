//! Loki push API channel

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::{
    capacity_suffix, http_client, limit_suffix, post_json, Notifier, NotifyError, REQUEST_TIMEOUT,
};
use crate::models::AlertEvent;

const CHANNEL: &str = "loki";
const DEFAULT_JOB: &str = "pgwd";

/// Body of `POST /loki/api/v1/push`
#[derive(Debug, Serialize)]
pub struct PushBody {
    pub streams: Vec<Stream>,
}

#[derive(Debug, Serialize)]
pub struct Stream {
    pub stream: BTreeMap<String, String>,
    /// `[nanosecond_timestamp, line]` pairs
    pub values: Vec<[String; 2]>,
}

pub struct LokiNotifier {
    url: String,
    labels: HashMap<String, String>,
    client: reqwest::Client,
}

impl LokiNotifier {
    pub fn new(
        url: impl Into<String>,
        labels: HashMap<String, String>,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            url: url.into(),
            labels,
            client: http_client(REQUEST_TIMEOUT)?,
        })
    }

    /// Stream labels for an event: configured labels, `job` defaulted, `threshold` set
    pub fn stream_labels(&self, event: &AlertEvent) -> BTreeMap<String, String> {
        let mut labels: BTreeMap<String, String> = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let job_missing = labels.get("job").map_or(true, |job| job.is_empty());
        if job_missing {
            labels.insert("job".to_string(), DEFAULT_JOB.to_string());
        }
        labels.insert("threshold".to_string(), event.kind.as_str().to_string());
        labels
    }

    pub fn line(event: &AlertEvent) -> String {
        format!(
            "pgwd: {} | total={} active={} idle={}{} {}",
            event.message,
            event.stats.total,
            event.stats.active,
            event.stats.idle,
            capacity_suffix(event),
            limit_suffix(event)
        )
    }

    pub fn body(&self, event: &AlertEvent, timestamp_nanos: i64) -> PushBody {
        PushBody {
            streams: vec![Stream {
                stream: self.stream_labels(event),
                values: vec![[timestamp_nanos.to_string(), Self::line(event)]],
            }],
        }
    }
}

#[async_trait]
impl Notifier for LokiNotifier {
    fn name(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let now = Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_millis() * 1_000_000);
        let body = self.body(event, nanos);
        post_json(&self.client, CHANNEL, &self.url, &body).await
    }
}

/// Parses `k1=v1,k2=v2` into a label map.
///
/// Entries are trimmed; empty entries and entries without `=` are skipped.
/// Only the first `=` separates key from value.
pub fn parse_labels(input: &str) -> HashMap<String, String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
