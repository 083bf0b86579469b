//! Threshold defaults and per-cycle evaluation

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{
    AlertEvent, AlertKind, Capacity, ConnectionStats, EventContext, MonitorOptions,
    ThresholdConfig,
};
use crate::postgres::StatsCollector;

const MIN_PERCENT: i64 = 1;
const MAX_PERCENT: i64 = 100;

pub fn clamp_percent(percent: i64) -> i64 {
    percent.clamp(MIN_PERCENT, MAX_PERCENT)
}

/// `percent` of `capacity`, never below 1
pub fn default_threshold(capacity: i64, percent: i64) -> i64 {
    (capacity * clamp_percent(percent) / 100).max(1)
}

/// Fills total/active thresholds that are 0 from a known capacity.
///
/// Thresholds that are already set are left alone; an unknown capacity
/// changes nothing.
pub fn apply_defaults(thresholds: &mut ThresholdConfig, capacity: Capacity) {
    if !capacity.is_known() {
        return;
    }

    let derived = default_threshold(capacity.value, thresholds.default_percent);
    if thresholds.total == 0 {
        thresholds.total = derived;
    }
    if thresholds.active == 0 {
        thresholds.active = derived;
    }
}

/// Reads server capacity and derives missing thresholds. Runs once, before the loop.
///
/// Fails when nothing would ever fire: no threshold is set after derivation
/// and neither dry-run nor force-notification is enabled.
pub async fn derive_defaults(
    thresholds: &mut ThresholdConfig,
    options: &MonitorOptions,
    collector: &dyn StatsCollector,
) -> Result<Capacity> {
    let (server, server_error) = match collector.server_capacity().await {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };
    let capacity = Capacity::effective(server, options.capacity_override);

    apply_defaults(thresholds, capacity);

    if thresholds.has_any() || options.dry_run || options.force_notification {
        if let Some(e) = &server_error {
            if !capacity.is_known() {
                warn!(error = %e, "Could not read max_connections, no defaults derived");
            }
        }
        return Ok(capacity);
    }

    let reason = match (&server_error, capacity.value) {
        (Some(_), _) => {
            "could not read max_connections from the server; set threshold-total and/or \
             threshold-active, or use dry-run or force-notification"
        }
        (None, 0) => {
            "server reported max_connections=0; set threshold-total and/or \
             threshold-active, or use dry-run or force-notification"
        }
        _ => "set threshold-total and/or threshold-active, or use dry-run or force-notification",
    };

    Err(Error::NoThresholdsConfigured {
        reason: reason.to_string(),
        source: server_error,
    })
}

/// Turns one stats sample into alert events
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    thresholds: ThresholdConfig,
    force_notification: bool,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: ThresholdConfig, options: &MonitorOptions) -> Self {
        Self {
            thresholds,
            force_notification: options.force_notification,
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Evaluates stale, total, active, idle and the forced test, in that order.
    ///
    /// Every qualifying condition yields its own event. Boundaries are
    /// inclusive. A failed stale query skips only the stale check.
    pub async fn evaluate(
        &self,
        stats: &ConnectionStats,
        capacity: Capacity,
        collector: &dyn StatsCollector,
        context: &EventContext,
    ) -> Vec<AlertEvent> {
        let t = &self.thresholds;
        let event = |kind: AlertKind, message: String, measured: i64, threshold: i64| AlertEvent {
            kind,
            message,
            stats: *stats,
            measured_value: measured,
            threshold_value: threshold,
            capacity: capacity.value,
            capacity_is_override: capacity.is_override,
            context: context.clone(),
        };

        let mut events = Vec::new();

        if t.stale > 0 && t.stale_age_seconds > 0 {
            match collector.stale_connection_count(t.stale_age_seconds).await {
                Ok(stale) if stale >= t.stale => events.push(event(
                    AlertKind::Stale,
                    format!(
                        "Stale connections (open > {}s): {} >= {}",
                        t.stale_age_seconds, stale, t.stale
                    ),
                    stale,
                    t.stale,
                )),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Stale connection count failed, skipping stale check"),
            }
        }

        for (kind, label, measured, threshold) in [
            (AlertKind::Total, "Total", stats.total, t.total),
            (AlertKind::Active, "Active", stats.active, t.active),
            (AlertKind::Idle, "Idle", stats.idle, t.idle),
        ] {
            if threshold > 0 && measured >= threshold {
                events.push(event(
                    kind,
                    format!("{label} connections {measured} >= {threshold}"),
                    measured,
                    threshold,
                ));
            }
        }

        if self.force_notification {
            events.push(event(
                AlertKind::Test,
                "Test notification, delivery check (force-notification).".to_string(),
                0,
                0,
            ));
        }

        if !events.is_empty() {
            debug!(count = events.len(), "Alert events raised");
        }
        events
    }
}
