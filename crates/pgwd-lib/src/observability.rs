//! Structured lifecycle logging
//!
//! Every record carries an `event` field so log pipelines can filter on it
//! regardless of the subscriber's output format.

use tracing::{debug, error, info, warn};

use crate::models::{AlertEvent, Capacity, ConnectionStats, ThresholdConfig};

/// Structured logger for watchdog lifecycle events
#[derive(Debug, Clone, Default)]
pub struct WatchdogLogger {
    client: String,
}

impl WatchdogLogger {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
        }
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64, dry_run: bool, channels: usize) {
        info!(
            event = "watchdog_started",
            client = %self.client,
            version = %version,
            interval_secs = interval_secs,
            dry_run = dry_run,
            channels = channels,
            "pgwd started"
        );
    }

    pub fn log_tunnel_ready(&self, resource: &str, local_port: u16, probes: u32) {
        info!(
            event = "tunnel_ready",
            client = %self.client,
            resource = %resource,
            local_port = local_port,
            probes = probes,
            "Port-forward ready"
        );
    }

    pub fn log_thresholds(&self, thresholds: &ThresholdConfig, capacity: Capacity) {
        info!(
            event = "thresholds_configured",
            client = %self.client,
            total = thresholds.total,
            active = thresholds.active,
            idle = thresholds.idle,
            stale = thresholds.stale,
            stale_age_seconds = thresholds.stale_age_seconds,
            max_connections = capacity.value,
            capacity_override = capacity.is_override,
            "Thresholds in effect"
        );
    }

    /// Per-cycle stats; info in dry-run so the operator sees each sample
    pub fn log_cycle_stats(&self, stats: &ConnectionStats, capacity: Capacity, dry_run: bool) {
        if dry_run {
            info!(
                event = "cycle_stats",
                client = %self.client,
                total = stats.total,
                active = stats.active,
                idle = stats.idle,
                max_connections = capacity.value,
                "Connection stats"
            );
        } else {
            debug!(
                event = "cycle_stats",
                client = %self.client,
                total = stats.total,
                active = stats.active,
                idle = stats.idle,
                max_connections = capacity.value,
                "Connection stats"
            );
        }
    }

    pub fn log_alert(&self, alert: &AlertEvent) {
        warn!(
            event = "alert_fired",
            client = %self.client,
            kind = %alert.kind,
            measured = alert.measured_value,
            threshold = alert.threshold_value,
            message = %alert.message,
            "Alert fired"
        );
    }

    pub fn log_dry_run(&self, alert: &AlertEvent) {
        info!(
            event = "alert_suppressed",
            client = %self.client,
            kind = %alert.kind,
            message = %alert.message,
            "Dry run, would send alert"
        );
    }

    pub fn log_notification_failed(&self, channel: &str, alert: &AlertEvent, error: &str) {
        error!(
            event = "notification_failed",
            client = %self.client,
            channel = %channel,
            kind = %alert.kind,
            error = %error,
            "Notification delivery failed"
        );
    }

    pub fn log_connect_failure(&self, too_many_clients: bool, error: &str) {
        error!(
            event = "connect_failed",
            client = %self.client,
            too_many_clients = too_many_clients,
            error = %error,
            "Could not connect to Postgres"
        );
    }

    pub fn log_shutdown(&self, cycles: u64) {
        info!(
            event = "watchdog_stopped",
            client = %self.client,
            cycles = cycles,
            "pgwd stopped"
        );
    }
}
