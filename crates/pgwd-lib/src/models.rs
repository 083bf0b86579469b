//! Core data models for the watchdog

use serde::{Deserialize, Serialize};

/// Connection counts for the current database, from `pg_stat_activity`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total: i64,
    pub active: i64,
    pub idle: i64,
}

/// Alert thresholds. A value of 0 disables the corresponding check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub total: i64,
    pub active: i64,
    pub idle: i64,
    pub stale: i64,
    /// Connections open longer than this many seconds count as stale
    pub stale_age_seconds: i64,
    /// Percentage of capacity used for total/active when they are unset
    pub default_percent: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            total: 0,
            active: 0,
            idle: 0,
            stale: 0,
            stale_age_seconds: 0,
            default_percent: 80,
        }
    }
}

impl ThresholdConfig {
    /// Returns true if at least one threshold is set
    pub fn has_any(&self) -> bool {
        self.total > 0 || self.active > 0 || self.idle > 0 || self.stale > 0
    }
}

/// Behaviour switches for evaluation and delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Evaluate normally but never transmit threshold alerts
    pub dry_run: bool,
    /// Inject one synthetic test alert per cycle
    pub force_notification: bool,
    /// Use this instead of the server's `max_connections` when > 0
    pub capacity_override: i64,
}

/// Server capacity as used for defaults and display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    /// `max_connections`, or 0 when unknown
    pub value: i64,
    pub is_override: bool,
}

impl Capacity {
    /// Picks the override when set, otherwise the server value (0 if it could not be read)
    pub fn effective(server: Option<i64>, override_value: i64) -> Self {
        if override_value > 0 {
            Self {
                value: override_value,
                is_override: true,
            }
        } else {
            Self {
                value: server.unwrap_or(0).max(0),
                is_override: false,
            }
        }
    }

    pub fn is_known(&self) -> bool {
        self.value > 0
    }
}

/// Alert kind classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Total,
    Active,
    Idle,
    Stale,
    Test,
    ConnectFailure,
    TooManyClients,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Total => "total",
            AlertKind::Active => "active",
            AlertKind::Idle => "idle",
            AlertKind::Stale => "stale",
            AlertKind::Test => "test",
            AlertKind::ConnectFailure => "connect_failure",
            AlertKind::TooManyClients => "too_many_clients",
        }
    }

    /// True for alerts about the database being unreachable
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, AlertKind::ConnectFailure | AlertKind::TooManyClients)
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the alert comes from, for display in notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub cluster: String,
    pub client: String,
    pub namespace: String,
    pub database: String,
}

/// A single alert, built once and handed unchanged to every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    pub stats: ConnectionStats,
    pub measured_value: i64,
    pub threshold_value: i64,
    pub capacity: i64,
    pub capacity_is_override: bool,
    pub context: EventContext,
}

impl AlertEvent {
    /// Alert for a connection attempt that failed
    pub fn connect_failure(too_many_clients: bool, context: EventContext) -> Self {
        let (kind, message) = if too_many_clients {
            (
                AlertKind::TooManyClients,
                "Postgres rejected connection: too many clients already (max_connections exceeded). Database is saturated, urgent.",
            )
        } else {
            (
                AlertKind::ConnectFailure,
                "pgwd could not connect to Postgres. Check database URL, connectivity, credentials, or infrastructure.",
            )
        };

        Self {
            kind,
            message: message.to_string(),
            stats: ConnectionStats::default(),
            measured_value: 0,
            threshold_value: 0,
            capacity: 0,
            capacity_is_override: false,
            context,
        }
    }
}
