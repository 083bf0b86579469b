//! Watchdog configuration
//!
//! Layered lowest to highest: built-in defaults, optional config file,
//! `PGWD_*` environment variables, command-line flags.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use pgwd_lib::kube::{BootstrapRequest, DEFAULT_PASSWORD_VAR, DEFAULT_REMOTE_PORT};
use pgwd_lib::{MonitorOptions, ThresholdConfig};

const ENV_PREFIX: &str = "PGWD";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Postgres connection URL
    pub db_url: String,

    pub threshold_total: i64,
    pub threshold_active: i64,
    pub threshold_idle: i64,
    pub threshold_stale: i64,
    /// Seconds after which an open connection counts as stale
    pub stale_age: i64,

    pub slack_webhook: String,
    pub loki_url: String,
    /// `k1=v1,k2=v2`
    pub loki_labels: String,

    /// Seconds between cycles; 0 runs once
    pub interval: i64,
    pub dry_run: bool,
    pub force_notification: bool,
    pub notify_on_connect_failure: bool,
    pub default_threshold_percent: i64,

    /// `namespace/kind/name`, enables the port-forward
    pub kube_postgres: String,
    pub kube_local_port: i64,
    pub kube_remote_port: i64,
    pub kube_password_var: String,
    pub kube_password_container: String,

    pub cluster: String,
    pub client: String,

    /// Replaces the server's max_connections when > 0
    pub test_max_connections: i64,
}

fn default_threshold_percent() -> i64 {
    80
}

fn default_kube_port() -> i64 {
    i64::from(DEFAULT_REMOTE_PORT)
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            db_url: String::new(),
            threshold_total: 0,
            threshold_active: 0,
            threshold_idle: 0,
            threshold_stale: 0,
            stale_age: 0,
            slack_webhook: String::new(),
            loki_url: String::new(),
            loki_labels: String::new(),
            interval: 0,
            dry_run: false,
            force_notification: false,
            notify_on_connect_failure: false,
            default_threshold_percent: default_threshold_percent(),
            kube_postgres: String::new(),
            kube_local_port: default_kube_port(),
            kube_remote_port: default_kube_port(),
            kube_password_var: DEFAULT_PASSWORD_VAR.to_string(),
            kube_password_container: String::new(),
            cluster: String::new(),
            client: String::new(),
            test_max_connections: 0,
        }
    }
}

/// Command-line overrides; anything left unset keeps the file/env value
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// PostgreSQL connection URL
    #[arg(long)]
    pub db_url: Option<String>,

    /// Alert when total connections >= N
    #[arg(long)]
    pub threshold_total: Option<i64>,

    /// Alert when active connections >= N
    #[arg(long)]
    pub threshold_active: Option<i64>,

    /// Alert when idle connections >= N
    #[arg(long)]
    pub threshold_idle: Option<i64>,

    /// Alert when stale connections (open > stale-age) >= N
    #[arg(long)]
    pub threshold_stale: Option<i64>,

    /// Consider a connection stale if open longer than N seconds
    #[arg(long)]
    pub stale_age: Option<i64>,

    /// Slack Incoming Webhook URL
    #[arg(long)]
    pub slack_webhook: Option<String>,

    /// Loki push API URL, e.g. http://localhost:3100/loki/api/v1/push
    #[arg(long)]
    pub loki_url: Option<String>,

    /// Loki labels, e.g. job=pgwd,env=prod
    #[arg(long)]
    pub loki_labels: Option<String>,

    /// Run every N seconds; 0 runs once
    #[arg(long)]
    pub interval: Option<i64>,

    /// Only log, do not send threshold notifications
    #[arg(long)]
    pub dry_run: bool,

    /// Send a test notification every cycle to validate delivery
    #[arg(long)]
    pub force_notification: bool,

    /// Alert channels when the Postgres connection fails
    #[arg(long)]
    pub notify_on_connect_failure: bool,

    /// Percent of max_connections used when total/active thresholds are 0 (1-100)
    #[arg(long)]
    pub default_threshold_percent: Option<i64>,

    /// Connect through kubectl port-forward: namespace/kind/name (e.g. default/svc/postgres)
    #[arg(long)]
    pub kube_postgres: Option<String>,

    /// Local port for the port-forward
    #[arg(long)]
    pub kube_local_port: Option<i64>,

    /// Remote port for the port-forward
    #[arg(long)]
    pub kube_remote_port: Option<i64>,

    /// Pod env var holding the password when the URL asks for discovery
    #[arg(long)]
    pub kube_password_var: Option<String>,

    /// Container to read the password env var from
    #[arg(long)]
    pub kube_password_container: Option<String>,

    /// Cluster name shown in notifications
    #[arg(long)]
    pub cluster: Option<String>,

    /// Client name shown in notifications
    #[arg(long)]
    pub client: Option<String>,

    /// Override server max_connections for defaults and display (testing)
    #[arg(long)]
    pub test_max_connections: Option<i64>,
}

impl WatchdogConfig {
    /// Load from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// `env` replaces the process environment when given. Variables set to
    /// an empty string count as unset.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let env = env
            .unwrap_or_else(process_env)
            .into_iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(env)),
        );

        let config = builder.build().context("Failed to load configuration")?;
        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        set(&mut self.db_url, &overrides.db_url);
        set(&mut self.threshold_total, &overrides.threshold_total);
        set(&mut self.threshold_active, &overrides.threshold_active);
        set(&mut self.threshold_idle, &overrides.threshold_idle);
        set(&mut self.threshold_stale, &overrides.threshold_stale);
        set(&mut self.stale_age, &overrides.stale_age);
        set(&mut self.slack_webhook, &overrides.slack_webhook);
        set(&mut self.loki_url, &overrides.loki_url);
        set(&mut self.loki_labels, &overrides.loki_labels);
        set(&mut self.interval, &overrides.interval);
        set(
            &mut self.default_threshold_percent,
            &overrides.default_threshold_percent,
        );
        set(&mut self.kube_postgres, &overrides.kube_postgres);
        set(&mut self.kube_local_port, &overrides.kube_local_port);
        set(&mut self.kube_remote_port, &overrides.kube_remote_port);
        set(&mut self.kube_password_var, &overrides.kube_password_var);
        set(
            &mut self.kube_password_container,
            &overrides.kube_password_container,
        );
        set(&mut self.cluster, &overrides.cluster);
        set(&mut self.client, &overrides.client);
        set(&mut self.test_max_connections, &overrides.test_max_connections);

        // Switches can only be turned on from the command line
        self.dry_run |= overrides.dry_run;
        self.force_notification |= overrides.force_notification;
        self.notify_on_connect_failure |= overrides.notify_on_connect_failure;
    }

    pub fn has_any_channel(&self) -> bool {
        !self.slack_webhook.is_empty() || !self.loki_url.is_empty()
    }

    /// Checks everything that can be checked without touching the network
    pub fn validate(&self) -> pgwd_lib::Result<()> {
        let fail = |msg: &str| Err(pgwd_lib::Error::Config(msg.to_string()));

        if self.db_url.trim().is_empty() {
            return fail("missing database URL: set PGWD_DB_URL or --db-url");
        }

        for (name, value) in [
            ("threshold-total", self.threshold_total),
            ("threshold-active", self.threshold_active),
            ("threshold-idle", self.threshold_idle),
            ("threshold-stale", self.threshold_stale),
            ("stale-age", self.stale_age),
            ("interval", self.interval),
            ("test-max-connections", self.test_max_connections),
        ] {
            if value < 0 {
                return Err(pgwd_lib::Error::Config(format!(
                    "{name} must not be negative (got {value})"
                )));
            }
        }

        if self.threshold_stale > 0 && self.stale_age <= 0 {
            return fail("threshold-stale requires stale-age > 0 (PGWD_STALE_AGE or --stale-age)");
        }
        if !self.has_any_channel() && !self.dry_run {
            return fail(
                "no notifier configured: set PGWD_SLACK_WEBHOOK and/or PGWD_LOKI_URL \
                 (or --slack-webhook / --loki-url), or use --dry-run",
            );
        }
        if self.force_notification && !self.has_any_channel() {
            return fail("force-notification requires at least one notifier (slack-webhook or loki-url)");
        }
        if self.notify_on_connect_failure && !self.has_any_channel() {
            return fail(
                "notify-on-connect-failure requires at least one notifier (slack-webhook or loki-url)",
            );
        }
        if !self.kube_postgres.is_empty() && !(1..=65535).contains(&self.kube_remote_port) {
            return fail("kube-remote-port must be between 1 and 65535");
        }

        Ok(())
    }

    pub fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig {
            total: self.threshold_total,
            active: self.threshold_active,
            idle: self.threshold_idle,
            stale: self.threshold_stale,
            stale_age_seconds: self.stale_age,
            default_percent: self.default_threshold_percent,
        }
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            dry_run: self.dry_run,
            force_notification: self.force_notification,
            capacity_override: self.test_max_connections,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(0) as u64)
    }

    /// Tunnel request, when the database is reached through kubectl
    pub fn bootstrap_request(&self) -> Option<BootstrapRequest> {
        if self.kube_postgres.is_empty() {
            return None;
        }

        let mut request = BootstrapRequest::new(&self.kube_postgres, self.kube_local_port);
        request.remote_port = u16::try_from(self.kube_remote_port).unwrap_or(DEFAULT_REMOTE_PORT);
        if !self.kube_password_var.is_empty() {
            request.password_var = self.kube_password_var.clone();
        }
        if !self.kube_password_container.is_empty() {
            request.password_container = Some(self.kube_password_container.clone());
        }
        Some(request)
    }
}

/// Process environment, skipping variables that are not valid UTF-8
fn process_env() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn valid() -> WatchdogConfig {
        WatchdogConfig {
            db_url: "postgres://app:pw@localhost:5432/orders".to_string(),
            slack_webhook: "https://hooks.slack.test/T000".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = WatchdogConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.default_threshold_percent, 80);
        assert_eq!(config.kube_local_port, 5432);
        assert_eq!(config.kube_remote_port, 5432);
        assert_eq!(config.kube_password_var, "POSTGRES_PASSWORD");
        assert_eq!(config.interval, 0);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
db_url = "postgres://file@localhost/file"
threshold_total = 50
interval = 30
loki_labels = "job=pgwd,env=dev"
"#
        )
        .unwrap();

        let config = WatchdogConfig::load_with_env(
            Some(file.path()),
            env(&[
                ("PGWD_THRESHOLD_TOTAL", "75"),
                ("PGWD_DRY_RUN", "true"),
                ("PGWD_KUBE_POSTGRES", "db/svc/postgres"),
            ]),
        )
        .unwrap();

        assert_eq!(config.db_url, "postgres://file@localhost/file");
        assert_eq!(config.threshold_total, 75);
        assert_eq!(config.interval, 30);
        assert_eq!(config.loki_labels, "job=pgwd,env=dev");
        assert!(config.dry_run);
        assert_eq!(config.kube_postgres, "db/svc/postgres");
    }

    #[test]
    fn test_empty_env_values_use_defaults() {
        let config = WatchdogConfig::load_with_env(
            None,
            env(&[
                ("PGWD_INTERVAL", ""),
                ("PGWD_DRY_RUN", ""),
                ("PGWD_KUBE_LOCAL_PORT", "  "),
                ("PGWD_THRESHOLD_TOTAL", "40"),
            ]),
        )
        .unwrap();

        assert_eq!(config.interval, 0);
        assert!(!config.dry_run);
        assert_eq!(config.kube_local_port, 5432);
        assert_eq!(config.threshold_total, 40);
    }

    #[test]
    fn test_empty_env_value_keeps_file_value() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "interval = 45").unwrap();

        let config =
            WatchdogConfig::load_with_env(Some(file.path()), env(&[("PGWD_INTERVAL", "")]))
                .unwrap();
        assert_eq!(config.interval, 45);
    }

    #[test]
    fn test_missing_config_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(WatchdogConfig::load_with_env(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_flags_override_everything() {
        let mut config = valid();
        config.threshold_total = 10;

        config.apply_overrides(&Overrides {
            threshold_total: Some(20),
            interval: Some(60),
            dry_run: true,
            ..Default::default()
        });

        assert_eq!(config.threshold_total, 20);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert!(config.dry_run);
        assert_eq!(config.db_url, valid().db_url);
    }

    #[test]
    fn test_validate_accepts_minimal() {
        assert!(valid().validate().is_ok());

        let dry = WatchdogConfig {
            slack_webhook: String::new(),
            dry_run: true,
            ..valid()
        };
        assert!(dry.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let cases = [
            (
                WatchdogConfig {
                    db_url: String::new(),
                    ..valid()
                },
                "missing database URL",
            ),
            (
                WatchdogConfig {
                    slack_webhook: String::new(),
                    ..valid()
                },
                "no notifier configured",
            ),
            (
                WatchdogConfig {
                    threshold_stale: 3,
                    ..valid()
                },
                "stale-age",
            ),
            (
                WatchdogConfig {
                    slack_webhook: String::new(),
                    dry_run: true,
                    force_notification: true,
                    ..valid()
                },
                "force-notification",
            ),
            (
                WatchdogConfig {
                    slack_webhook: String::new(),
                    dry_run: true,
                    notify_on_connect_failure: true,
                    ..valid()
                },
                "notify-on-connect-failure",
            ),
            (
                WatchdogConfig {
                    interval: -1,
                    ..valid()
                },
                "interval",
            ),
            (
                WatchdogConfig {
                    kube_postgres: "db/svc/postgres".to_string(),
                    kube_remote_port: 70000,
                    ..valid()
                },
                "kube-remote-port",
            ),
        ];

        for (config, expected) in cases {
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, pgwd_lib::Error::Config(_)),
                "expected config error for {expected}"
            );
            assert!(
                err.to_string().contains(expected),
                "{err} should mention {expected}"
            );
        }
    }

    #[test]
    fn test_bootstrap_request() {
        assert!(valid().bootstrap_request().is_none());

        let config = WatchdogConfig {
            kube_postgres: "db/svc/postgres".to_string(),
            kube_local_port: 15432,
            kube_password_container: "postgres".to_string(),
            ..valid()
        };
        let request = config.bootstrap_request().unwrap();

        assert_eq!(request.resource, "db/svc/postgres");
        assert_eq!(request.local_port, 15432);
        assert_eq!(request.remote_port, 5432);
        assert_eq!(request.password_var, "POSTGRES_PASSWORD");
        assert_eq!(request.password_container.as_deref(), Some("postgres"));
    }

    #[test]
    fn test_conversions() {
        let config = WatchdogConfig {
            threshold_idle: 5,
            stale_age: 300,
            test_max_connections: 40,
            force_notification: true,
            ..valid()
        };

        let thresholds = config.thresholds();
        assert_eq!(thresholds.idle, 5);
        assert_eq!(thresholds.stale_age_seconds, 300);
        assert_eq!(thresholds.default_percent, 80);

        let options = config.monitor_options();
        assert_eq!(options.capacity_override, 40);
        assert!(options.force_notification);
        assert!(!options.dry_run);
    }
}
