//! pgwd - Postgres connection watchdog
//!
//! Samples connection counts, compares them with thresholds and alerts
//! Slack and/or Loki. Optionally reaches the database through a
//! `kubectl port-forward` tunnel.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pgwd_lib::kube::{
    ConnectionBootstrapper, ConnectionTarget, KubectlCli, TcpPortProbe, TunnelHandle,
};
use pgwd_lib::monitor::{derive_defaults, Dispatcher, ThresholdEvaluator, Watchdog};
use pgwd_lib::notify::{parse_labels, LokiNotifier, Notifier, NotifyError, SlackNotifier};
use pgwd_lib::postgres::PgStatsCollector;
use pgwd_lib::{AlertEvent, ContextSettings, Error, EventContextResolver, WatchdogLogger};

mod config;

use crate::config::{Overrides, WatchdogConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn version_string() -> String {
    format!(
        "pgwd {} (commit {}, built {})",
        VERSION,
        option_env!("PGWD_COMMIT").unwrap_or("unknown"),
        option_env!("PGWD_BUILD_DATE").unwrap_or("unknown")
    )
}

/// Postgres connection watchdog
#[derive(Parser)]
#[command(name = "pgwd")]
#[command(about = "Watch Postgres connection counts and alert Slack/Loki", long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Print version and exit
    #[arg(long = "version", short = 'V')]
    print_version: bool,

    /// Configuration file (TOML, YAML or JSON); PGWD_* env and flags take precedence
    #[arg(long, env = "PGWD_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version and exit
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_version || matches!(cli.command, Some(Command::Version)) {
        println!("{}", version_string());
        return ExitCode::SUCCESS;
    }

    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "pgwd failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = WatchdogConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli.overrides);
    config.validate()?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let mut target =
        ConnectionTarget::parse(&config.db_url).map_err(|e| Error::Config(e.to_string()))?;

    let kubectl = KubectlCli::new();
    let probe = TcpPortProbe::default();
    let mut tunnel: Option<TunnelHandle> = None;
    let mut reference = None;

    if let Some(request) = config.bootstrap_request() {
        let bootstrapped = ConnectionBootstrapper::new(&kubectl, &probe)
            .bootstrap(&target, &request, &cancel)
            .await
            .map_err(Error::from)?;
        target = bootstrapped.target;
        reference = Some(bootstrapped.reference);
        tunnel = Some(bootstrapped.tunnel);
    }

    let settings = ContextSettings {
        cluster: config.cluster.clone(),
        client: config.client.clone(),
        resource: reference.clone(),
    };
    let context = EventContextResolver::new()
        .with_kubectl(&kubectl)
        .resolve(&settings, &target)
        .await;

    let logger = WatchdogLogger::new(&context.client);
    if let (Some(tunnel), Some(reference)) = (&tunnel, &reference) {
        logger.log_tunnel_ready(&reference.to_string(), tunnel.local_port(), tunnel.probes());
    }

    let channels = match build_channels(&config) {
        Ok(channels) => channels,
        Err(e) => {
            release(&mut tunnel).await;
            return Err(e.into());
        }
    };
    let dispatcher = Dispatcher::new(channels, config.dry_run).with_logger(logger.clone());

    let collector = match PgStatsCollector::connect(target.as_str()).await {
        Ok(collector) => collector,
        Err(e) => {
            let err = Error::from(e);
            report_connect_failure(&config, &dispatcher, &logger, &err, &context).await;
            release(&mut tunnel).await;
            return Err(err.into());
        }
    };

    let mut thresholds = config.thresholds();
    let options = config.monitor_options();
    let capacity = match derive_defaults(&mut thresholds, &options, &collector).await {
        Ok(capacity) => capacity,
        Err(err) => {
            if err.db_error().is_some() {
                report_connect_failure(&config, &dispatcher, &logger, &err, &context).await;
            }
            collector.close().await;
            release(&mut tunnel).await;
            return Err(err.into());
        }
    };

    logger.log_thresholds(&thresholds, capacity);
    logger.log_startup(
        VERSION,
        config.interval().as_secs(),
        config.dry_run,
        dispatcher.channel_count(),
    );

    let collector = Arc::new(collector);
    let evaluator = ThresholdEvaluator::new(thresholds, &options);
    let mut watchdog = Watchdog::new(
        collector.clone(),
        evaluator,
        dispatcher,
        context,
        options,
        config.interval(),
    )
    .with_logger(logger);
    if let Some(tunnel) = tunnel.take() {
        watchdog = watchdog.with_tunnel(tunnel);
    }

    watchdog.run(cancel).await;
    collector.close().await;

    Ok(())
}

fn build_channels(config: &WatchdogConfig) -> Result<Vec<Arc<dyn Notifier>>, NotifyError> {
    let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
    if !config.slack_webhook.is_empty() {
        channels.push(Arc::new(SlackNotifier::new(&config.slack_webhook)?));
    }
    if !config.loki_url.is_empty() {
        channels.push(Arc::new(LokiNotifier::new(
            &config.loki_url,
            parse_labels(&config.loki_labels),
        )?));
    }
    Ok(channels)
}

/// Logs the failure and, when enabled, alerts every channel regardless of dry-run
async fn report_connect_failure(
    config: &WatchdogConfig,
    dispatcher: &Dispatcher,
    logger: &WatchdogLogger,
    err: &Error,
    context: &pgwd_lib::EventContext,
) {
    let too_many_clients = err.is_too_many_clients();
    logger.log_connect_failure(too_many_clients, &err.to_string());

    if config.notify_on_connect_failure {
        let event = AlertEvent::connect_failure(too_many_clients, context.clone());
        dispatcher.notify_connect_failure(&event).await;
    }
}

async fn release(tunnel: &mut Option<TunnelHandle>) {
    if let Some(mut tunnel) = tunnel.take() {
        tunnel.release().await;
    }
}

/// Cancels `cancel` on SIGINT or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    cancel.cancel();
}
