//! Best-effort fan-out of alert events to every channel

use std::sync::Arc;

use crate::models::AlertEvent;
use crate::notify::Notifier;
use crate::observability::WatchdogLogger;

/// What happened to a batch of events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Successful channel deliveries
    pub delivered: usize,
    /// Failed channel deliveries
    pub failed: usize,
    /// Events only logged because of dry-run
    pub suppressed: usize,
}

impl DispatchReport {
    fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.suppressed += other.suppressed;
    }
}

pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    dry_run: bool,
    logger: WatchdogLogger,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, dry_run: bool) -> Self {
        Self {
            channels,
            dry_run,
            logger: WatchdogLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: WatchdogLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Sends each event to each channel; a channel failure never stops the rest.
    ///
    /// In dry-run mode events are logged and nothing is transmitted.
    pub async fn dispatch(&self, events: &[AlertEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for event in events {
            if self.dry_run {
                self.logger.log_dry_run(event);
                report.suppressed += 1;
                continue;
            }
            self.logger.log_alert(event);
            report.merge(self.send_to_all(event).await);
        }

        report
    }

    /// Connection failures are always transmitted, dry-run or not.
    pub async fn notify_connect_failure(&self, event: &AlertEvent) -> DispatchReport {
        self.logger.log_alert(event);
        self.send_to_all(event).await
    }

    async fn send_to_all(&self, event: &AlertEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for channel in &self.channels {
            match channel.send(event).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.logger
                        .log_notification_failed(channel.name(), event, &e.to_string());
                    report.failed += 1;
                }
            }
        }

        report
    }
}
