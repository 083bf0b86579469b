//! Watchdog control loop
//!
//! Runs one cycle immediately, then one per interval until cancelled.
//! Cycles never overlap: the next tick is only awaited once the current
//! evaluation and dispatch have finished.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DispatchReport, Dispatcher, ThresholdEvaluator};
use crate::kube::TunnelHandle;
use crate::models::{Capacity, ConnectionStats, EventContext, MonitorOptions};
use crate::observability::WatchdogLogger;
use crate::postgres::StatsCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Evaluating,
    Sleeping,
    Terminated,
}

/// Outcome of a single cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// None when the stats query failed and the cycle was skipped
    pub stats: Option<ConnectionStats>,
    pub capacity: Capacity,
    pub events: usize,
    pub dispatch: DispatchReport,
}

pub struct Watchdog {
    collector: Arc<dyn StatsCollector>,
    evaluator: ThresholdEvaluator,
    dispatcher: Dispatcher,
    context: EventContext,
    options: MonitorOptions,
    /// Zero runs a single cycle
    interval: Duration,
    logger: WatchdogLogger,
    tunnel: Option<TunnelHandle>,
}

impl Watchdog {
    pub fn new(
        collector: Arc<dyn StatsCollector>,
        evaluator: ThresholdEvaluator,
        dispatcher: Dispatcher,
        context: EventContext,
        options: MonitorOptions,
        interval: Duration,
    ) -> Self {
        Self {
            collector,
            evaluator,
            dispatcher,
            context,
            options,
            interval,
            logger: WatchdogLogger::default(),
            tunnel: None,
        }
    }

    /// Hands the tunnel to the loop; it is released when the loop terminates.
    pub fn with_tunnel(mut self, tunnel: TunnelHandle) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn with_logger(mut self, logger: WatchdogLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Runs until cancelled (or after one cycle when the interval is zero).
    /// Returns the number of completed cycles.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        info!(
            interval_secs = self.interval.as_secs(),
            dry_run = self.options.dry_run,
            "Starting watchdog loop"
        );

        let mut state = LoopState::Evaluating;
        let mut cycles = 0u64;
        let mut ticker = None;

        loop {
            state = match state {
                LoopState::Evaluating => {
                    self.run_cycle().await;
                    cycles += 1;

                    if self.interval.is_zero() || cancel.is_cancelled() {
                        LoopState::Terminated
                    } else {
                        LoopState::Sleeping
                    }
                }
                LoopState::Sleeping => {
                    let period = self.interval;
                    let ticker = ticker.get_or_insert_with(|| {
                        let mut t = interval_at(Instant::now() + period, period);
                        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        t
                    });

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Shutting down watchdog loop");
                            LoopState::Terminated
                        }
                        _ = ticker.tick() => LoopState::Evaluating,
                    }
                }
                LoopState::Terminated => break,
            };
        }

        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.release().await;
        }
        self.logger.log_shutdown(cycles);
        cycles
    }

    /// One sample, evaluation and dispatch
    pub async fn run_cycle(&self) -> CycleReport {
        let stats = match self.collector.current_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Failed to read connection stats, skipping cycle");
                return CycleReport::default();
            }
        };

        let capacity = self.capacity().await;
        self.logger
            .log_cycle_stats(&stats, capacity, self.options.dry_run);

        let events = self
            .evaluator
            .evaluate(&stats, capacity, self.collector.as_ref(), &self.context)
            .await;
        let dispatch = self.dispatcher.dispatch(&events).await;

        CycleReport {
            stats: Some(stats),
            capacity,
            events: events.len(),
            dispatch,
        }
    }

    /// Capacity for display; re-read each cycle, unknown (0) when unreadable
    async fn capacity(&self) -> Capacity {
        if self.options.capacity_override > 0 {
            return Capacity::effective(None, self.options.capacity_override);
        }
        match self.collector.server_capacity().await {
            Ok(value) => Capacity::effective(Some(value), 0),
            Err(e) => {
                debug!(error = %e, "Could not read max_connections this cycle");
                Capacity::default()
            }
        }
    }
}
