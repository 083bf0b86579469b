//! Monitoring: threshold defaults, evaluation, dispatch and the control loop
//!
//! This module provides:
//! - Default total/active thresholds derived from `max_connections`
//! - Independent, inclusive threshold checks producing alert events
//! - Fan-out of events to every configured channel
//! - The cancellable evaluate/sleep loop

mod dispatcher;
mod r#loop;
mod thresholds;


pub use dispatcher::{DispatchReport, Dispatcher};
pub use r#loop::{CycleReport, LoopState, Watchdog};
pub use thresholds::{
    apply_defaults, clamp_percent, default_threshold, derive_defaults, ThresholdEvaluator,
};
