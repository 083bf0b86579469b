//! Postgres connection watchdog library
//!
//! This crate provides the core functionality for:
//! - Reaching a database through a `kubectl port-forward` tunnel, including
//!   pod resolution and password discovery
//! - Sampling connection statistics from `pg_stat_activity`
//! - Threshold evaluation with defaults derived from `max_connections`
//! - Best-effort alert fan-out to Slack and Loki
//! - The cancellable monitoring loop

pub mod context;
pub mod error;
pub mod kube;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod observability;
pub mod postgres;

pub use context::{ContextSettings, EventContextResolver};
pub use error::{Error, Result};
pub use models::*;
pub use observability::WatchdogLogger;
