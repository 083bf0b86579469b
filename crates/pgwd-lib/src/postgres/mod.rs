//! Connection statistics from Postgres
//!
//! The monitoring loop only sees the [`StatsCollector`] trait; the sqlx
//! implementation reads `pg_stat_activity` for the current database.

mod errors;

pub use errors::DbError;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::ConnectionStats;

/// Small pool: the watchdog issues a handful of queries per cycle.
const POOL_MAX_CONNECTIONS: u32 = 2;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Trait for connection statistics sources
#[async_trait]
pub trait StatsCollector: Send + Sync {
    /// Total, active and idle connections to the current database
    async fn current_stats(&self) -> Result<ConnectionStats, DbError>;

    /// Server `max_connections`
    async fn server_capacity(&self) -> Result<i64, DbError>;

    /// Connections open longer than `max_age_seconds`
    async fn stale_connection_count(&self, max_age_seconds: i64) -> Result<i64, DbError>;
}

/// [`StatsCollector`] backed by a sqlx pool
#[derive(Clone)]
pub struct PgStatsCollector {
    pool: PgPool,
}

impl PgStatsCollector {
    /// Opens the pool; fails if no connection can be established
    ///
    /// One direct connection is made first so the server's own error
    /// (e.g. SQLSTATE 53300) is returned instead of a pool timeout: the
    /// pool keeps retrying refused connections until `ACQUIRE_TIMEOUT`.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let options: PgConnectOptions = database_url.parse()?;

        let first = tokio::time::timeout(ACQUIRE_TIMEOUT, options.connect())
            .await
            .map_err(|_| DbError::ConnectTimeout(ACQUIRE_TIMEOUT))??;
        if let Err(e) = first.close().await {
            debug!(error = %e, "Closing initial connection failed");
        }

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StatsCollector for PgStatsCollector {
    async fn current_stats(&self) -> Result<ConnectionStats, DbError> {
        let (total, active, idle): (i64, i64, i64) = sqlx::query_as(
            r#"
SELECT
    count(*)                                 AS total,
    count(*) FILTER (WHERE state = 'active') AS active,
    count(*) FILTER (WHERE state = 'idle')   AS idle
FROM pg_stat_activity
WHERE datname = current_database()
"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ConnectionStats {
            total,
            active,
            idle,
        })
    }

    async fn server_capacity(&self) -> Result<i64, DbError> {
        let capacity: i64 =
            sqlx::query_scalar("SELECT current_setting('max_connections')::bigint")
                .fetch_one(&self.pool)
                .await?;
        Ok(capacity)
    }

    async fn stale_connection_count(&self, max_age_seconds: i64) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT count(*)
FROM pg_stat_activity
WHERE datname = current_database()
  AND (now() - backend_start) > ($1::bigint * interval '1 second')
"#,
        )
        .bind(max_age_seconds)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
