//! Error taxonomy for the watchdog.
//!
//! Configuration and bootstrap failures are fatal and reported before the
//! monitoring loop starts. Failures inside a cycle never surface here; they
//! are logged where they happen and the loop carries on.

use thiserror::Error;

use crate::kube::KubeError;
use crate::postgres::DbError;

/// Result type alias for watchdog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors that stop the watchdog.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing setting, detected before any network activity.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tunnel bootstrap failed (tool missing, resolution, credentials, readiness).
    #[error("kube bootstrap failed: {0}")]
    Bootstrap(#[from] KubeError),

    /// The database could not be reached.
    #[error("postgres connect failed: {0}")]
    Connect(#[from] DbError),

    /// No threshold is set and none could be derived from server capacity.
    #[error("no thresholds configured: {reason}")]
    NoThresholdsConfigured {
        reason: String,
        #[source]
        source: Option<DbError>,
    },
}

impl Error {
    /// The database error behind this failure, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Error::Connect(e) => Some(e),
            Error::NoThresholdsConfigured { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// Returns true when the server refused us because it is saturated.
    pub fn is_too_many_clients(&self) -> bool {
        self.db_error()
            .map(DbError::is_too_many_clients)
            .unwrap_or(false)
    }
}
