use thiserror::Error;

/// SQLSTATE for "too many connections".
const TOO_MANY_CONNECTIONS: &str = "53300";

#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// Failure reported without a driver error (e.g. by a non-sqlx collector).
    #[error("query failed: {0}")]
    Query(String),
}

impl DbError {
    /// Detects a server that is refusing connections because it is full.
    ///
    /// Checks the SQLSTATE when the driver exposes one, then falls back to
    /// the message text, which is all a failed startup packet may leave us.
    pub fn is_too_many_clients(&self) -> bool {
        if let DbError::Sqlx(sqlx::Error::Database(db)) = self {
            if db.code().as_deref() == Some(TOO_MANY_CONNECTIONS) {
                return true;
            }
        }

        let message = self.to_string().to_lowercase();
        message.contains("too many clients") || message.contains(TOO_MANY_CONNECTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_clients_from_message() {
        let err = DbError::Query(
            "FATAL: sorry, too many clients already (SQLSTATE 53300)".to_string(),
        );
        assert!(err.is_too_many_clients());

        let err = DbError::Query("FATAL: Too Many Clients already".to_string());
        assert!(err.is_too_many_clients());
    }

    #[test]
    fn test_other_errors_are_not_saturation() {
        let err = DbError::Query("password authentication failed for user app".to_string());
        assert!(!err.is_too_many_clients());

        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(!err.is_too_many_clients());
    }
}
