//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`], which wraps the underlying
//! [`sqlx`] and [`serde_json`] errors. Callers classify failures with
//! [`DbError::is_unavailable`] and [`DbError::is_timeout`] instead of
//! matching driver internals.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time.
    #[error("Store timeout: {0}")]
    Timeout(String),

    /// A document with the same id already exists.
    #[error("Duplicate document: {0}")]
    Duplicate(String),

    /// A persisted row could not be mapped back to a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether the store failed to answer in time.
    ///
    /// Timeouts are surfaced to the gateway as-is so it can retry at a
    /// higher layer.
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Postgres(sqlx::Error::PoolTimedOut)
        )
    }

    /// Whether the store is down or not yet reachable (includes timeouts).
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Timeout(_)
                | Self::Postgres(
                    sqlx::Error::PoolTimedOut
                        | sqlx::Error::PoolClosed
                        | sqlx::Error::Io(_)
                        | sqlx::Error::Tls(_)
                        | sqlx::Error::WorkerCrashed
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_also_unavailable() {
        let err = DbError::Timeout(String::from("slow"));
        assert!(err.is_timeout());
        assert!(err.is_unavailable());
    }

    #[test]
    fn pool_timeout_is_classified() {
        let err = DbError::Postgres(sqlx::Error::PoolTimedOut);
        assert!(err.is_timeout());
    }

    #[test]
    fn duplicate_is_neither() {
        let err = DbError::Duplicate(String::from("x"));
        assert!(!err.is_timeout());
        assert!(!err.is_unavailable());
    }
}
