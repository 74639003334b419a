//! Projection error types.

use fleetgen_db::DbError;

/// Errors raised while projecting events into the view store.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The event carries a payload schema version with no migration.
    ///
    /// Version 0 always lands here. This is a configuration error and is
    /// never coerced to a default.
    #[error("invalid event type version {version} for {event_type} at position {position}")]
    InvalidEventVersion {
        /// Event type name.
        event_type: String,
        /// Offending payload version.
        version: u32,
        /// Log position of the event.
        position: u64,
    },

    /// The event payload does not have the expected shape.
    #[error("malformed {event_type} data at position {position}: {reason}")]
    MalformedData {
        /// Event type name.
        event_type: String,
        /// Log position of the event.
        position: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A view store write failed.
    #[error("view store error: {0}")]
    Store(#[from] DbError),

    /// Reading the event log failed.
    #[error("event log error: {0}")]
    Log(DbError),
}

impl ProjectionError {
    /// Whether retrying the same event can never succeed.
    ///
    /// Fatal errors stop projection; others are restarted from the last
    /// applied position.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidEventVersion { .. } | Self::MalformedData { .. }
        )
    }
}
