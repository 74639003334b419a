//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure `main` can hit during startup and
//! shutdown so it can propagate them with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: fleetgen_core::config::ConfigError,
    },

    /// Connecting to or migrating `PostgreSQL` failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: fleetgen_db::DbError,
    },

    /// Replay projection hit an event it cannot apply.
    #[error("projection error: {source}")]
    Projection {
        /// The underlying projection error.
        #[from]
        source: fleetgen_events::ProjectionError,
    },

    /// NATS connection or messaging failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
