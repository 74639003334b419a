//! Command error taxonomy and its mapping onto response codes.

use fleetgen_db::DbError;
use fleetgen_types::{
    BAD_REQUEST_CODE, INTERNAL_SERVER_ERROR_CODE, NOT_FOUND_CODE, PERMISSION_DENIED_CODE,
};

/// Errors a command handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The caller holds none of the required roles.
    #[error("permission denied for {operation}")]
    PermissionDenied {
        /// The operation or subscription that was refused.
        operation: String,
    },

    /// The view store failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(DbError),

    /// The view store or event log did not answer in time.
    ///
    /// The router re-throws this instead of answering, so the gateway
    /// retries at its own layer.
    #[error("store timeout: {0}")]
    StoreTimeout(DbError),

    /// An event could not be appended to the log.
    #[error("event append failed: {0}")]
    Append(DbError),

    /// The arguments did not deserialize into the operation's input.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// No handler is registered for the operation key.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// The addressed aggregate does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// Classify a view store failure.
    pub fn from_store(error: DbError) -> Self {
        if error.is_timeout() {
            Self::StoreTimeout(error)
        } else {
            Self::StoreUnavailable(error)
        }
    }

    /// Classify an event log failure.
    pub fn from_append(error: DbError) -> Self {
        if error.is_timeout() {
            Self::StoreTimeout(error)
        } else {
            Self::Append(error)
        }
    }

    /// Envelope code reported for this error.
    pub const fn code(&self) -> i32 {
        match self {
            Self::PermissionDenied { .. } => PERMISSION_DENIED_CODE,
            Self::InvalidArguments(_) | Self::UnknownOperation(_) => BAD_REQUEST_CODE,
            Self::NotFound(_) => NOT_FOUND_CODE,
            Self::StoreUnavailable(_)
            | Self::StoreTimeout(_)
            | Self::Append(_)
            | Self::Internal(_) => INTERNAL_SERVER_ERROR_CODE,
        }
    }

    /// Whether the router should re-throw rather than answer.
    pub const fn is_rethrown(&self) -> bool {
        matches!(self, Self::StoreTimeout(_))
    }
}

impl From<DbError> for CommandError {
    fn from(error: DbError) -> Self {
        Self::from_store(error)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(error: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {error}"))
    }
}
