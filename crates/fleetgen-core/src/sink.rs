//! The external telemetry sink.

use std::future::Future;

use fleetgen_types::TelemetryMessage;

/// Errors raised by a telemetry sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The message could not be encoded.
    #[error("telemetry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport refused or lost the message.
    #[error("telemetry publish failed: {0}")]
    Publish(String),
}

/// Destination for generated telemetry messages.
pub trait TelemetrySink: Send + Sync + 'static {
    /// Publish one message.
    fn publish(
        &self,
        message: &TelemetryMessage,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}
