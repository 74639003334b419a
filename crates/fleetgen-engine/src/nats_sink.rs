//! NATS telemetry sink.
//!
//! Every generated vehicle is published as a JSON [`TelemetryMessage`] on
//! the configured telemetry topic. Delivery is best-effort core NATS; the
//! generation loop logs and ignores failures.

use fleetgen_core::sink::{SinkError, TelemetrySink};
use fleetgen_types::TelemetryMessage;

/// Publishes telemetry messages to a NATS subject.
pub struct NatsTelemetrySink {
    client: async_nats::Client,
    topic: String,
}

impl NatsTelemetrySink {
    /// Create a sink publishing on `topic` through `client`.
    pub const fn new(client: async_nats::Client, topic: String) -> Self {
        Self { client, topic }
    }
}

impl TelemetrySink for NatsTelemetrySink {
    async fn publish(&self, message: &TelemetryMessage) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(message)?;
        self.client
            .publish(self.topic.clone(), payload.into())
            .await
            .map_err(|e| SinkError::Publish(format!("failed to publish on {}: {e}", self.topic)))
    }
}
