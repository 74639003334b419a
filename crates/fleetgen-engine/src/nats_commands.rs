//! NATS command surface.
//!
//! Serves [`CommandRequest`]s over request/reply on the command subject.
//! Each request runs on its own task and is answered with the response
//! envelope. A store timeout re-thrown by the router gets no reply, so the
//! gateway's own request timeout and retry apply.
//!
//! # Subject Convention
//!
//! - **Requests:** `<command_subject>` (queue group `fleetgen`), JSON
//!   `{operation, args, identity}`
//! - **Replies:** the request's reply inbox, JSON `{code, data?, error?}`

use std::sync::Arc;

use fleetgen_core::FleetService;
use fleetgen_core::sink::TelemetrySink;
use fleetgen_db::EventLog;
use fleetgen_types::{BAD_REQUEST_CODE, CommandRequest, CommandResponse};
use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Queue group shared by every engine replica.
const QUEUE_GROUP: &str = "fleetgen";

/// Decode a request payload, or the envelope to answer a malformed one.
pub fn decode_request(payload: &[u8]) -> Result<CommandRequest, CommandResponse> {
    serde_json::from_slice(payload).map_err(|e| {
        CommandResponse::failure(BAD_REQUEST_CODE, format!("malformed command request: {e}"))
    })
}

/// Serve commands until `shutdown` flips or the subscription closes.
///
/// # Errors
///
/// Returns [`EngineError::Nats`] if the subscription cannot be created.
pub async fn serve<L: EventLog, T: TelemetrySink>(
    client: async_nats::Client,
    subject: String,
    service: Arc<FleetService<L, T>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), EngineError> {
    let mut requests = client
        .queue_subscribe(subject.clone(), QUEUE_GROUP.to_owned())
        .await
        .map_err(|e| EngineError::Nats {
            message: format!("failed to subscribe to {subject}: {e}"),
        })?;
    info!(subject = %subject, "Command surface listening");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = requests.next() => match next {
                Some(message) => {
                    tokio::spawn(handle(client.clone(), Arc::clone(&service), message));
                }
                None => break,
            },
        }
    }

    let _ = requests.unsubscribe().await;
    info!(subject = %subject, "Command surface stopped");
    Ok(())
}

async fn handle<L: EventLog, T: TelemetrySink>(
    client: async_nats::Client,
    service: Arc<FleetService<L, T>>,
    message: async_nats::Message,
) {
    let Some(reply) = message.reply else {
        warn!(subject = %message.subject, "Command without a reply subject, dropping");
        return;
    };

    let response = match decode_request(&message.payload) {
        Ok(request) => {
            let operation = request.operation.clone();
            match service.dispatch(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        operation = %operation,
                        error = %e,
                        "Leaving command unanswered for gateway retry"
                    );
                    return;
                }
            }
        }
        Err(response) => response,
    };

    match serde_json::to_vec(&response) {
        Ok(payload) => {
            if let Err(e) = client.publish(reply, payload.into()).await {
                warn!(error = %e, "Failed to publish command reply");
            } else {
                debug!(code = response.code, "Command answered");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize command reply"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_command_request() {
        let request = decode_request(
            br#"{"operation":"Vehicle.mutation.VehicleStartGeneration","args":null,"identity":{"roles":["GENERATOR_WRITE"],"displayName":"ops"}}"#,
        )
        .unwrap();
        assert_eq!(request.operation, "Vehicle.mutation.VehicleStartGeneration");
        assert_eq!(request.identity.display_name, "ops");
    }

    #[test]
    fn malformed_request_is_a_bad_request_envelope() {
        let response = decode_request(b"not json").unwrap_err();
        assert_eq!(response.code, BAD_REQUEST_CODE);
        assert!(response.error.is_some());
    }
}
