//! Fanout relay.
//!
//! Forwards every fanout publication to NATS on
//! `<materialized_view_topic>.<event name>` so gateways outside this
//! process see the same live updates as in-process subscribers.

use fleetgen_core::fanout::Publication;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// NATS subject for a publication under `prefix`.
pub fn relay_subject(prefix: &str, topic: &str) -> String {
    format!("{prefix}.{topic}")
}

/// Relay publications from `tap` until `shutdown` flips or the bridge
/// goes away.
pub async fn run(
    client: async_nats::Client,
    prefix: String,
    mut tap: broadcast::Receiver<Publication>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(prefix = %prefix, "Fanout relay started");
    loop {
        let publication = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            received = tap.recv() => match received {
                Ok(publication) => publication,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Fanout relay lagged, skipping publications");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let subject = relay_subject(&prefix, &publication.topic);
        match serde_json::to_vec(&publication.payload) {
            Ok(payload) => {
                if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                    warn!(subject = %subject, error = %e, "Fanout relay publish failed");
                } else {
                    debug!(subject = %subject, "Relayed fanout publication");
                }
            }
            Err(e) => warn!(subject = %subject, error = %e, "Fanout payload serialization failed"),
        }
    }
    info!("Fanout relay stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_joins_prefix_and_topic() {
        assert_eq!(
            relay_subject("emi-gateway-materialized-view-updates", "VehicleVehicleGenerated"),
            "emi-gateway-materialized-view-updates.VehicleVehicleGenerated"
        );
    }
}
