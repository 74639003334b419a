//! Live projection supervision.
//!
//! The live projector follows the event log from where catch-up ended.
//! Store failures end a run; the supervisor waits and resumes from the
//! projector's last applied position. Fatal errors (unknown event version,
//! malformed payload) stop projection for good and are returned to `main`.

use std::time::Duration;

use fleetgen_db::{EventLog, ViewStore};
use fleetgen_events::{ProjectionError, Projector};
use fleetgen_types::AggregateType;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Wait before resuming after a recoverable projection failure.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Follow `log` into the projector's store until `shutdown` flips.
///
/// # Errors
///
/// Returns the first fatal [`ProjectionError`].
pub async fn follow<S: ViewStore, L: EventLog>(
    projector: Projector<S>,
    log: L,
    from: u64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ProjectionError> {
    let mut position = from;
    loop {
        match projector
            .run_live(&log, AggregateType::ALL.to_vec(), position, shutdown.clone())
            .await
        {
            Ok(last) => {
                info!(position = last, "Live projection finished");
                return Ok(());
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, position = projector.position(), "Live projection halted");
                return Err(e);
            }
            Err(e) => {
                position = projector.position();
                warn!(error = %e, position, "Live projection failed, resuming");
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
            () = tokio::time::sleep(RESTART_DELAY) => {}
        }
    }
}
