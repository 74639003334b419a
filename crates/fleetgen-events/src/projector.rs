//! The replay projector.
//!
//! Applies logged events to the view store. Catch-up replays the log from
//! a cursor before the service takes traffic; the live phase then follows
//! the subscription. Both paths write with an unguarded upsert keyed by
//! aggregate id, so redelivery is harmless and the last write wins.

use std::sync::atomic::{AtomicU64, Ordering};

use fleetgen_db::{Collection, EventLog, ViewStore};
use fleetgen_types::{AggregateType, Event, EventType};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ProjectionError;
use crate::migration::migrate;

/// Which pass is applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Startup replay of the log. Every failure propagates.
    CatchUp,
    /// Following new appends while serving traffic.
    Live,
}

/// What [`Projector::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The document was inserted or merged.
    Upserted,
    /// The document was deleted.
    Deleted,
    /// The event does not project in this phase.
    Skipped,
    /// The store was unavailable and the event was dropped.
    Swallowed,
}

/// Projects events into a [`ViewStore`] and remembers how far it got.
pub struct Projector<S> {
    store: S,
    position: AtomicU64,
}

impl<S: ViewStore> Projector<S> {
    /// Create a projector writing to `store`, starting at position 0.
    pub const fn new(store: S) -> Self {
        Self {
            store,
            position: AtomicU64::new(0),
        }
    }

    /// Position of the last event this projector consumed.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// Apply one event.
    ///
    /// `GeneratorModified` only projects during catch-up; the command
    /// handlers already wrote the view for live mutations. Unavailable
    /// store errors on lifecycle events are logged and swallowed in the
    /// live phase.
    pub async fn apply(&self, event: &Event, phase: Phase) -> Result<Applied, ProjectionError> {
        let Some(kind) = event.kind() else {
            debug!(
                event_type = %event.event_type,
                position = event.position,
                "Skipping unknown event type"
            );
            return Ok(Applied::Skipped);
        };

        if phase == Phase::Live && kind == EventType::GeneratorModified {
            return Ok(Applied::Skipped);
        }

        let migrated = migrate(event)?;
        let collection = if kind.is_lifecycle() {
            Collection::GenerationLifecycle
        } else {
            Collection::from(event.aggregate_type)
        };

        let result = if migrated.is_delete() {
            self.store
                .delete(collection, &event.aggregate_id)
                .await
                .map(|_| Applied::Deleted)
        } else {
            self.store
                .upsert(
                    collection,
                    &event.aggregate_id,
                    migrated.fields,
                    event.aggregate_version,
                )
                .await
                .map(|()| Applied::Upserted)
        };

        match result {
            Ok(applied) => Ok(applied),
            Err(e) if phase == Phase::Live && kind.is_lifecycle() && e.is_unavailable() => {
                warn!(
                    error = %e,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    "View store unavailable, dropping lifecycle projection"
                );
                Ok(Applied::Swallowed)
            }
            Err(e) => Err(ProjectionError::Store(e)),
        }
    }

    /// Replay every event of `aggregate_types` after `from` until the log
    /// is exhausted. Returns the position of the last event applied.
    pub async fn catch_up<L: EventLog>(
        &self,
        log: &L,
        aggregate_types: &[AggregateType],
        from: u64,
        batch: usize,
    ) -> Result<u64, ProjectionError> {
        let mut after = from;
        let mut applied: u64 = 0;
        self.position.store(after, Ordering::Release);

        loop {
            let events = log
                .read_after(after, aggregate_types, batch.max(1))
                .await
                .map_err(ProjectionError::Log)?;
            if events.is_empty() {
                break;
            }
            for event in &events {
                self.apply(event, Phase::CatchUp).await?;
                after = event.position;
                applied = applied.saturating_add(1);
                self.position.store(after, Ordering::Release);
            }
        }

        info!(applied, position = after, "Catch-up replay complete");
        Ok(after)
    }

    /// Follow the log from `from` until `shutdown` flips to `true`.
    ///
    /// Read failures are retried by the subscription. Projection failures
    /// end the run; [`Projector::position`] tells the caller where to
    /// resume.
    pub async fn run_live<L: EventLog>(
        &self,
        log: &L,
        aggregate_types: Vec<AggregateType>,
        from: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, ProjectionError> {
        self.position.store(from, Ordering::Release);
        let mut events = log.subscribe(aggregate_types, from);
        info!(position = from, "Live projection started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        self.apply(&event, Phase::Live).await?;
                        self.position.store(event.position, Ordering::Release);
                    }
                    Some(Err(e)) => warn!(error = %e, "Event log read failed, retrying"),
                    None => break,
                },
            }
        }

        let position = self.position();
        info!(position, "Live projection stopped");
        Ok(position)
    }
}
