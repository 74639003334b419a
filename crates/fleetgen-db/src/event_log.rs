//! The event log contract and its restartable subscription stream.
//!
//! The log is append-only. Each append is assigned a per-aggregate
//! `aggregate_version` (1, 2, 3, ...) and a global `position` that is the
//! replay cursor for projectors. A subscription is a lazy, infinite stream
//! that can be restarted from any cursor.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use fleetgen_types::{AggregateType, Event, NewEvent};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::DbError;

/// Default number of events fetched per read.
pub const DEFAULT_READ_BATCH: usize = 256;

/// Delay before a subscription retries after a failed read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Options for [`EventLog::append`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Acknowledgement key stored with the event so the caller can
    /// correlate it later. The projector does not filter on it.
    pub ack_key: Option<String>,
}

impl AppendOptions {
    /// Options carrying an acknowledgement key.
    pub fn acknowledged(ack_key: &str) -> Self {
        Self {
            ack_key: Some(ack_key.to_owned()),
        }
    }
}

/// Append-only domain event log.
pub trait EventLog: Clone + Send + Sync + 'static {
    /// Append one event, assigning its aggregate version and position.
    fn append(
        &self,
        event: NewEvent,
        options: &AppendOptions,
    ) -> impl Future<Output = Result<Event, DbError>> + Send;

    /// Events of the given aggregate types with `position > after`, in
    /// position order, at most `limit` of them.
    fn read_after(
        &self,
        after: u64,
        aggregate_types: &[AggregateType],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Event>, DbError>> + Send;

    /// Position of the newest event of any type, or 0 for an empty log.
    fn head(&self) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Wait until the log may hold events past `after`.
    ///
    /// Implementations may return early; callers re-read to find out.
    fn wait_for_append(&self, after: u64) -> impl Future<Output = ()> + Send;

    /// Subscribe to events of the given types after `after`.
    ///
    /// The stream never ends on its own. Read failures are yielded as
    /// errors and the stream keeps going from the last delivered event.
    fn subscribe(
        &self,
        aggregate_types: Vec<AggregateType>,
        after: u64,
    ) -> BoxStream<'static, Result<Event, DbError>> {
        subscription(self.clone(), aggregate_types, after, DEFAULT_READ_BATCH)
    }
}

/// Cursor state threaded through [`subscription`].
struct Cursor<L> {
    log: L,
    aggregate_types: Vec<AggregateType>,
    after: u64,
    batch: usize,
    buffer: VecDeque<Event>,
    retry: bool,
}

/// Build a subscription stream over `log` starting after `after`.
pub fn subscription<L: EventLog>(
    log: L,
    aggregate_types: Vec<AggregateType>,
    after: u64,
    batch: usize,
) -> BoxStream<'static, Result<Event, DbError>> {
    let cursor = Cursor {
        log,
        aggregate_types,
        after,
        batch: batch.max(1),
        buffer: VecDeque::new(),
        retry: false,
    };

    futures::stream::unfold(cursor, |mut cursor| async move {
        loop {
            if let Some(event) = cursor.buffer.pop_front() {
                cursor.after = event.position;
                return Some((Ok(event), cursor));
            }

            if cursor.retry {
                cursor.retry = false;
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }

            // Sample the head before reading: if nothing matches, every
            // event up to it was of another type and can be skipped.
            let head = match cursor.log.head().await {
                Ok(head) => head,
                Err(e) => {
                    cursor.retry = true;
                    return Some((Err(e), cursor));
                }
            };

            match cursor
                .log
                .read_after(cursor.after, &cursor.aggregate_types, cursor.batch)
                .await
            {
                Ok(events) if events.is_empty() => {
                    cursor.after = cursor.after.max(head);
                    cursor.log.wait_for_append(cursor.after).await;
                }
                Ok(events) => cursor.buffer.extend(events),
                Err(e) => {
                    cursor.retry = true;
                    return Some((Err(e), cursor));
                }
            }
        }
    })
    .boxed()
}
