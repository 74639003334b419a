//! `PostgreSQL` event log.
//!
//! Appends run in a transaction holding a transaction-scoped advisory
//! lock. That serializes writers, so the `BIGSERIAL` position becomes
//! visible in commit order and a subscriber reading `position > cursor`
//! never skips a late-committing event. The `(aggregate_id,
//! aggregate_version)` unique constraint backs the MAX + 1 version
//! assignment.

use std::time::Duration;

use fleetgen_types::{AggregateId, AggregateType, Event, NewEvent};
use sqlx::PgPool;

use crate::error::DbError;
use crate::event_log::{AppendOptions, EventLog};

/// Advisory lock key shared by all event log writers.
const APPEND_LOCK_KEY: i64 = 0x0066_6c65_6574_6c6f;

/// `PostgreSQL`-backed [`EventLog`].
#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgEventLog {
    /// Create an event log bound to a connection pool.
    pub const fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    /// All events of one aggregate in version order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn events_for_aggregate(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<Event>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r"SELECT position, event_type, event_type_version, aggregate_type, aggregate_id,
                     aggregate_version, data, user_name, timestamp, ack_key
              FROM events
              WHERE aggregate_id = $1
              ORDER BY aggregate_version",
        )
        .bind(aggregate_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }
}

impl EventLog for PgEventLog {
    async fn append(&self, event: NewEvent, options: &AppendOptions) -> Result<Event, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(aggregate_version) FROM events WHERE aggregate_id = $1")
                .bind(event.aggregate_id.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let version = current.unwrap_or(0).checked_add(1).ok_or_else(|| {
            DbError::Corrupt(format!("aggregate version overflow for {}", event.aggregate_id))
        })?;

        let type_version = i32::try_from(event.event_type_version).unwrap_or(i32::MAX);
        let position: i64 = sqlx::query_scalar(
            r"INSERT INTO events (event_type, event_type_version, aggregate_type, aggregate_id,
                                  aggregate_version, data, user_name, timestamp, ack_key)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
              RETURNING position",
        )
        .bind(&event.event_type)
        .bind(type_version)
        .bind(event.aggregate_type.as_str())
        .bind(event.aggregate_id.as_str())
        .bind(version)
        .bind(&event.data)
        .bind(&event.user)
        .bind(event.timestamp)
        .bind(options.ack_key.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            aggregate_version = version,
            position,
            "Appended event"
        );

        Ok(event.into_event(
            to_unsigned(position, "position")?,
            to_unsigned(version, "aggregate_version")?,
            options.ack_key.clone(),
        ))
    }

    async fn read_after(
        &self,
        after: u64,
        aggregate_types: &[AggregateType],
        limit: usize,
    ) -> Result<Vec<Event>, DbError> {
        let types: Vec<String> = aggregate_types
            .iter()
            .map(|t| t.as_str().to_owned())
            .collect();
        let rows = sqlx::query_as::<_, EventRow>(
            r"SELECT position, event_type, event_type_version, aggregate_type, aggregate_id,
                     aggregate_version, data, user_name, timestamp, ack_key
              FROM events
              WHERE position > $1 AND aggregate_type = ANY($2)
              ORDER BY position
              LIMIT $3",
        )
        .bind(i64::try_from(after).unwrap_or(i64::MAX))
        .bind(&types)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn head(&self) -> Result<u64, DbError> {
        let head: Option<i64> = sqlx::query_scalar("SELECT MAX(position) FROM events")
            .fetch_one(&self.pool)
            .await?;
        to_unsigned(head.unwrap_or(0), "position")
    }

    async fn wait_for_append(&self, _after: u64) {
        tokio::time::sleep(self.poll_interval).await;
    }
}

/// A row from the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Global position.
    pub position: i64,
    /// Event type name.
    pub event_type: String,
    /// Payload schema version.
    pub event_type_version: i32,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Aggregate instance id.
    pub aggregate_id: String,
    /// Per-aggregate version.
    pub aggregate_version: i64,
    /// Event payload.
    pub data: serde_json::Value,
    /// Actor that caused the event.
    pub user_name: String,
    /// Event time in epoch milliseconds.
    pub timestamp: i64,
    /// Acknowledgement key, if the writer supplied one.
    pub ack_key: Option<String>,
}

impl TryFrom<EventRow> for Event {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let aggregate_type = AggregateType::parse(&row.aggregate_type).ok_or_else(|| {
            DbError::Corrupt(format!(
                "unknown aggregate type {:?} at position {}",
                row.aggregate_type, row.position
            ))
        })?;

        Ok(Self {
            position: to_unsigned(row.position, "position")?,
            event_type: row.event_type,
            event_type_version: u32::try_from(row.event_type_version).map_err(|e| {
                DbError::Corrupt(format!("negative event type version at {}: {e}", row.position))
            })?,
            aggregate_type,
            aggregate_id: AggregateId::from(row.aggregate_id),
            aggregate_version: to_unsigned(row.aggregate_version, "aggregate_version")?,
            data: row.data,
            user: row.user_name,
            timestamp: row.timestamp,
            ack_key: row.ack_key,
        })
    }
}

fn to_unsigned(value: i64, column: &str) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|e| DbError::Corrupt(format!("negative {column} {value}: {e}")))
}
