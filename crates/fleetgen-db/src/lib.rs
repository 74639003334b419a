//! Data layer for the fleetgen core: the event log and the view store.
//!
//! The event log is the source of truth; the view store holds the
//! materialized documents that queries read. Both are traits so the
//! command handlers and the projector stay storage-agnostic.
//!
//! # Architecture (CQRS)
//!
//! ```text
//! Command handler
//!     |
//!     +-- write view ---------> ViewStore  (PgViewStore | MemoryViewStore)
//!     |
//!     +-- append event -------> EventLog   (PgEventLog  | MemoryEventLog)
//!                                   |
//!                                   +-- subscribe --> projector --> ViewStore
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`event_log`] -- Event log trait and restartable subscriptions
//! - [`event_store`] -- `PostgreSQL` event log
//! - [`view_store`] -- View store trait and collections
//! - [`document_store`] -- `PostgreSQL` view store
//! - [`memory`] -- In-memory implementations of both
//! - [`json_path`] -- Dotted-path filter and sort evaluation
//! - [`error`] -- Shared error types

pub mod document_store;
pub mod error;
pub mod event_log;
pub mod event_store;
pub mod json_path;
pub mod memory;
pub mod postgres;
pub mod view_store;

// Re-export primary types for convenience.
pub use document_store::PgViewStore;
pub use error::DbError;
pub use event_log::{AppendOptions, DEFAULT_READ_BATCH, EventLog, subscription};
pub use event_store::{EventRow, PgEventLog};
pub use memory::{MemoryEventLog, MemoryViewStore};
pub use postgres::{PostgresConfig, PostgresPool};
pub use view_store::{Collection, Document, ViewStore};
