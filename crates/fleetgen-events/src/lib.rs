//! Event replay projection for the fleetgen core.
//!
//! The event log is the source of truth; this crate rebuilds the view
//! store from it. Payloads pass through a version-keyed migration before
//! they are written, and every write is an idempotent upsert or delete
//! keyed by aggregate id.
//!
//! # Modules
//!
//! - [`migration`] -- Payload migrations by `event_type_version`
//! - [`projector`] -- Catch-up and live projection into the view store
//! - [`error`] -- Projection error types

pub mod error;
pub mod migration;
pub mod projector;

pub use error::ProjectionError;
pub use migration::{Migrated, migrate};
pub use projector::{Applied, Phase, Projector};
