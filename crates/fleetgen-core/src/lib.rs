//! Command handling, generation scheduling, and fanout for the fleetgen core.
//!
//! Commands arrive as `<AggregateType>.<query|mutation>.<Method>` keys with
//! a JSON argument payload and a caller identity. The router checks the
//! caller against the operation's role set, runs the bound handler, and
//! folds the outcome into a `{code, data | error}` envelope. Mutations
//! write the view store, append to the event log, and publish on the
//! fanout bridge. The generation scheduler produces one synthetic vehicle
//! per tick while a session is active.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `fleetgen-config.yaml` into
//!   strongly-typed structs.
//! - [`error`] -- [`CommandError`] and its envelope codes.
//! - [`permission`] -- [`PermissionGate`] capability and [`RoleGate`].
//! - [`router`] -- Operation keys and the [`CommandRouter`].
//! - [`generator`] -- Generator listing, lookup, and mutations.
//! - [`vehicle`] -- Vehicle listing, lookup, and generation control.
//! - [`fanout`] -- In-process live subscription bus.
//! - [`sink`] -- [`TelemetrySink`] for the external telemetry topic.
//! - [`synthesis`] -- Random vehicle synthesis and content identity.
//! - [`scheduler`] -- The single-flight [`GenerationScheduler`].
//! - [`service`] -- [`FleetService`], the wired command surface.
//!
//! [`CommandError`]: error::CommandError
//! [`PermissionGate`]: permission::PermissionGate
//! [`RoleGate`]: permission::RoleGate
//! [`CommandRouter`]: router::CommandRouter
//! [`TelemetrySink`]: sink::TelemetrySink
//! [`GenerationScheduler`]: scheduler::GenerationScheduler
//! [`FleetService`]: service::FleetService

pub mod config;
pub mod error;
pub mod fanout;
pub mod generator;
pub mod permission;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod sink;
pub mod synthesis;
pub mod vehicle;

pub use error::CommandError;
pub use service::{FleetService, ServiceSettings};
