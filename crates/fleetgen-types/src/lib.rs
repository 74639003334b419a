//! Shared type definitions for the fleetgen event-sourced core.
//!
//! This crate is the single source of truth for the types that cross crate
//! and process boundaries: events, view documents, the command envelope,
//! and listing queries. Wire types derive `ts-rs` bindings for the gateway
//! and front end.
//!
//! # Modules
//!
//! - [`ids`] -- Aggregate identifier wrapper
//! - [`enums`] -- Aggregate types, event types, modification kinds
//! - [`structs`] -- Events, generator and vehicle documents, telemetry
//! - [`envelope`] -- Command request, caller identity, response envelope
//! - [`query`] -- Filters, pagination, sorting, listing results

pub mod enums;
pub mod envelope;
pub mod ids;
pub mod query;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{AggregateType, EventType, ModType, OperationType};
pub use envelope::{
    BAD_REQUEST_CODE, CODE_OK, CallerIdentity, CommandRequest, CommandResponse,
    INTERNAL_SERVER_ERROR_CODE, NOT_FOUND_CODE, PERMISSION_DENIED_CODE, ResponseError,
    StatusMessage,
};
pub use ids::AggregateId;
pub use query::{
    FieldPredicate, Filter, GeneratorFilterInput, ListQuery, Listing, ListingArgs, Matcher,
    Pagination, Sort, VehicleFilterInput,
};
pub use structs::{
    CURRENT_EVENT_TYPE_VERSION, Event, GenerationLifecycle, GenerationStatus, Generator,
    GeneratorInput, Metadata, NewEvent, TelemetryMessage, Vehicle, VehicleSpec, now_millis,
};
