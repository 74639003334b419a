//! Core entity structs: events, generator documents, and vehicle telemetry.
//!
//! All structs serialize with `camelCase` field names, which is the shape
//! the gateway, the event log, and the materialized views all share.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{AggregateType, EventType};
use crate::ids::AggregateId;

/// The event type version every event emitted by this core carries.
pub const CURRENT_EVENT_TYPE_VERSION: u32 = 1;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An immutable domain event as persisted by the event log.
///
/// `aggregate_version` is assigned by the log at append time and is strictly
/// increasing per aggregate id. `position` is the global log cursor used to
/// resume a replay subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Global position of this event in the log.
    pub position: u64,
    /// Event type name (see [`EventType`]).
    pub event_type: String,
    /// Selects the data-shape migration applied on replay.
    pub event_type_version: u32,
    /// Type of the aggregate this event belongs to.
    pub aggregate_type: AggregateType,
    /// Identifier of the aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Per-aggregate sequence number assigned by the log.
    pub aggregate_version: u64,
    /// Event payload.
    pub data: serde_json::Value,
    /// Display name of the user (or `system`) that caused the event.
    pub user: String,
    /// Epoch milliseconds when the event was produced.
    pub timestamp: i64,
    /// Acknowledgement key the producer appended with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_key: Option<String>,
}

impl Event {
    /// The known event type, or `None` for event types this core does not handle.
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }
}

/// An event that has not been appended yet.
///
/// The log turns a `NewEvent` into an [`Event`] by assigning its position
/// and aggregate version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    /// Event type name.
    pub event_type: String,
    /// Data shape version of `data`.
    pub event_type_version: u32,
    /// Type of the aggregate this event belongs to.
    pub aggregate_type: AggregateType,
    /// Identifier of the aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Event payload.
    pub data: serde_json::Value,
    /// Display name of the user (or `system`) that caused the event.
    pub user: String,
    /// Epoch milliseconds when the event was produced.
    pub timestamp: i64,
}

impl NewEvent {
    /// Build an event of a known type at the current version, stamped now.
    pub fn new(
        event_type: EventType,
        aggregate_id: AggregateId,
        data: serde_json::Value,
        user: &str,
    ) -> Self {
        Self {
            event_type: event_type.as_str().to_owned(),
            event_type_version: CURRENT_EVENT_TYPE_VERSION,
            aggregate_type: event_type.aggregate_type(),
            aggregate_id,
            data,
            user: user.to_owned(),
            timestamp: now_millis(),
        }
    }

    /// Attach the log-assigned position and version.
    pub fn into_event(
        self,
        position: u64,
        aggregate_version: u64,
        ack_key: Option<String>,
    ) -> Event {
        Event {
            position,
            event_type: self.event_type,
            event_type_version: self.event_type_version,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            aggregate_version,
            data: self.data,
            user: self.user,
            timestamp: self.timestamp,
            ack_key,
        }
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Audit metadata stamped on every generator write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Metadata {
    /// Display name of the creator.
    pub created_by: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Display name of the last writer.
    pub updated_by: String,
    /// Last write time, epoch milliseconds.
    pub updated_at: i64,
}

impl Metadata {
    /// Metadata for a document created by `user` at `at`.
    pub fn created(user: &str, at: i64) -> Self {
        Self {
            created_by: user.to_owned(),
            created_at: at,
            updated_by: user.to_owned(),
            updated_at: at,
        }
    }
}

/// Materialized view document of a generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Generator {
    /// Aggregate identifier.
    pub id: AggregateId,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the generator is enabled.
    #[serde(default)]
    pub active: bool,
    /// Owning organization, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Audit metadata.
    pub metadata: Metadata,
}

/// Generator fields accepted by create and update commands.
///
/// Every field is optional so the same input drives a merge update, where
/// only the provided fields change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct GeneratorInput {
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the generator is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Owning organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Vehicle
// ---------------------------------------------------------------------------

/// The randomly generated content of a vehicle.
///
/// Field order is significant: the vehicle identity is the SHA-256 of this
/// struct's JSON serialization, whose key order follows declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct VehicleSpec {
    /// Body type (e.g. `SUV`).
    #[serde(rename = "type")]
    pub vehicle_type: String,
    /// Power source (e.g. `Electric`).
    pub power_source: String,
    /// Power rating in horsepower.
    pub hp: u32,
    /// Model year.
    pub year: u32,
    /// Top speed in km/h.
    pub top_speed: u32,
}

/// Materialized view document of a synthesized vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Vehicle {
    /// Content-derived identifier.
    pub id: AggregateId,
    /// Body type.
    #[serde(rename = "type")]
    pub vehicle_type: String,
    /// Power source.
    pub power_source: String,
    /// Power rating in horsepower.
    pub hp: u32,
    /// Model year.
    pub year: u32,
    /// Top speed in km/h.
    pub top_speed: u32,
    /// Epoch milliseconds when the vehicle was synthesized.
    pub timestamp: i64,
}

impl Vehicle {
    /// Assemble a vehicle document from its content, identity, and timestamp.
    pub fn new(id: AggregateId, spec: VehicleSpec, timestamp: i64) -> Self {
        Self {
            id,
            vehicle_type: spec.vehicle_type,
            power_source: spec.power_source,
            hp: spec.hp,
            year: spec.year,
            top_speed: spec.top_speed,
            timestamp,
        }
    }

    /// The content fields the identity is derived from.
    pub fn spec(&self) -> VehicleSpec {
        VehicleSpec {
            vehicle_type: self.vehicle_type.clone(),
            power_source: self.power_source.clone(),
            hp: self.hp,
            year: self.year,
            top_speed: self.top_speed,
        }
    }
}

/// Message published to the external telemetry topic for each vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct TelemetryMessage {
    /// Always [`AggregateType::Vehicle`].
    pub aggregate_type: AggregateType,
    /// Always `Generated`.
    pub event_name: String,
    /// Content-derived vehicle identifier.
    pub aggregate_id: AggregateId,
    /// Epoch milliseconds when the vehicle was synthesized.
    pub timestamp: i64,
    /// The vehicle content.
    pub data: VehicleSpec,
}

impl TelemetryMessage {
    /// Telemetry message announcing `vehicle`.
    pub fn generated(vehicle: &Vehicle) -> Self {
        Self {
            aggregate_type: AggregateType::Vehicle,
            event_name: String::from("Generated"),
            aggregate_id: vehicle.id.clone(),
            timestamp: vehicle.timestamp,
            data: vehicle.spec(),
        }
    }
}

/// Status carried by generation lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum GenerationStatus {
    /// A session began.
    Started,
    /// A session ended.
    Stopped,
}

/// Payload of `VehicleGenerationStarted` / `VehicleGenerationStopped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct GenerationLifecycle {
    /// Whether the session started or stopped.
    pub status: GenerationStatus,
    /// Epoch milliseconds of the transition.
    pub timestamp: i64,
}
