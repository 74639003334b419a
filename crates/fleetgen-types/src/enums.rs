//! Enumeration types shared across the workspace.
//!
//! Aggregate types, the domain event types each aggregate emits, the
//! modification kind carried inside `GeneratorModified` payloads, and the
//! operation type segment of a command key.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The two aggregate types served by this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum AggregateType {
    /// The static, user-managed generator resource.
    Generator,
    /// The fast-moving synthetic vehicle telemetry producer.
    Vehicle,
}

impl AggregateType {
    /// Every aggregate type, in a stable order.
    pub const ALL: [Self; 2] = [Self::Generator, Self::Vehicle];

    /// Canonical name, as used in operation keys and the event log.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generator => "Generator",
            Self::Vehicle => "Vehicle",
        }
    }

    /// Parse a canonical aggregate type name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Generator" => Some(Self::Generator),
            "Vehicle" => Some(Self::Vehicle),
            _ => None,
        }
    }
}

impl core::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain event types known to this core.
///
/// The event log stores event types as free-form strings so that events
/// written by newer versions remain readable; [`EventType::parse`] maps the
/// known ones back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum EventType {
    /// A generator was created, updated, or deleted.
    GeneratorModified,
    /// The scheduler synthesized a vehicle.
    VehicleGenerated,
    /// A generation session started.
    VehicleGenerationStarted,
    /// A generation session stopped.
    VehicleGenerationStopped,
}

impl EventType {
    /// Canonical event type name as persisted in the log.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeneratorModified => "GeneratorModified",
            Self::VehicleGenerated => "VehicleGenerated",
            Self::VehicleGenerationStarted => "VehicleGenerationStarted",
            Self::VehicleGenerationStopped => "VehicleGenerationStopped",
        }
    }

    /// Parse a persisted event type name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "GeneratorModified" => Some(Self::GeneratorModified),
            "VehicleGenerated" => Some(Self::VehicleGenerated),
            "VehicleGenerationStarted" => Some(Self::VehicleGenerationStarted),
            "VehicleGenerationStopped" => Some(Self::VehicleGenerationStopped),
            _ => None,
        }
    }

    /// The aggregate type that emits this event.
    pub const fn aggregate_type(self) -> AggregateType {
        match self {
            Self::GeneratorModified => AggregateType::Generator,
            Self::VehicleGenerated
            | Self::VehicleGenerationStarted
            | Self::VehicleGenerationStopped => AggregateType::Vehicle,
        }
    }

    /// Whether this is a generation session lifecycle marker.
    pub const fn is_lifecycle(self) -> bool {
        matches!(
            self,
            Self::VehicleGenerationStarted | Self::VehicleGenerationStopped
        )
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of modification recorded in a `GeneratorModified` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ModType {
    /// A new generator was created.
    Create,
    /// Fields were merged into an existing generator.
    UpdateMerge,
    /// An existing generator was replaced wholesale.
    UpdateReplace,
    /// The generator was deleted (delete marker).
    Delete,
}

/// Second segment of an operation key: read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum OperationType {
    /// A read operation.
    Query,
    /// A state-changing operation.
    Mutation,
}

impl OperationType {
    /// Lowercase name used in operation keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }

    /// Parse the lowercase operation type name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "query" => Some(Self::Query),
            "mutation" => Some(Self::Mutation),
            _ => None,
        }
    }
}
