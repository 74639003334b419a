//! Telemetry synthesis and publication.
//!
//! Each generation tick draws one random [`VehicleSpec`], derives the
//! vehicle id from the SHA-256 of the spec's JSON, and publishes the
//! result to three sinks independently: the external telemetry sink, the
//! fanout bridge, and the event log. A failing sink is logged and never
//! blocks the others.

use std::ops::RangeInclusive;
use std::sync::Arc;

use fleetgen_db::{AppendOptions, EventLog};
use fleetgen_types::{
    AggregateId, EventType, NewEvent, TelemetryMessage, Vehicle, VehicleSpec, now_millis,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::fanout::FanoutBridge;
use crate::sink::TelemetrySink;

/// Body types a vehicle can have.
pub const VEHICLE_TYPES: [&str; 7] = [
    "Sedan",
    "SUV",
    "Hatchback",
    "Coupe",
    "Convertible",
    "Truck",
    "Van",
];

/// Power sources a vehicle can have.
pub const POWER_SOURCES: [&str; 5] = ["Gasoline", "Diesel", "Electric", "Hybrid", "Hydrogen"];

/// Horsepower range.
pub const HP_RANGE: RangeInclusive<u32> = 50..=549;

/// Model year range.
pub const YEAR_RANGE: RangeInclusive<u32> = 2000..=2024;

/// Top speed range.
pub const TOP_SPEED_RANGE: RangeInclusive<u32> = 100..=299;

/// Fanout topic for generated vehicles.
pub const VEHICLE_GENERATED_TOPIC: &str = "VehicleVehicleGenerated";

/// User recorded on generated vehicle events.
pub const SYSTEM_USER: &str = "system";

fn pick<R: Rng>(rng: &mut R, choices: &[&'static str]) -> &'static str {
    let idx = rng.random_range(0..choices.len().max(1));
    choices.get(idx).copied().unwrap_or_default()
}

/// Draw a random vehicle spec.
pub fn random_spec() -> VehicleSpec {
    let mut rng = rand::rng();
    VehicleSpec {
        vehicle_type: pick(&mut rng, &VEHICLE_TYPES).to_owned(),
        power_source: pick(&mut rng, &POWER_SOURCES).to_owned(),
        hp: rng.random_range(HP_RANGE),
        year: rng.random_range(YEAR_RANGE),
        top_speed: rng.random_range(TOP_SPEED_RANGE),
    }
}

/// Lowercase hex SHA-256 of the spec's JSON serialization.
pub fn content_id(spec: &VehicleSpec) -> Result<AggregateId, serde_json::Error> {
    let bytes = serde_json::to_vec(spec)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(AggregateId::from(format!("{:x}", hasher.finalize())))
}

/// Synthesize one vehicle stamped with the current time.
pub fn synthesize() -> Result<Vehicle, serde_json::Error> {
    let spec = random_spec();
    let id = content_id(&spec)?;
    Ok(Vehicle::new(id, spec, now_millis()))
}

/// Which sinks accepted a publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// The external telemetry sink.
    pub telemetry: bool,
    /// The fanout bridge (true even with no subscribers).
    pub fanout: bool,
    /// The event log.
    pub event_log: bool,
}

/// Publishes generated vehicles to every sink.
pub struct VehiclePublisher<L, T> {
    log: L,
    sink: T,
    fanout: Arc<FanoutBridge>,
    append_options: AppendOptions,
}

impl<L: EventLog, T: TelemetrySink> VehiclePublisher<L, T> {
    /// Create a publisher. `append_options` carries the acknowledgement key.
    pub const fn new(
        log: L,
        sink: T,
        fanout: Arc<FanoutBridge>,
        append_options: AppendOptions,
    ) -> Self {
        Self {
            log,
            sink,
            fanout,
            append_options,
        }
    }

    /// Publish `vehicle` to all three sinks.
    pub async fn publish(&self, vehicle: &Vehicle) -> PublishReport {
        let document = match serde_json::to_value(vehicle) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, aggregate_id = %vehicle.id, "Vehicle serialization failed");
                return PublishReport::default();
            }
        };

        let message = TelemetryMessage::generated(vehicle);
        let event = NewEvent::new(
            EventType::VehicleGenerated,
            vehicle.id.clone(),
            document.clone(),
            SYSTEM_USER,
        );

        let (telemetry, appended) = tokio::join!(
            self.sink.publish(&message),
            self.log.append(event, &self.append_options)
        );
        self.fanout.publish(VEHICLE_GENERATED_TOPIC, document);

        if let Err(e) = &telemetry {
            warn!(sink = "telemetry", error = %e, aggregate_id = %vehicle.id, "Publish failed");
        }
        if let Err(e) = &appended {
            warn!(sink = "event_log", error = %e, aggregate_id = %vehicle.id, "Publish failed");
        }

        PublishReport {
            telemetry: telemetry.is_ok(),
            fanout: true,
            event_log: appended.is_ok(),
        }
    }
}
