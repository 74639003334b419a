//! Event payload migrations keyed by `event_type_version`.
//!
//! Each version maps a stored payload to the current document shape.
//! Version 0 is never valid; unknown versions are rejected rather than
//! guessed at.

use fleetgen_db::Document;
use fleetgen_types::{Event, EventType, ModType};

use crate::error::ProjectionError;

/// Field carrying the modification kind in `GeneratorModified` payloads.
const MOD_TYPE_FIELD: &str = "modType";

/// A payload normalized to the current document shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    /// Modification kind, for event types that carry one.
    pub mod_type: Option<ModType>,
    /// Document fields to write.
    pub fields: Document,
}

impl Migrated {
    /// Whether the event is a delete marker.
    pub fn is_delete(&self) -> bool {
        self.mod_type == Some(ModType::Delete)
    }
}

/// Normalize `event.data` according to its payload version.
pub fn migrate(event: &Event) -> Result<Migrated, ProjectionError> {
    match event.event_type_version {
        1 => v1(event),
        version => Err(ProjectionError::InvalidEventVersion {
            event_type: event.event_type.clone(),
            version,
            position: event.position,
        }),
    }
}

fn v1(event: &Event) -> Result<Migrated, ProjectionError> {
    let serde_json::Value::Object(mut fields) = event.data.clone() else {
        return Err(malformed(event, "payload is not an object"));
    };

    if event.kind() != Some(EventType::GeneratorModified) {
        return Ok(Migrated {
            mod_type: None,
            fields,
        });
    }

    let mod_type = fields
        .remove(MOD_TYPE_FIELD)
        .ok_or_else(|| malformed(event, "missing modType"))
        .and_then(|raw| {
            serde_json::from_value::<ModType>(raw)
                .map_err(|e| malformed(event, &format!("unknown modType: {e}")))
        })?;

    Ok(Migrated {
        mod_type: Some(mod_type),
        fields,
    })
}

fn malformed(event: &Event, reason: &str) -> ProjectionError {
    ProjectionError::MalformedData {
        event_type: event.event_type.clone(),
        position: event.position,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fleetgen_types::{AggregateId, NewEvent};
    use serde_json::json;

    use super::*;

    fn event(kind: EventType, version: u32, data: serde_json::Value) -> Event {
        let mut new = NewEvent::new(kind, AggregateId::from("a"), data, "tester");
        new.event_type_version = version;
        new.into_event(1, 1, None)
    }

    #[test]
    fn version_zero_is_fatal() {
        let err = migrate(&event(EventType::VehicleGenerated, 0, json!({}))).unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidEventVersion { version: 0, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_version_is_fatal() {
        let err = migrate(&event(EventType::VehicleGenerated, 7, json!({}))).unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidEventVersion { version: 7, .. }));
    }

    #[test]
    fn generator_payload_loses_mod_type() {
        let migrated = migrate(&event(
            EventType::GeneratorModified,
            1,
            json!({"modType": "UPDATE_MERGE", "name": "X"}),
        ))
        .unwrap();
        assert_eq!(migrated.mod_type, Some(ModType::UpdateMerge));
        assert!(!migrated.fields.contains_key("modType"));
        assert_eq!(migrated.fields.get("name"), Some(&json!("X")));
        assert!(!migrated.is_delete());
    }

    #[test]
    fn delete_marker_is_recognized() {
        let migrated = migrate(&event(EventType::GeneratorModified, 1, json!({"modType": "DELETE"}))).unwrap();
        assert!(migrated.is_delete());
    }

    #[test]
    fn vehicle_payload_passes_through() {
        let migrated = migrate(&event(EventType::VehicleGenerated, 1, json!({"hp": 100}))).unwrap();
        assert_eq!(migrated.mod_type, None);
        assert_eq!(migrated.fields.get("hp"), Some(&json!(100)));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        let err = migrate(&event(EventType::VehicleGenerated, 1, json!([1]))).unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedData { .. }));
    }

    #[test]
    fn missing_mod_type_is_malformed() {
        let err = migrate(&event(EventType::GeneratorModified, 1, json!({"name": "X"}))).unwrap_err();
        assert!(err.is_fatal());
    }
}
