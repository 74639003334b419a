//! End-to-end scenarios over the wired service with in-memory stores.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleetgen_core::permission::RoleGate;
use fleetgen_core::scheduler::GenerationState;
use fleetgen_core::sink::{SinkError, TelemetrySink};
use fleetgen_core::synthesis::VEHICLE_GENERATED_TOPIC;
use fleetgen_core::{FleetService, ServiceSettings};
use fleetgen_db::{Collection, EventLog, MemoryEventLog, MemoryViewStore, ViewStore};
use fleetgen_events::Projector;
use fleetgen_types::{
    AggregateId, AggregateType, CallerIdentity, CommandRequest, CommandResponse,
    TelemetryMessage, Vehicle,
};
use futures::{FutureExt, StreamExt};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

#[derive(Clone, Default)]
struct CountingSink {
    published: Arc<AtomicUsize>,
}

impl TelemetrySink for CountingSink {
    async fn publish(&self, _message: &TelemetryMessage) -> Result<(), SinkError> {
        self.published.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

struct PanickingSink;

impl TelemetrySink for PanickingSink {
    async fn publish(&self, _message: &TelemetryMessage) -> Result<(), SinkError> {
        panic!("telemetry sink exploded");
    }
}

struct Harness<T> {
    service: FleetService<MemoryEventLog, T>,
    store: MemoryViewStore,
    log: MemoryEventLog,
}

fn harness<T: TelemetrySink>(sink: T) -> Harness<T> {
    let store = MemoryViewStore::new();
    let log = MemoryEventLog::new();
    let service = FleetService::new(
        store.clone(),
        log.clone(),
        sink,
        Arc::new(RoleGate),
        &ServiceSettings::default(),
    );
    Harness {
        service,
        store,
        log,
    }
}

fn writer() -> CallerIdentity {
    CallerIdentity::new("operator", ["GENERATOR_WRITE"])
}

fn reader() -> CallerIdentity {
    CallerIdentity::new("viewer", ["GENERATOR_READ"])
}

async fn call<T: TelemetrySink>(
    service: &FleetService<MemoryEventLog, T>,
    operation: &str,
    args: Value,
    identity: CallerIdentity,
) -> CommandResponse {
    service
        .dispatch(CommandRequest {
            operation: operation.to_owned(),
            args,
            identity,
        })
        .await
        .unwrap()
}

async fn create<T: TelemetrySink>(service: &FleetService<MemoryEventLog, T>, input: Value) -> String {
    let response = call(
        service,
        "Generator.mutation.GeneratorCreateGenerator",
        json!({ "input": input }),
        writer(),
    )
    .await;
    assert_eq!(response.code, 200, "{response:?}");
    response.data.unwrap()["id"].as_str().unwrap().to_owned()
}

fn expected_id(vehicle: &Vehicle) -> String {
    let canonical = format!(
        r#"{{"type":"{}","powerSource":"{}","hp":{},"year":{},"topSpeed":{}}}"#,
        vehicle.vehicle_type, vehicle.power_source, vehicle.hp, vehicle.year, vehicle.top_speed
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[tokio::test(start_paused = true)]
async fn generated_vehicle_reaches_live_subscribers_within_two_ticks() {
    let sink = CountingSink::default();
    let h = harness(sink.clone());
    let mut feed = h
        .service
        .subscribe(VEHICLE_GENERATED_TOPIC, Value::Null, &reader())
        .await
        .unwrap();

    let started = call(&h.service, "Vehicle.mutation.VehicleStartGeneration", Value::Null, writer()).await;
    assert_eq!(started.data.unwrap()["code"], json!(200));

    let delivered = tokio::time::timeout(Duration::from_millis(100), feed.next())
        .await
        .expect("a vehicle within two ticks")
        .unwrap();
    let vehicle: Vehicle =
        serde_json::from_value(delivered[VEHICLE_GENERATED_TOPIC].clone()).unwrap();
    assert_eq!(vehicle.id.as_str(), expected_id(&vehicle));

    h.service.shutdown().await;
    assert!(sink.published.load(Ordering::Acquire) >= 1);
}

#[tokio::test]
async fn created_generator_is_logged_at_version_one_and_readable() {
    let h = harness(CountingSink::default());
    let id = create(&h.service, json!({"name": "X", "active": true})).await;

    let events = h.log.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "GeneratorModified");
    assert_eq!(events[0].aggregate_version, 1);
    assert_eq!(events[0].aggregate_id.as_str(), id);

    let fetched = call(
        &h.service,
        "Generator.query.GeneratorGenerator",
        json!({ "id": id }),
        reader(),
    )
    .await;
    let document = fetched.data.unwrap();
    assert_eq!(document["name"], json!("X"));
    assert_eq!(document["active"], json!(true));
}

#[tokio::test]
async fn batch_delete_marks_every_requested_id() {
    let h = harness(CountingSink::default());
    let a = create(&h.service, json!({"name": "a"})).await;
    let b = create(&h.service, json!({"name": "b"})).await;

    let mut modified = h
        .service
        .subscribe("GeneratorGeneratorModified", json!({"id": "ANY"}), &reader())
        .await
        .unwrap();

    let response = call(
        &h.service,
        "Generator.mutation.GeneratorDeleteGenerators",
        json!({ "ids": [a, b, "missing"] }),
        writer(),
    )
    .await;
    assert_eq!(response.data.unwrap()["code"], json!(200));

    let markers: Vec<_> = h
        .log
        .events()
        .unwrap()
        .into_iter()
        .filter(|e| e.data["modType"] == json!("DELETE"))
        .map(|e| e.aggregate_id.into_inner())
        .collect();
    assert_eq!(markers.len(), 3);
    assert!(markers.contains(&String::from("missing")));

    let tombstone = modified.next().await.unwrap();
    assert_eq!(tombstone["GeneratorGeneratorModified"]["id"], json!("deleted"));
}

#[tokio::test(start_paused = true)]
async fn nothing_is_published_after_stop() {
    let h = harness(CountingSink::default());
    let mut feed = h
        .service
        .subscribe(VEHICLE_GENERATED_TOPIC, Value::Null, &reader())
        .await
        .unwrap();

    call(&h.service, "Vehicle.mutation.VehicleStartGeneration", Value::Null, writer()).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let stopped = call(&h.service, "Vehicle.mutation.VehicleStopGeneration", Value::Null, writer()).await;
    assert_eq!(stopped.data.unwrap()["code"], json!(200));
    assert_eq!(h.service.generation_state(), GenerationState::Idle);

    let before_stop: Vec<Value> =
        std::iter::from_fn(|| feed.next().now_or_never().flatten()).collect();
    assert!(!before_stop.is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(feed.next().now_or_never().is_none());
}

#[tokio::test(start_paused = true)]
async fn crashed_loop_returns_to_idle() {
    let h = harness(PanickingSink);

    call(&h.service, "Vehicle.mutation.VehicleStartGeneration", Value::Null, writer()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.service.generation_state(), GenerationState::Idle);

    let restarted = call(&h.service, "Vehicle.mutation.VehicleStartGeneration", Value::Null, writer()).await;
    assert_eq!(restarted.data.unwrap()["code"], json!(200));
    h.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_admit_exactly_one_session() {
    let h = harness(CountingSink::default());
    let service = Arc::new(h.service);

    let starts: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                call(&service, "Vehicle.mutation.VehicleStartGeneration", Value::Null, writer()).await
            })
        })
        .collect();

    let mut codes = Vec::new();
    for start in starts {
        codes.push(start.await.unwrap().data.unwrap()["code"].clone());
    }
    assert_eq!(codes.iter().filter(|c| **c == json!(200)).count(), 1);
    assert_eq!(codes.iter().filter(|c| **c == json!(400)).count(), 15);

    service.shutdown().await;
    let idle_stop = call(&service, "Vehicle.mutation.VehicleStopGeneration", Value::Null, writer()).await;
    assert_eq!(idle_stop.data.unwrap()["code"], json!(400));
}

#[tokio::test]
async fn denied_caller_never_reaches_the_handler() {
    let h = harness(CountingSink::default());
    let response = call(
        &h.service,
        "Generator.mutation.GeneratorCreateGenerator",
        json!({"input": {"name": "nope"}}),
        CallerIdentity::new("guest", ["SOMETHING_ELSE"]),
    )
    .await;

    assert_eq!(response.code, 2);
    assert!(h.log.events().unwrap().is_empty());
    assert_eq!(
        h.store.count(Collection::Generator, &fleetgen_types::Filter::all()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn replay_rebuilds_the_generator_view() {
    let h = harness(CountingSink::default());
    let kept = create(&h.service, json!({"name": "kept", "description": "first"})).await;
    let gone = create(&h.service, json!({"name": "gone"})).await;

    call(
        &h.service,
        "Generator.mutation.GeneratorUpdateGenerator",
        json!({"id": kept, "input": {"active": true}, "merge": true}),
        writer(),
    )
    .await;
    call(
        &h.service,
        "Generator.mutation.GeneratorUpdateGenerator",
        json!({"id": kept, "input": {"name": "renamed"}, "merge": false}),
        writer(),
    )
    .await;
    call(
        &h.service,
        "Generator.mutation.GeneratorDeleteGenerators",
        json!({"ids": [gone]}),
        writer(),
    )
    .await;

    let rebuilt = MemoryViewStore::new();
    let projector = Projector::new(rebuilt.clone());
    let head = projector
        .catch_up(&h.log, &AggregateType::ALL, 0, 2)
        .await
        .unwrap();
    assert_eq!(head, h.log.head().await.unwrap());

    let id = AggregateId::from(kept);
    let live = h.store.find(Collection::Generator, &id).await.unwrap().unwrap();
    let replayed = rebuilt.find(Collection::Generator, &id).await.unwrap().unwrap();
    assert_eq!(live, replayed);
    assert_eq!(replayed["name"], json!("renamed"));
    assert_eq!(replayed["description"], Value::Null);

    let removed = rebuilt
        .find(Collection::Generator, &AggregateId::from(gone))
        .await
        .unwrap();
    assert!(removed.is_none());
}

#[tokio::test(start_paused = true)]
async fn replaying_generated_vehicles_twice_keeps_one_document_each() {
    let h = harness(CountingSink::default());
    call(&h.service, "Vehicle.mutation.VehicleStartGeneration", Value::Null, writer()).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    h.service.shutdown().await;

    let projector = Projector::new(h.store.clone());
    projector.catch_up(&h.log, &[AggregateType::Vehicle], 0, 64).await.unwrap();
    let once = h.store.count(Collection::Vehicle, &fleetgen_types::Filter::all()).await.unwrap();
    projector.catch_up(&h.log, &[AggregateType::Vehicle], 0, 64).await.unwrap();
    let twice = h.store.count(Collection::Vehicle, &fleetgen_types::Filter::all()).await.unwrap();

    assert!(once >= 1);
    assert_eq!(once, twice);

    let listing = call(
        &h.service,
        "Vehicle.query.VehicleVehicleListing",
        json!({"paginationInput": {"page": 0, "count": 100, "queryTotalResultCount": true}}),
        reader(),
    )
    .await;
    assert_eq!(listing.data.unwrap()["queryTotalResultCount"], json!(once));
}
