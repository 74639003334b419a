//! Vehicle command handlers.
//!
//! Vehicle documents are only ever written by the projector; this module
//! reads them and drives the generation scheduler.

use std::sync::Arc;

use fleetgen_db::{Collection, Document, EventLog, ViewStore};
use fleetgen_types::{
    AggregateId, CallerIdentity, ListQuery, Listing, ListingArgs, Sort, StatusMessage,
    VehicleFilterInput,
};
use serde::Deserialize;

use crate::error::CommandError;
use crate::scheduler::GenerationScheduler;
use crate::sink::TelemetrySink;

/// Default listing sort field.
pub const VEHICLE_RECENCY_FIELD: &str = "timestamp";

/// Arguments naming one vehicle.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleIdArgs {
    /// Vehicle id.
    pub id: AggregateId,
}

/// Handlers for the vehicle aggregate.
pub struct VehicleHandlers<S, L, T> {
    store: S,
    scheduler: Arc<GenerationScheduler<L, T>>,
}

impl<S: ViewStore, L: EventLog, T: TelemetrySink> VehicleHandlers<S, L, T> {
    /// Create the handlers.
    pub const fn new(store: S, scheduler: Arc<GenerationScheduler<L, T>>) -> Self {
        Self { store, scheduler }
    }

    /// `VehicleVehicleListing`: newest vehicles first unless a sort is given.
    pub async fn listing(
        &self,
        args: ListingArgs<VehicleFilterInput>,
    ) -> Result<Listing<Document>, CommandError> {
        let query = ListQuery {
            filter: args.filter_input.unwrap_or_default().to_filter(),
            pagination: args.pagination_input.unwrap_or_default(),
            sort: args
                .sort_input
                .unwrap_or_else(|| Sort::descending(VEHICLE_RECENCY_FIELD)),
        };

        if query.pagination.query_total_result_count {
            let (listing, total) = futures::try_join!(
                self.store.list(Collection::Vehicle, &query),
                self.store.count(Collection::Vehicle, &query.filter)
            )?;
            Ok(Listing {
                listing,
                query_total_result_count: Some(total),
            })
        } else {
            Ok(Listing {
                listing: self.store.list(Collection::Vehicle, &query).await?,
                query_total_result_count: None,
            })
        }
    }

    /// `VehicleVehicle`: one vehicle, or `None`.
    pub async fn get(&self, args: &VehicleIdArgs) -> Result<Option<Document>, CommandError> {
        Ok(self.store.find(Collection::Vehicle, &args.id).await?)
    }

    /// `VehicleStartGeneration`.
    pub async fn start(&self, identity: &CallerIdentity) -> Result<StatusMessage, CommandError> {
        self.scheduler.start(&identity.display_name).await
    }

    /// `VehicleStopGeneration`.
    pub async fn stop(&self, identity: &CallerIdentity) -> Result<StatusMessage, CommandError> {
        self.scheduler.stop(&identity.display_name).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fleetgen_db::{AppendOptions, MemoryEventLog, MemoryViewStore};
    use fleetgen_types::{AggregateType, Pagination, TelemetryMessage, Vehicle, VehicleSpec};
    use serde_json::json;

    use super::*;
    use crate::fanout::FanoutBridge;
    use crate::permission::RoleGate;
    use crate::sink::SinkError;
    use crate::synthesis::VehiclePublisher;

    struct NullSink;

    impl TelemetrySink for NullSink {
        async fn publish(&self, _message: &TelemetryMessage) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn handlers(store: MemoryViewStore) -> VehicleHandlers<MemoryViewStore, MemoryEventLog, NullSink> {
        let log = MemoryEventLog::new();
        let fanout = Arc::new(FanoutBridge::new(16, Arc::new(RoleGate)));
        let publisher = Arc::new(VehiclePublisher::new(
            log.clone(),
            NullSink,
            fanout,
            AppendOptions::default(),
        ));
        let scheduler = Arc::new(GenerationScheduler::new(log, publisher, AppendOptions::default()));
        VehicleHandlers::new(store, scheduler)
    }

    async fn seed(store: &MemoryViewStore, id: &str, vehicle_type: &str, timestamp: i64) {
        let vehicle = Vehicle::new(
            AggregateId::from(id),
            VehicleSpec {
                vehicle_type: vehicle_type.to_owned(),
                power_source: String::from("Electric"),
                hp: 100,
                year: 2020,
                top_speed: 200,
            },
            timestamp,
        );
        let document = serde_json::to_value(&vehicle).unwrap().as_object().cloned().unwrap();
        store
            .upsert(AggregateType::Vehicle.into(), &vehicle.id, document, 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_filtered() {
        let store = MemoryViewStore::new();
        seed(&store, "a", "SUV", 1).await;
        seed(&store, "b", "Sedan", 2).await;
        seed(&store, "c", "SUV", 3).await;
        let handlers = handlers(store);

        let listing = handlers
            .listing(ListingArgs {
                filter_input: Some(VehicleFilterInput {
                    vehicle_type: Some(String::from("suv")),
                    ..VehicleFilterInput::default()
                }),
                pagination_input: Some(Pagination {
                    page: 0,
                    count: 10,
                    query_total_result_count: true,
                }),
                sort_input: None,
            })
            .await
            .unwrap();

        let ids: Vec<_> = listing.listing.iter().filter_map(|d| d.get("id")).collect();
        assert_eq!(ids, vec![&json!("c"), &json!("a")]);
        assert_eq!(listing.query_total_result_count, Some(2));
    }

    #[tokio::test]
    async fn get_missing_vehicle_is_none() {
        let handlers = handlers(MemoryViewStore::new());
        let found = handlers
            .get(&VehicleIdArgs {
                id: AggregateId::from("nope"),
            })
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn start_and_stop_use_the_caller_name() {
        let handlers = handlers(MemoryViewStore::new());
        let operator = CallerIdentity::new("operator", ["GENERATOR_WRITE"]);

        assert_eq!(handlers.start(&operator).await.unwrap().code, 200);
        assert_eq!(handlers.start(&operator).await.unwrap().code, 400);
        assert_eq!(handlers.stop(&operator).await.unwrap().code, 200);
        assert_eq!(handlers.stop(&operator).await.unwrap().code, 400);
    }
}
