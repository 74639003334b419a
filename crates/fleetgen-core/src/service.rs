//! Service wiring.
//!
//! [`FleetService`] binds the generator and vehicle handlers to their
//! operation keys, owns the fanout bridge and the generation scheduler, and
//! exposes the two live subscriptions. It is the single object a transport
//! needs to serve the command surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use fleetgen_db::{AppendOptions, EventLog, ViewStore};
use fleetgen_types::{AggregateType, CallerIdentity, CommandRequest, CommandResponse};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::FleetgenConfig;
use crate::error::CommandError;
use crate::fanout::{FanoutBridge, matching_id, non_empty};
use crate::generator::{GENERATOR_MODIFIED_TOPIC, GeneratorHandlers};
use crate::permission::PermissionGate;
use crate::router::{CommandRouter, OperationKey, parse_args};
use crate::scheduler::{GenerationScheduler, GenerationState};
use crate::sink::TelemetrySink;
use crate::synthesis::{VEHICLE_GENERATED_TOPIC, VehiclePublisher};
use crate::vehicle::VehicleHandlers;

/// The settings [`FleetService`] needs from the full configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Acknowledgement key attached to every append.
    pub acknowledge_key: String,
    /// Roles allowed to query and subscribe.
    pub read_roles: BTreeSet<String>,
    /// Roles allowed to mutate.
    pub write_roles: BTreeSet<String>,
    /// Per-topic fanout buffer.
    pub fanout_capacity: usize,
}

impl From<&FleetgenConfig> for ServiceSettings {
    fn from(config: &FleetgenConfig) -> Self {
        Self {
            acknowledge_key: config.service.acknowledge_key.clone(),
            read_roles: config.roles.read.clone(),
            write_roles: config.roles.write.clone(),
            fanout_capacity: config.fanout.capacity,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&FleetgenConfig::default())
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionArgs {
    id: String,
}

/// The assembled command and subscription surface.
pub struct FleetService<L, T> {
    router: CommandRouter,
    fanout: Arc<FanoutBridge>,
    scheduler: Arc<GenerationScheduler<L, T>>,
    read_roles: BTreeSet<String>,
}

impl<L: EventLog, T: TelemetrySink> FleetService<L, T> {
    /// Wire every operation over `store`, `log` and `sink`.
    pub fn new<S: ViewStore>(
        store: S,
        log: L,
        sink: T,
        gate: Arc<dyn PermissionGate>,
        settings: &ServiceSettings,
    ) -> Self {
        let append_options = AppendOptions::acknowledged(&settings.acknowledge_key);
        let fanout = Arc::new(FanoutBridge::new(settings.fanout_capacity, Arc::clone(&gate)));
        let publisher = Arc::new(VehiclePublisher::new(
            log.clone(),
            sink,
            Arc::clone(&fanout),
            append_options.clone(),
        ));
        let scheduler = Arc::new(GenerationScheduler::new(
            log.clone(),
            publisher,
            append_options.clone(),
        ));

        let generators = Arc::new(GeneratorHandlers::new(
            store.clone(),
            log,
            Arc::clone(&fanout),
            append_options,
        ));
        let vehicles = Arc::new(VehicleHandlers::new(store, Arc::clone(&scheduler)));

        let mut router = CommandRouter::new(gate);
        register_generator_routes(&mut router, &generators, settings);
        register_vehicle_routes(&mut router, &vehicles, settings);
        info!(operations = router.operations().count(), "Command routes registered");

        Self {
            router,
            fanout,
            scheduler,
            read_roles: settings.read_roles.clone(),
        }
    }

    /// Run one command through the router.
    ///
    /// # Errors
    ///
    /// Returns the re-thrown [`CommandError::StoreTimeout`]; every other
    /// outcome is an envelope.
    pub async fn dispatch(&self, request: CommandRequest) -> Result<CommandResponse, CommandError> {
        self.router.dispatch(request).await
    }

    /// Open a live subscription by name.
    ///
    /// `GeneratorGeneratorModified` takes `{id}` and delivers changes to that
    /// generator, or to every generator when `id` is `"ANY"`.
    /// `VehicleVehicleGenerated` delivers every generated vehicle.
    ///
    /// # Errors
    ///
    /// [`CommandError::PermissionDenied`] without a read role,
    /// [`CommandError::UnknownOperation`] for any other name, and
    /// [`CommandError::InvalidArguments`] for malformed variables.
    pub async fn subscribe(
        &self,
        name: &str,
        variables: Value,
        identity: &CallerIdentity,
    ) -> Result<BoxStream<'static, Value>, CommandError> {
        let predicate = match name {
            GENERATOR_MODIFIED_TOPIC => {
                let args: SubscriptionArgs = parse_args(variables)?;
                matching_id(&args.id)
            }
            VEHICLE_GENERATED_TOPIC => non_empty(),
            other => return Err(CommandError::UnknownOperation(other.to_owned())),
        };
        self.fanout
            .subscribe(name, identity, &self.read_roles, predicate)
            .await
    }

    /// The fanout bridge, for relays.
    pub const fn fanout(&self) -> &Arc<FanoutBridge> {
        &self.fanout
    }

    /// The command router.
    pub const fn router(&self) -> &CommandRouter {
        &self.router
    }

    /// Whether a generation session is running.
    pub fn generation_state(&self) -> GenerationState {
        self.scheduler.state()
    }

    /// Stop any running generation session.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

fn to_json<V: Serialize>(value: &V) -> Result<Value, CommandError> {
    Ok(serde_json::to_value(value)?)
}

fn register_generator_routes<S: ViewStore, L: EventLog>(
    router: &mut CommandRouter,
    handlers: &Arc<GeneratorHandlers<S, L>>,
    settings: &ServiceSettings,
) {
    let h = Arc::clone(handlers);
    router.register(
        OperationKey::query(AggregateType::Generator, "GeneratorGeneratorListing"),
        settings.read_roles.clone(),
        move |args, _identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.listing(parse_args(args)?).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::query(AggregateType::Generator, "GeneratorGenerator"),
        settings.read_roles.clone(),
        move |args, _identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.get(&parse_args(args)?).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::mutation(AggregateType::Generator, "GeneratorCreateGenerator"),
        settings.write_roles.clone(),
        move |args, identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.create(parse_args(args)?, &identity).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::mutation(AggregateType::Generator, "GeneratorUpdateGenerator"),
        settings.write_roles.clone(),
        move |args, identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.update(parse_args(args)?, &identity).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::mutation(AggregateType::Generator, "GeneratorDeleteGenerators"),
        settings.write_roles.clone(),
        move |args, identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.delete(&parse_args(args)?, &identity).await?) }
        },
    );
}

fn register_vehicle_routes<S: ViewStore, L: EventLog, T: TelemetrySink>(
    router: &mut CommandRouter,
    handlers: &Arc<VehicleHandlers<S, L, T>>,
    settings: &ServiceSettings,
) {
    let h = Arc::clone(handlers);
    router.register(
        OperationKey::query(AggregateType::Vehicle, "VehicleVehicleListing"),
        settings.read_roles.clone(),
        move |args, _identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.listing(parse_args(args)?).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::query(AggregateType::Vehicle, "VehicleVehicle"),
        settings.read_roles.clone(),
        move |args, _identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.get(&parse_args(args)?).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::mutation(AggregateType::Vehicle, "VehicleStartGeneration"),
        settings.write_roles.clone(),
        move |_args, identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.start(&identity).await?) }
        },
    );

    let h = Arc::clone(handlers);
    router.register(
        OperationKey::mutation(AggregateType::Vehicle, "VehicleStopGeneration"),
        settings.write_roles.clone(),
        move |_args, identity| {
            let h = Arc::clone(&h);
            async move { to_json(&h.stop(&identity).await?) }
        },
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fleetgen_db::{MemoryEventLog, MemoryViewStore};
    use fleetgen_types::TelemetryMessage;
    use serde_json::json;

    use super::*;
    use crate::permission::RoleGate;
    use crate::sink::SinkError;

    struct NullSink;

    impl TelemetrySink for NullSink {
        async fn publish(&self, _message: &TelemetryMessage) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn service() -> FleetService<MemoryEventLog, NullSink> {
        FleetService::new(
            MemoryViewStore::new(),
            MemoryEventLog::new(),
            NullSink,
            Arc::new(RoleGate),
            &ServiceSettings::default(),
        )
    }

    #[test]
    fn settings_follow_config() {
        let config = FleetgenConfig::parse("roles:\n  read: [VIEWER]\nfanout:\n  capacity: 8\n").unwrap();
        let settings = ServiceSettings::from(&config);
        assert!(settings.read_roles.contains("VIEWER"));
        assert!(settings.write_roles.contains("GENERATOR_WRITE"));
        assert_eq!(settings.fanout_capacity, 8);
    }

    #[tokio::test]
    async fn registers_every_operation() {
        let service = service();
        let keys: Vec<String> = service.router().operations().map(ToString::to_string).collect();
        for expected in [
            "Generator.query.GeneratorGeneratorListing",
            "Generator.query.GeneratorGenerator",
            "Generator.mutation.GeneratorCreateGenerator",
            "Generator.mutation.GeneratorUpdateGenerator",
            "Generator.mutation.GeneratorDeleteGenerators",
            "Vehicle.query.VehicleVehicleListing",
            "Vehicle.query.VehicleVehicle",
            "Vehicle.mutation.VehicleStartGeneration",
            "Vehicle.mutation.VehicleStopGeneration",
        ] {
            assert!(keys.iter().any(|k| k == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn reader_cannot_mutate() {
        let service = service();
        let response = service
            .dispatch(CommandRequest {
                operation: String::from("Generator.mutation.GeneratorCreateGenerator"),
                args: json!({"input": {"name": "x"}}),
                identity: CallerIdentity::new("reader", ["GENERATOR_READ"]),
            })
            .await
            .unwrap();
        assert_eq!(response.code, 2);
    }

    #[tokio::test]
    async fn unknown_subscription_is_rejected() {
        let service = service();
        let err = service
            .subscribe("Nope", Value::Null, &CallerIdentity::new("r", ["GENERATOR_READ"]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CommandError::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn subscription_requires_read_role() {
        let service = service();
        let err = service
            .subscribe(
                VEHICLE_GENERATED_TOPIC,
                Value::Null,
                &CallerIdentity::new("w", ["GENERATOR_WRITE"]),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CommandError::PermissionDenied { .. }));
    }
}
