//! Service binary for the fleetgen event-sourced core.
//!
//! Wires the command surface, the replay projector, and the generation
//! scheduler to `PostgreSQL` and NATS, then serves until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `fleetgen-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Replay the event log into the view store (catch-up)
//! 5. Connect to NATS and assemble the service
//! 6. Start the live projector, the fanout relay, and the command surface
//! 7. On Ctrl-C (or a fatal projection error), stop generation and drain

mod error;
mod nats_commands;
mod nats_sink;
mod projection;
mod relay;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fleetgen_core::config::{FleetgenConfig, LoggingConfig};
use fleetgen_core::permission::RoleGate;
use fleetgen_core::{FleetService, ServiceSettings};
use fleetgen_db::{PostgresConfig, PostgresPool};
use fleetgen_events::Projector;
use fleetgen_types::AggregateType;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats_sink::NatsTelemetrySink;

/// Configuration file, relative to the working directory.
const CONFIG_PATH: &str = "fleetgen-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails or projection halts on an
/// event it cannot apply.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = FleetgenConfig::from_file_or_default(Path::new(CONFIG_PATH))
        .map_err(EngineError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        service = %config.service.name,
        batch_size = config.event_log.batch_size,
        poll_interval_ms = config.event_log.poll_interval_ms,
        "fleetgen-engine starting"
    );

    // 3. Connect to PostgreSQL.
    let pg_config = PostgresConfig::new(&config.infrastructure.postgres_url)
        .with_max_connections(config.infrastructure.max_connections)
        .with_poll_interval(Duration::from_millis(config.event_log.poll_interval_ms));
    let pool = PostgresPool::connect(&pg_config)
        .await
        .map_err(EngineError::from)?;
    pool.run_migrations().await.map_err(EngineError::from)?;
    let log = pool.event_log();
    let store = pool.view_store();
    info!("PostgreSQL connected and migrated");

    // 4. Catch-up replay. Commands are served only after the view has
    //    caught up with the log.
    let projector = Projector::new(store.clone());
    let caught_up = projector
        .catch_up(&log, &AggregateType::ALL, 0, config.event_log.batch_size)
        .await
        .map_err(EngineError::from)?;
    info!(position = caught_up, "View store caught up");

    // 5. Connect to NATS and assemble the service.
    let nats_url = &config.infrastructure.nats_url;
    info!(nats_url = %nats_url, "Connecting to NATS");
    let client = async_nats::connect(nats_url)
        .await
        .map_err(|e| EngineError::Nats {
            message: format!("failed to connect to NATS at {nats_url}: {e}"),
        })?;
    info!("NATS connected");

    let sink = NatsTelemetrySink::new(client.clone(), config.topics.telemetry_topic.clone());
    let service = Arc::new(FleetService::new(
        store,
        log.clone(),
        sink,
        Arc::new(RoleGate),
        &ServiceSettings::from(&config),
    ));

    // 6. Background tasks.
    let (stop, shutdown) = watch::channel(false);

    let mut projection = tokio::spawn(projection::follow(
        projector,
        log,
        caught_up,
        shutdown.clone(),
    ));
    let relay = tokio::spawn(relay::run(
        client.clone(),
        config.topics.materialized_view_topic.clone(),
        service.fanout().tap(),
        shutdown.clone(),
    ));
    let commands = tokio::spawn(nats_commands::serve(
        client.clone(),
        config.topics.command_subject.clone(),
        Arc::clone(&service),
        shutdown,
    ));
    info!("fleetgen-engine ready");

    // 7. Run until interrupted or projection halts.
    let halted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(EngineError::from)?;
            info!("Shutdown requested");
            None
        }
        outcome = &mut projection => Some(outcome),
    };

    service.shutdown().await;
    stop.send_replace(true);

    let projection_result = match halted {
        Some(outcome) => outcome,
        None => projection.await,
    };
    if let Err(e) = relay.await {
        warn!(error = %e, "Fanout relay task failed");
    }
    match commands.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Command surface failed"),
        Err(e) => warn!(error = %e, "Command surface task failed"),
    }
    if let Err(e) = client.flush().await {
        warn!(error = %e, "Failed to flush NATS on shutdown");
    }
    pool.close().await;

    match projection_result {
        Ok(Ok(())) => {
            info!("fleetgen-engine shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "fleetgen-engine stopped on a projection error");
            Err(EngineError::from(e).into())
        }
        Err(e) => Err(EngineError::Task {
            message: format!("live projection task failed: {e}"),
        }
        .into()),
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
