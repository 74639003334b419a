//! The generation scheduler.
//!
//! A single-flight background loop that synthesizes one vehicle every
//! [`GENERATION_TICK_INTERVAL`] while a session is active. The state cell
//! holds the active session id (0 when idle) and only changes through
//! compare-and-swap, so among concurrent starts exactly one wins. Each
//! session runs under a supervisor task that resets the state when the
//! loop ends for any reason, panics included. Stop parks the cell at a
//! stopping sentinel, signals the session's cancel channel, joins the loop
//! and records the stop before the cell returns to idle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleetgen_db::{AppendOptions, EventLog};
use fleetgen_types::{
    AggregateId, EventType, GenerationLifecycle, GenerationStatus, NewEvent, StatusMessage,
    now_millis,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::CommandError;
use crate::sink::TelemetrySink;
use crate::synthesis::{SYSTEM_USER, VehiclePublisher, synthesize};

/// Time between generation ticks.
pub const GENERATION_TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Aggregate id of the generation lifecycle events.
pub const GENERATION_AGGREGATE_ID: &str = "vehicle-generation";

/// State cell value when no session is active.
const IDLE: u64 = 0;

/// State cell value while a stop is draining the loop.
const STOPPING: u64 = u64::MAX;

/// Whether a generation session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// No session.
    Idle,
    /// A session is producing vehicles.
    Generating,
    /// A stop is waiting for the loop to finish.
    Stopping,
}

struct Session {
    id: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Starts and stops the periodic vehicle generation loop.
pub struct GenerationScheduler<L, T> {
    state: Arc<AtomicU64>,
    next_session: AtomicU64,
    session: Mutex<Option<Session>>,
    publisher: Arc<VehiclePublisher<L, T>>,
    log: L,
    append_options: AppendOptions,
}

impl<L: EventLog, T: TelemetrySink> GenerationScheduler<L, T> {
    /// Create an idle scheduler.
    pub fn new(
        log: L,
        publisher: Arc<VehiclePublisher<L, T>>,
        append_options: AppendOptions,
    ) -> Self {
        Self {
            state: Arc::new(AtomicU64::new(IDLE)),
            next_session: AtomicU64::new(1),
            session: Mutex::new(None),
            publisher,
            log,
            append_options,
        }
    }

    /// Current state.
    pub fn state(&self) -> GenerationState {
        match self.state.load(Ordering::Acquire) {
            IDLE => GenerationState::Idle,
            STOPPING => GenerationState::Stopping,
            _ => GenerationState::Generating,
        }
    }

    /// Start a session on behalf of `user`.
    ///
    /// A second start while generating or stopping is a soft rejection,
    /// not an error. Fails only when the start event cannot be appended,
    /// in which case the scheduler stays idle.
    pub async fn start(&self, user: &str) -> Result<StatusMessage, CommandError> {
        let id = self.next_session.fetch_add(1, Ordering::AcqRel);
        if self
            .state
            .compare_exchange(IDLE, id, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(StatusMessage::rejected("Generation is already running"));
        }

        // Held until the session is installed, so a stop never sees a
        // claimed session without its start event.
        let mut slot = self.session.lock().await;
        if let Err(e) = self.record(GenerationStatus::Started, user).await {
            let _ = self
                .state
                .compare_exchange(id, IDLE, Ordering::AcqRel, Ordering::Acquire);
            return Err(e);
        }

        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(supervise(
            id,
            Arc::clone(&self.state),
            Arc::clone(&self.publisher),
            cancelled,
        ));
        // A session left behind by a crashed loop has already finished.
        *slot = Some(Session { id, cancel, handle });
        drop(slot);

        info!(session = id, user, "Generation started");
        Ok(StatusMessage::ok("Generation started"))
    }

    /// Stop the running session on behalf of `user`.
    ///
    /// The state stays [`GenerationState::Stopping`] until the loop has
    /// finished its in-flight tick and the stop is recorded, so nothing is
    /// published after this returns and no new session can begin before.
    /// Stopping while idle is a soft rejection.
    pub async fn stop(&self, user: &str) -> Result<StatusMessage, CommandError> {
        let mut slot = self.session.lock().await;
        let current = self.state.load(Ordering::Acquire);
        if current == IDLE
            || current == STOPPING
            || self
                .state
                .compare_exchange(current, STOPPING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return Ok(StatusMessage::rejected("Generation is not running"));
        }

        if let Some(session) = slot.take_if(|session| session.id == current) {
            session.cancel.send_replace(true);
            if let Err(e) = session.handle.await {
                warn!(session = session.id, error = %e, "Generation supervisor failed");
            }
        }

        let recorded = self.record(GenerationStatus::Stopped, user).await;
        self.state.store(IDLE, Ordering::Release);
        drop(slot);
        recorded?;

        info!(session = current, user, "Generation stopped");
        Ok(StatusMessage::ok("Generation stopped"))
    }

    /// Stop any running session. Used on process shutdown.
    pub async fn shutdown(&self) {
        if self.state() == GenerationState::Idle {
            return;
        }
        if let Err(e) = self.stop(SYSTEM_USER).await {
            warn!(error = %e, "Failed to record generation stop on shutdown");
        }
    }

    async fn record(&self, status: GenerationStatus, user: &str) -> Result<(), CommandError> {
        let event_type = match status {
            GenerationStatus::Started => EventType::VehicleGenerationStarted,
            GenerationStatus::Stopped => EventType::VehicleGenerationStopped,
        };
        let data = serde_json::to_value(GenerationLifecycle {
            status,
            timestamp: now_millis(),
        })?;
        self.log
            .append(
                NewEvent::new(event_type, AggregateId::from(GENERATION_AGGREGATE_ID), data, user),
                &self.append_options,
            )
            .await
            .map_err(CommandError::from_append)?;
        Ok(())
    }
}

/// Run one session's loop and reset the state when it ends.
async fn supervise<L: EventLog, T: TelemetrySink>(
    id: u64,
    state: Arc<AtomicU64>,
    publisher: Arc<VehiclePublisher<L, T>>,
    cancelled: watch::Receiver<bool>,
) {
    // The nested task turns a panic in the loop into a JoinError here.
    if let Err(e) = tokio::spawn(generate(publisher, cancelled)).await {
        error!(session = id, error = %e, "Generation loop died");
    }
    if state
        .compare_exchange(id, IDLE, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        info!(session = id, "Generation state reset to idle");
    }
}

async fn generate<L: EventLog, T: TelemetrySink>(
    publisher: Arc<VehiclePublisher<L, T>>,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(GENERATION_TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancelled.changed() => break,
            _ = ticker.tick() => {}
        }
        if *cancelled.borrow() {
            break;
        }

        match synthesize() {
            Ok(vehicle) => {
                publisher.publish(&vehicle).await;
            }
            Err(e) => warn!(error = %e, "Vehicle synthesis failed"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use fleetgen_db::MemoryEventLog;
    use fleetgen_types::{AggregateType, BAD_REQUEST_CODE, CODE_OK, TelemetryMessage};

    use super::*;
    use crate::fanout::FanoutBridge;
    use crate::permission::RoleGate;
    use crate::sink::SinkError;

    struct NullSink;

    impl TelemetrySink for NullSink {
        async fn publish(&self, _message: &TelemetryMessage) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn scheduler(log: &MemoryEventLog) -> GenerationScheduler<MemoryEventLog, NullSink> {
        let fanout = Arc::new(FanoutBridge::new(64, Arc::new(RoleGate)));
        let publisher = Arc::new(VehiclePublisher::new(
            log.clone(),
            NullSink,
            fanout,
            AppendOptions::default(),
        ));
        GenerationScheduler::new(log.clone(), publisher, AppendOptions::default())
    }

    #[tokio::test]
    async fn start_then_stop_records_lifecycle() {
        let log = MemoryEventLog::new();
        let scheduler = scheduler(&log);

        let started = scheduler.start("alice").await.unwrap();
        assert_eq!(started.code, CODE_OK);
        assert_eq!(scheduler.state(), GenerationState::Generating);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let stopped = scheduler.stop("alice").await.unwrap();
        assert_eq!(stopped.code, CODE_OK);
        assert_eq!(scheduler.state(), GenerationState::Idle);

        let events = log.events().unwrap();
        let first = events.first().unwrap();
        let last = events.last().unwrap();
        assert_eq!(first.event_type, "VehicleGenerationStarted");
        assert_eq!(last.event_type, "VehicleGenerationStopped");
        assert_eq!(first.user, "alice");
        assert!(events.iter().any(|e| e.event_type == "VehicleGenerated"));
    }

    #[tokio::test]
    async fn double_start_and_idle_stop_are_soft_rejections() {
        let log = MemoryEventLog::new();
        let scheduler = scheduler(&log);

        let rejected = scheduler.stop("alice").await.unwrap();
        assert_eq!(rejected.code, BAD_REQUEST_CODE);
        assert_eq!(rejected.message, "Generation is not running");

        scheduler.start("alice").await.unwrap();
        let rejected = scheduler.start("bob").await.unwrap();
        assert_eq!(rejected.code, BAD_REQUEST_CODE);
        assert_eq!(rejected.message, "Generation is already running");
        scheduler.stop("alice").await.unwrap();
    }

    #[tokio::test]
    async fn failed_start_append_leaves_scheduler_idle() {
        let log = MemoryEventLog::new();
        let scheduler = scheduler(&log);
        log.set_available(false);

        let err = scheduler.start("alice").await.unwrap_err();
        assert!(matches!(err, CommandError::Append(_)));
        assert_eq!(scheduler.state(), GenerationState::Idle);
    }

    #[tokio::test]
    async fn nothing_is_generated_after_stop_returns() {
        let log = MemoryEventLog::new();
        let scheduler = scheduler(&log);

        scheduler.start("alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop("alice").await.unwrap();

        let after_stop = log.read_after(0, &[AggregateType::Vehicle], usize::MAX).await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let later = log.read_after(0, &[AggregateType::Vehicle], usize::MAX).await.unwrap().len();
        assert_eq!(after_stop, later);
    }

    /// Holds every publish for a while and tracks how many overlap.
    #[derive(Default)]
    struct SlowSink {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TelemetrySink for Arc<SlowSink> {
        async fn publish(&self, _message: &TelemetryMessage) -> Result<(), SinkError> {
            let now = self.in_flight.fetch_add(1, Ordering::AcqRel).saturating_add(1);
            self.peak.fetch_max(now, Ordering::AcqRel);
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_during_draining_stop_is_rejected() {
        let log = MemoryEventLog::new();
        let sink = Arc::new(SlowSink::default());
        let fanout = Arc::new(FanoutBridge::new(64, Arc::new(RoleGate)));
        let publisher = Arc::new(VehiclePublisher::new(
            log.clone(),
            Arc::clone(&sink),
            fanout,
            AppendOptions::default(),
        ));
        let scheduler = Arc::new(GenerationScheduler::new(
            log.clone(),
            publisher,
            AppendOptions::default(),
        ));

        scheduler.start("a").await.unwrap();
        while sink.in_flight.load(Ordering::Acquire) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stopping = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.stop("a").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), GenerationState::Stopping);

        let restart = scheduler.start("b").await.unwrap();
        assert_eq!(restart.code, BAD_REQUEST_CODE);

        let stopped = stopping.await.unwrap().unwrap();
        assert_eq!(stopped.code, CODE_OK);
        assert_eq!(scheduler.state(), GenerationState::Idle);
        assert_eq!(sink.peak.load(Ordering::Acquire), 1);

        let lifecycle: Vec<String> = log
            .events()
            .unwrap()
            .into_iter()
            .filter(|e| e.aggregate_id.as_str() == GENERATION_AGGREGATE_ID)
            .map(|e| e.event_type)
            .collect();
        assert_eq!(lifecycle, ["VehicleGenerationStarted", "VehicleGenerationStopped"]);
    }

    #[tokio::test]
    async fn restart_after_stop_opens_a_new_session() {
        let log = MemoryEventLog::new();
        let scheduler = scheduler(&log);

        scheduler.start("alice").await.unwrap();
        scheduler.stop("alice").await.unwrap();
        let restarted = scheduler.start("alice").await.unwrap();
        assert_eq!(restarted.code, CODE_OK);
        assert_eq!(scheduler.state(), GenerationState::Generating);
        scheduler.shutdown().await;
        assert_eq!(scheduler.state(), GenerationState::Idle);
    }
}
