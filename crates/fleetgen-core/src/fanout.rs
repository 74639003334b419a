//! The fanout bridge.
//!
//! An in-process publish/subscribe bus keyed by event name (for example
//! `GeneratorGeneratorModified`). Publishing is best-effort: subscribers
//! that fall behind skip what overflowed their buffer. Every publication is
//! also copied to a tap that the engine relays to the broker.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use fleetgen_types::CallerIdentity;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::permission::{PermissionGate, ensure_allowed};

/// Decides per delivery whether a subscriber receives a payload.
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// One publication, as seen by the relay tap.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Event name the payload was published under.
    pub topic: String,
    /// The published payload.
    pub payload: Value,
}

/// Per-topic broadcast channels plus a tap of every publication.
pub struct FanoutBridge {
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    tap: broadcast::Sender<Publication>,
    capacity: usize,
    gate: Arc<dyn PermissionGate>,
}

impl FanoutBridge {
    /// Create a bridge whose channels buffer `capacity` payloads each.
    pub fn new(capacity: usize, gate: Arc<dyn PermissionGate>) -> Self {
        let capacity = capacity.max(1);
        let (tap, _) = broadcast::channel(capacity);
        Self {
            topics: Mutex::new(HashMap::new()),
            tap,
            capacity,
            gate,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Returns how many topic subscribers received it. Having none is not
    /// an error.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        // The tap has no receivers when no relay runs.
        let _ = self.tap.send(Publication {
            topic: topic.to_owned(),
            payload: payload.clone(),
        });
        let delivered = self.sender(topic).send(payload).unwrap_or(0);
        debug!(topic, delivered, "Fanout publish");
        delivered
    }

    /// Receive a copy of every publication on any topic.
    pub fn tap(&self) -> broadcast::Receiver<Publication> {
        self.tap.subscribe()
    }

    /// Subscribe to `topic` after the permission check.
    ///
    /// Yields `{<topic>: payload}` for each payload `predicate` accepts.
    /// The stream ends only if the bridge is dropped.
    pub async fn subscribe(
        &self,
        topic: &str,
        identity: &CallerIdentity,
        required_roles: &BTreeSet<String>,
        predicate: Predicate,
    ) -> Result<BoxStream<'static, Value>, CommandError> {
        ensure_allowed(self.gate.as_ref(), identity, required_roles, topic).await?;

        let receiver = self.sender(topic).subscribe();
        let name = topic.to_owned();

        Ok(futures::stream::unfold(receiver, move |mut receiver| {
            let name = name.clone();
            let predicate = Arc::clone(&predicate);
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) if predicate(&payload) => {
                            let mut wrapped = serde_json::Map::new();
                            wrapped.insert(name, payload);
                            return Some((Value::Object(wrapped), receiver));
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %name, skipped, "Subscriber lagged, skipping payloads");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed())
    }
}

/// Accept payloads whose `id` equals `id`, or every payload when `id` is
/// `"ANY"`.
pub fn matching_id(id: &str) -> Predicate {
    let id = id.to_owned();
    Arc::new(move |payload: &Value| {
        id == "ANY" || payload.get("id").and_then(Value::as_str) == Some(id.as_str())
    })
}

/// Accept every non-empty payload.
pub fn non_empty() -> Predicate {
    Arc::new(|payload: &Value| match payload {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}
