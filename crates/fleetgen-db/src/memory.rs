//! In-memory event log and view store.
//!
//! Used by tests and local runs without `PostgreSQL`. Both stores can be
//! switched to an unavailable state to exercise failure handling.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use fleetgen_types::{AggregateId, AggregateType, Event, Filter, ListQuery, NewEvent};
use tokio::sync::watch;

use crate::error::DbError;
use crate::event_log::{AppendOptions, EventLog};
use crate::json_path;
use crate::view_store::{Collection, Document, ViewStore, stamp_id};

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LogState {
    events: Vec<Event>,
    versions: HashMap<AggregateId, u64>,
}

struct LogInner {
    state: Mutex<LogState>,
    head: watch::Sender<u64>,
    available: AtomicBool,
}

/// In-memory [`EventLog`].
#[derive(Clone)]
pub struct MemoryEventLog {
    inner: Arc<LogInner>,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: Arc::new(LogInner {
                state: Mutex::new(LogState::default()),
                head,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Make every operation fail with [`DbError::Unavailable`] (or succeed
    /// again).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of every event in position order.
    pub fn events(&self) -> Result<Vec<Event>, DbError> {
        Ok(self.lock()?.events.clone())
    }

    fn check(&self) -> Result<(), DbError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::Unavailable(String::from("event log is offline")))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LogState>, DbError> {
        self.inner
            .state
            .lock()
            .map_err(|e| DbError::Unavailable(format!("event log lock poisoned: {e}")))
    }

    fn append_now(&self, event: NewEvent, options: &AppendOptions) -> Result<Event, DbError> {
        self.check()?;
        let stored = {
            let mut state = self.lock()?;
            let version = state
                .versions
                .get(&event.aggregate_id)
                .copied()
                .unwrap_or(0)
                .checked_add(1)
                .ok_or_else(|| DbError::Corrupt(String::from("aggregate version overflow")))?;
            let position = u64::try_from(state.events.len())
                .ok()
                .and_then(|len| len.checked_add(1))
                .ok_or_else(|| DbError::Corrupt(String::from("position overflow")))?;
            state.versions.insert(event.aggregate_id.clone(), version);
            let stored = event.into_event(position, version, options.ack_key.clone());
            state.events.push(stored.clone());
            stored
        };
        self.inner.head.send_replace(stored.position);
        Ok(stored)
    }

    fn read_now(
        &self,
        after: u64,
        aggregate_types: &[AggregateType],
        limit: usize,
    ) -> Result<Vec<Event>, DbError> {
        self.check()?;
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.position > after && aggregate_types.contains(&e.aggregate_type))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl EventLog for MemoryEventLog {
    async fn append(&self, event: NewEvent, options: &AppendOptions) -> Result<Event, DbError> {
        self.append_now(event, options)
    }

    async fn read_after(
        &self,
        after: u64,
        aggregate_types: &[AggregateType],
        limit: usize,
    ) -> Result<Vec<Event>, DbError> {
        self.read_now(after, aggregate_types, limit)
    }

    async fn head(&self) -> Result<u64, DbError> {
        self.check()?;
        Ok(*self.inner.head.borrow())
    }

    async fn wait_for_append(&self, after: u64) {
        let mut head = self.inner.head.subscribe();
        // The sender lives as long as `self`, so this only ends on append.
        let _ = head.wait_for(|position| *position > after).await;
    }
}

// ---------------------------------------------------------------------------
// View store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    aggregate_version: Option<u64>,
}

type Documents = BTreeMap<(Collection, String), StoredDocument>;

/// In-memory [`ViewStore`].
#[derive(Clone)]
pub struct MemoryViewStore {
    documents: Arc<RwLock<Documents>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryViewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryViewStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(BTreeMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Make every operation fail with [`DbError::Unavailable`] (or succeed
    /// again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The aggregate version recorded by the last upsert of a document.
    pub fn recorded_version(&self, collection: Collection, id: &AggregateId) -> Option<u64> {
        self.documents
            .read()
            .ok()?
            .get(&(collection, id.as_str().to_owned()))?
            .aggregate_version
    }

    fn check(&self) -> Result<(), DbError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::Unavailable(String::from("view store is offline")))
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Documents) -> T) -> Result<T, DbError> {
        self.check()?;
        let documents = self
            .documents
            .read()
            .map_err(|e| DbError::Unavailable(format!("view store lock poisoned: {e}")))?;
        Ok(f(&documents))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Documents) -> T) -> Result<T, DbError> {
        self.check()?;
        let mut documents = self
            .documents
            .write()
            .map_err(|e| DbError::Unavailable(format!("view store lock poisoned: {e}")))?;
        Ok(f(&mut documents))
    }

    fn matching(documents: &Documents, collection: Collection, filter: &Filter) -> Vec<Document> {
        documents
            .iter()
            .filter(|((c, _), stored)| {
                *c == collection && json_path::matches(&stored.document, filter)
            })
            .map(|(_, stored)| stored.document.clone())
            .collect()
    }
}

fn key(collection: Collection, id: &AggregateId) -> (Collection, String) {
    (collection, id.as_str().to_owned())
}

impl ViewStore for MemoryViewStore {
    async fn find(
        &self,
        collection: Collection,
        id: &AggregateId,
    ) -> Result<Option<Document>, DbError> {
        self.read(|docs| docs.get(&key(collection, id)).map(|s| s.document.clone()))
    }

    async fn list(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> Result<Vec<Document>, DbError> {
        let mut found = self.read(|docs| Self::matching(docs, collection, &query.filter))?;
        // Stable sort over id order gives the same `id ASC` tiebreak as SQL.
        found.sort_by(|a, b| json_path::compare(a, b, &query.sort));
        let offset = usize::try_from(query.pagination.offset()).unwrap_or(usize::MAX);
        let count = usize::try_from(query.pagination.count).unwrap_or(usize::MAX);
        Ok(found.into_iter().skip(offset).take(count).collect())
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, DbError> {
        let total = self.read(|docs| Self::matching(docs, collection, filter).len())?;
        Ok(u64::try_from(total).unwrap_or(u64::MAX))
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &AggregateId,
        document: Document,
    ) -> Result<Document, DbError> {
        let document = stamp_id(document, id);
        let inserted = self.write(|docs| {
            let slot = key(collection, id);
            if docs.contains_key(&slot) {
                return false;
            }
            docs.insert(
                slot,
                StoredDocument {
                    document: document.clone(),
                    aggregate_version: None,
                },
            );
            true
        })?;
        if inserted {
            Ok(document)
        } else {
            Err(DbError::Duplicate(format!("{collection}/{id}")))
        }
    }

    async fn merge(
        &self,
        collection: Collection,
        id: &AggregateId,
        fields: Document,
    ) -> Result<Option<Document>, DbError> {
        self.write(|docs| {
            docs.get_mut(&key(collection, id)).map(|stored| {
                stored.document.extend(stamp_id(fields, id));
                stored.document.clone()
            })
        })
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &AggregateId,
        document: Document,
    ) -> Result<Option<Document>, DbError> {
        self.write(|docs| {
            docs.get_mut(&key(collection, id)).map(|stored| {
                stored.document = stamp_id(document, id);
                stored.document.clone()
            })
        })
    }

    async fn upsert(
        &self,
        collection: Collection,
        id: &AggregateId,
        fields: Document,
        aggregate_version: u64,
    ) -> Result<(), DbError> {
        self.write(|docs| {
            let stored = docs.entry(key(collection, id)).or_insert_with(|| StoredDocument {
                document: Document::new(),
                aggregate_version: None,
            });
            stored.document.extend(stamp_id(fields, id));
            stored.aggregate_version = Some(aggregate_version);
        })
    }

    async fn delete(&self, collection: Collection, id: &AggregateId) -> Result<bool, DbError> {
        self.write(|docs| docs.remove(&key(collection, id)).is_some())
    }

    async fn delete_many(
        &self,
        collection: Collection,
        ids: &[AggregateId],
    ) -> Result<u64, DbError> {
        let removed = self.write(|docs| {
            ids.iter()
                .filter(|id| docs.remove(&key(collection, id)).is_some())
                .count()
        })?;
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}
