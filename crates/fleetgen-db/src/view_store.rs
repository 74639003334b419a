//! The view store contract.
//!
//! Materialized views are JSON documents keyed by `(collection, id)`. The
//! store is an explicit seam: handlers and the projector are generic over
//! [`ViewStore`] and the engine picks the `PostgreSQL` implementation while
//! tests use [`MemoryViewStore`](crate::memory::MemoryViewStore).

use std::fmt;
use std::future::Future;

use fleetgen_types::{AggregateId, AggregateType, Filter, ListQuery};

use crate::error::DbError;

/// A materialized view document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A logical group of view documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Generator definitions.
    Generator,
    /// Synthesized vehicles.
    Vehicle,
    /// Generation session lifecycle records.
    GenerationLifecycle,
}

impl Collection {
    /// Name stored in the `collection` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generator => "Generator",
            Self::Vehicle => "Vehicle",
            Self::GenerationLifecycle => "VehicleGeneration",
        }
    }
}

impl From<AggregateType> for Collection {
    fn from(value: AggregateType) -> Self {
        match value {
            AggregateType::Generator => Self::Generator,
            AggregateType::Vehicle => Self::Vehicle,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document operations on materialized views.
///
/// Every stored document carries an `id` field equal to its key; writes
/// stamp it so callers never have to.
pub trait ViewStore: Clone + Send + Sync + 'static {
    /// Fetch one document, or `None` if it does not exist.
    fn find(
        &self,
        collection: Collection,
        id: &AggregateId,
    ) -> impl Future<Output = Result<Option<Document>, DbError>> + Send;

    /// List documents matching the query's filter, sorted and paginated.
    ///
    /// Documents missing the sort field order last in both directions.
    fn list(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> impl Future<Output = Result<Vec<Document>, DbError>> + Send;

    /// Count documents matching `filter`.
    fn count(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Insert a new document.
    ///
    /// Fails with [`DbError::Duplicate`] if the id is taken.
    fn insert(
        &self,
        collection: Collection,
        id: &AggregateId,
        document: Document,
    ) -> impl Future<Output = Result<Document, DbError>> + Send;

    /// Overwrite the given top-level fields of an existing document.
    ///
    /// Returns the updated document, or `None` if it does not exist.
    fn merge(
        &self,
        collection: Collection,
        id: &AggregateId,
        fields: Document,
    ) -> impl Future<Output = Result<Option<Document>, DbError>> + Send;

    /// Replace an existing document wholesale.
    ///
    /// Returns the new document, or `None` if it does not exist.
    fn replace(
        &self,
        collection: Collection,
        id: &AggregateId,
        document: Document,
    ) -> impl Future<Output = Result<Option<Document>, DbError>> + Send;

    /// Merge `fields` into the document, creating it if absent, and record
    /// the aggregate version that produced it.
    ///
    /// The version is stored but not compared: the last write wins.
    fn upsert(
        &self,
        collection: Collection,
        id: &AggregateId,
        fields: Document,
        aggregate_version: u64,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Delete one document. Returns whether it existed.
    fn delete(
        &self,
        collection: Collection,
        id: &AggregateId,
    ) -> impl Future<Output = Result<bool, DbError>> + Send;

    /// Delete every listed document. Returns how many existed.
    fn delete_many(
        &self,
        collection: Collection,
        ids: &[AggregateId],
    ) -> impl Future<Output = Result<u64, DbError>> + Send;
}

/// Copy of `document` with its `id` field set to `id`.
pub(crate) fn stamp_id(mut document: Document, id: &AggregateId) -> Document {
    document.insert(
        String::from("id"),
        serde_json::Value::String(id.as_str().to_owned()),
    );
    document
}

/// Split a dotted field path into its segments.
pub(crate) fn path_segments(field: &str) -> Vec<String> {
    field
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}
