//! `PostgreSQL` view store.
//!
//! Documents live in one `view_documents` table as JSONB, keyed by
//! `(collection, id)`. Filters and sorts address fields by dotted path and
//! are translated to `#>` / `#>>` path operators with bound parameters.

use fleetgen_types::{AggregateId, Filter, ListQuery, Matcher};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::DbError;
use crate::view_store::{Collection, Document, ViewStore, path_segments, stamp_id};

/// `PostgreSQL`-backed [`ViewStore`].
#[derive(Clone)]
pub struct PgViewStore {
    pool: PgPool,
}

impl PgViewStore {
    /// Create a view store bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ViewStore for PgViewStore {
    async fn find(
        &self,
        collection: Collection,
        id: &AggregateId,
    ) -> Result<Option<Document>, DbError> {
        let value: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT document FROM view_documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        value.map(into_document).transpose()
    }

    async fn list(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> Result<Vec<Document>, DbError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT document FROM view_documents WHERE collection = ",
        );
        builder.push_bind(collection.as_str());
        push_filter(&mut builder, &query.filter);

        builder.push(" ORDER BY document #> ");
        builder.push_bind(path_segments(&query.sort.field));
        builder.push(if query.sort.ascending {
            " ASC NULLS LAST"
        } else {
            " DESC NULLS LAST"
        });
        builder.push(", id ASC LIMIT ");
        builder.push_bind(i64::from(query.pagination.count));
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(query.pagination.offset()).unwrap_or(i64::MAX));

        let values = builder
            .build_query_scalar::<serde_json::Value>()
            .fetch_all(&self.pool)
            .await?;

        values.into_iter().map(into_document).collect()
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, DbError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM view_documents WHERE collection = ",
        );
        builder.push_bind(collection.as_str());
        push_filter(&mut builder, filter);

        let total = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &AggregateId,
        document: Document,
    ) -> Result<Document, DbError> {
        let document = stamp_id(document, id);
        let inserted = sqlx::query(
            r"INSERT INTO view_documents (collection, id, document)
              VALUES ($1, $2, $3)
              ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(collection.as_str())
        .bind(id.as_str())
        .bind(serde_json::Value::Object(document.clone()))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(DbError::Duplicate(format!("{collection}/{id}")));
        }
        Ok(document)
    }

    async fn merge(
        &self,
        collection: Collection,
        id: &AggregateId,
        fields: Document,
    ) -> Result<Option<Document>, DbError> {
        let value: Option<serde_json::Value> = sqlx::query_scalar(
            r"UPDATE view_documents
              SET document = document || $3, updated_at = now()
              WHERE collection = $1 AND id = $2
              RETURNING document",
        )
        .bind(collection.as_str())
        .bind(id.as_str())
        .bind(serde_json::Value::Object(stamp_id(fields, id)))
        .fetch_optional(&self.pool)
        .await?;

        value.map(into_document).transpose()
    }

    async fn replace(
        &self,
        collection: Collection,
        id: &AggregateId,
        document: Document,
    ) -> Result<Option<Document>, DbError> {
        let value: Option<serde_json::Value> = sqlx::query_scalar(
            r"UPDATE view_documents
              SET document = $3, updated_at = now()
              WHERE collection = $1 AND id = $2
              RETURNING document",
        )
        .bind(collection.as_str())
        .bind(id.as_str())
        .bind(serde_json::Value::Object(stamp_id(document, id)))
        .fetch_optional(&self.pool)
        .await?;

        value.map(into_document).transpose()
    }

    async fn upsert(
        &self,
        collection: Collection,
        id: &AggregateId,
        fields: Document,
        aggregate_version: u64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO view_documents (collection, id, document, aggregate_version)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (collection, id) DO UPDATE
              SET document = view_documents.document || EXCLUDED.document,
                  aggregate_version = EXCLUDED.aggregate_version,
                  updated_at = now()",
        )
        .bind(collection.as_str())
        .bind(id.as_str())
        .bind(serde_json::Value::Object(stamp_id(fields, id)))
        .bind(i64::try_from(aggregate_version).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &AggregateId) -> Result<bool, DbError> {
        let deleted = sqlx::query("DELETE FROM view_documents WHERE collection = $1 AND id = $2")
            .bind(collection.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn delete_many(
        &self,
        collection: Collection,
        ids: &[AggregateId],
    ) -> Result<u64, DbError> {
        let ids: Vec<&str> = ids.iter().map(AggregateId::as_str).collect();
        let deleted =
            sqlx::query("DELETE FROM view_documents WHERE collection = $1 AND id = ANY($2)")
                .bind(collection.as_str())
                .bind(&ids)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(deleted)
    }
}

/// Append one `AND` clause per predicate.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    for predicate in &filter.predicates {
        let path = path_segments(&predicate.field);
        match &predicate.matcher {
            Matcher::Exact(value) => {
                builder.push(" AND document #> ");
                builder.push_bind(path);
                builder.push(" = ");
                builder.push_bind(value.clone());
            }
            Matcher::Contains(needle) => {
                builder.push(" AND document #>> ");
                builder.push_bind(path);
                builder.push(" ILIKE ");
                builder.push_bind(format!("%{}%", escape_like(needle)));
            }
        }
    }
}

/// Escape `ILIKE` wildcards so the needle matches literally.
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn into_document(value: serde_json::Value) -> Result<Document, DbError> {
    match value {
        serde_json::Value::Object(document) => Ok(document),
        other => Err(DbError::Corrupt(format!("view document is not an object: {other}"))),
    }
}
