//! Generator command handlers.
//!
//! Mutations write the view store directly, append a `GeneratorModified`
//! event tagged with its `modType`, and publish the resulting document on
//! `GeneratorGeneratorModified`. The three effects are not atomic; replay
//! reconciles the view from the log.

use std::sync::Arc;

use fleetgen_db::{AppendOptions, Collection, Document, EventLog, ViewStore};
use fleetgen_types::{
    AggregateId, CallerIdentity, EventType, Generator, GeneratorFilterInput,
    GeneratorInput, ListQuery, Listing, ListingArgs, Metadata, ModType, NewEvent, Sort,
    StatusMessage, now_millis,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::CommandError;
use crate::fanout::FanoutBridge;

/// Fanout topic for generator changes.
pub const GENERATOR_MODIFIED_TOPIC: &str = "GeneratorGeneratorModified";

/// Default listing sort field.
pub const GENERATOR_RECENCY_FIELD: &str = "metadata.updatedAt";

/// Arguments naming one generator.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorIdArgs {
    /// Generator id.
    pub id: AggregateId,
}

/// Arguments of `GeneratorCreateGenerator`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGeneratorArgs {
    /// Initial field values.
    #[serde(default)]
    pub input: GeneratorInput,
}

/// Arguments of `GeneratorUpdateGenerator`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateGeneratorArgs {
    /// Generator id.
    pub id: AggregateId,
    /// New field values.
    #[serde(default)]
    pub input: GeneratorInput,
    /// Merge the given fields (`true`) or replace the document (`false`).
    #[serde(default = "default_merge")]
    pub merge: bool,
}

const fn default_merge() -> bool {
    true
}

/// Arguments of `GeneratorDeleteGenerators`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteGeneratorsArgs {
    /// Generators to delete.
    pub ids: Vec<AggregateId>,
}

/// Handlers for the generator aggregate.
pub struct GeneratorHandlers<S, L> {
    store: S,
    log: L,
    fanout: Arc<FanoutBridge>,
    append_options: AppendOptions,
}

impl<S: ViewStore, L: EventLog> GeneratorHandlers<S, L> {
    /// Create the handlers.
    pub const fn new(
        store: S,
        log: L,
        fanout: Arc<FanoutBridge>,
        append_options: AppendOptions,
    ) -> Self {
        Self {
            store,
            log,
            fanout,
            append_options,
        }
    }

    /// `GeneratorGeneratorListing`: filtered, sorted, paginated listing.
    ///
    /// The total count, when requested, runs concurrently with the page
    /// query and is not point-in-time consistent with it.
    pub async fn listing(
        &self,
        args: ListingArgs<GeneratorFilterInput>,
    ) -> Result<Listing<Document>, CommandError> {
        let query = ListQuery {
            filter: args.filter_input.unwrap_or_default().to_filter(),
            pagination: args.pagination_input.unwrap_or_default(),
            sort: args
                .sort_input
                .unwrap_or_else(|| Sort::descending(GENERATOR_RECENCY_FIELD)),
        };

        if query.pagination.query_total_result_count {
            let (listing, total) = futures::try_join!(
                self.store.list(Collection::Generator, &query),
                self.store.count(Collection::Generator, &query.filter)
            )?;
            Ok(Listing {
                listing,
                query_total_result_count: Some(total),
            })
        } else {
            Ok(Listing {
                listing: self.store.list(Collection::Generator, &query).await?,
                query_total_result_count: None,
            })
        }
    }

    /// `GeneratorGenerator`: one generator, or `None`.
    pub async fn get(&self, args: &GeneratorIdArgs) -> Result<Option<Document>, CommandError> {
        Ok(self.store.find(Collection::Generator, &args.id).await?)
    }

    /// `GeneratorCreateGenerator`.
    pub async fn create(
        &self,
        args: CreateGeneratorArgs,
        identity: &CallerIdentity,
    ) -> Result<Document, CommandError> {
        let input = args.input;
        let generator = Generator {
            id: AggregateId::random(),
            name: input.name.unwrap_or_default(),
            description: input.description,
            active: input.active.unwrap_or(false),
            organization_id: input.organization_id,
            metadata: Metadata::created(&identity.display_name, now_millis()),
        };
        let document = to_document(&generator)?;

        let created = self
            .store
            .insert(Collection::Generator, &generator.id, document)
            .await?;
        self.record(&generator.id, ModType::Create, created.clone(), identity)
            .await?;
        self.fanout
            .publish(GENERATOR_MODIFIED_TOPIC, Value::Object(created.clone()));

        info!(generator_id = %generator.id, user = %identity.display_name, "Generator created");
        Ok(created)
    }

    /// `GeneratorUpdateGenerator`: merge or replace, stamping the update
    /// metadata either way.
    pub async fn update(
        &self,
        args: UpdateGeneratorArgs,
        identity: &CallerIdentity,
    ) -> Result<Document, CommandError> {
        let id = args.id;
        let existing = self
            .store
            .find(Collection::Generator, &id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("generator {id}")))?;

        let now = now_millis();
        let metadata = existing
            .get("metadata")
            .cloned()
            .and_then(|m| serde_json::from_value::<Metadata>(m).ok())
            .map_or_else(
                || Metadata::created(&identity.display_name, now),
                |m| Metadata {
                    updated_by: identity.display_name.clone(),
                    updated_at: now,
                    ..m
                },
            );

        let (mod_type, written, event_fields) = if args.merge {
            let mut fields = to_document(&args.input)?;
            fields.insert(String::from("metadata"), serde_json::to_value(&metadata)?);
            let written = self
                .store
                .merge(Collection::Generator, &id, fields.clone())
                .await?;
            (ModType::UpdateMerge, written, fields)
        } else {
            let input = args.input;
            let generator = Generator {
                id: id.clone(),
                name: input.name.unwrap_or_default(),
                description: input.description,
                active: input.active.unwrap_or(false),
                organization_id: input.organization_id,
                metadata,
            };
            // Absent optionals are written as null so a replayed merge
            // clears them too.
            let mut document = to_document(&generator)?;
            for field in ["description", "organizationId"] {
                document.entry(field).or_insert(Value::Null);
            }
            let written = self
                .store
                .replace(Collection::Generator, &id, document.clone())
                .await?;
            (ModType::UpdateReplace, written, document)
        };

        // The document can vanish between the read and the write.
        let updated = written.ok_or_else(|| CommandError::NotFound(format!("generator {id}")))?;
        self.record(&id, mod_type, event_fields, identity).await?;
        self.fanout
            .publish(GENERATOR_MODIFIED_TOPIC, Value::Object(updated.clone()));

        info!(
            generator_id = %id,
            merge = args.merge,
            user = %identity.display_name,
            "Generator updated"
        );
        Ok(updated)
    }

    /// `GeneratorDeleteGenerators`: one batch delete plus one delete
    /// marker per id, whether or not the id existed.
    pub async fn delete(
        &self,
        args: &DeleteGeneratorsArgs,
        identity: &CallerIdentity,
    ) -> Result<StatusMessage, CommandError> {
        let markers = args
            .ids
            .iter()
            .map(|id| self.record(id, ModType::Delete, Document::new(), identity));

        let (removed, _) = futures::try_join!(
            async {
                self.store
                    .delete_many(Collection::Generator, &args.ids)
                    .await
                    .map_err(CommandError::from_store)
            },
            futures::future::try_join_all(markers)
        )?;

        self.fanout.publish(GENERATOR_MODIFIED_TOPIC, tombstone());

        info!(
            requested = args.ids.len(),
            removed,
            user = %identity.display_name,
            "Generators deleted"
        );
        if removed > 0 {
            Ok(StatusMessage::ok(format!("{removed} generator(s) deleted")))
        } else {
            Ok(StatusMessage::rejected("No generator was deleted"))
        }
    }

    async fn record(
        &self,
        id: &AggregateId,
        mod_type: ModType,
        mut fields: Document,
        identity: &CallerIdentity,
    ) -> Result<(), CommandError> {
        fields.insert(String::from("modType"), serde_json::to_value(mod_type)?);
        let event = NewEvent::new(
            EventType::GeneratorModified,
            id.clone(),
            Value::Object(fields),
            &identity.display_name,
        );
        self.log
            .append(event, &self.append_options)
            .await
            .map_err(CommandError::from_append)?;
        Ok(())
    }
}

/// Payload announcing that generators were deleted.
pub fn tombstone() -> Value {
    serde_json::json!({
        "id": "deleted",
        "name": "",
        "active": false,
        "description": "",
    })
}

fn to_document<T: serde::Serialize>(value: &T) -> Result<Document, CommandError> {
    match serde_json::to_value(value)? {
        Value::Object(document) => Ok(document),
        other => Err(CommandError::Internal(format!("expected an object, got {other}"))),
    }
}
