use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson};
use futures_util::TryStreamExt;
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, ClientSession, Database};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    DocumentStore, Filter, FinalizeError, Finalization, FindQuery, SortOrder, StoreError, Update,
};
use crate::records::{
    new_document_id, Collection, DeleteOutcome, Document, FinalizeOutcome, InsertOutcome,
    UpdateOutcome, AVAILABLE_SEATS_FIELD, CLASS_ID_FIELD, EMAIL_FIELD, ID_FIELD,
};

/// MongoDB-backed store. Owns the client; call [`DocumentStore::close`] on shutdown.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri).await?;
        options.app_name = Some(String::from("summer-camp"));
        options.server_api = Some(
            ServerApi::builder()
                .version(ServerApiVersion::V1)
                .strict(true)
                .deprecation_errors(true)
                .build(),
        );

        let client = Client::with_options(options)?;
        let store = Self {
            database: client.database(database),
            client,
        };
        store.ping().await?;
        info!(database, "connected to mongodb");
        Ok(store)
    }

    fn collection(&self, collection: Collection) -> mongodb::Collection<bson::Document> {
        self.database.collection(collection.name())
    }

    async fn finalize_in_session(
        &self,
        session: &mut ClientSession,
        finalization: Finalization,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        let Finalization {
            email,
            class_id,
            payment,
        } = finalization;
        let classes = self.collection(Collection::Classes);
        let enrollments = self.collection(Collection::Enrollments);
        let payments = self.collection(Collection::Payments);

        let class_filter = filter_document(&Filter::by_id(&class_id))?;
        let class = classes
            .find_one(class_filter.clone())
            .session(&mut *session)
            .await?
            .ok_or(FinalizeError::ClassNotFound)?;
        if class.get(AVAILABLE_SEATS_FIELD).and_then(bson_number).unwrap_or(0.0) <= 0.0 {
            return Err(FinalizeError::SoldOut);
        }

        let enrollment_filter = filter_document(
            &Filter::eq(EMAIL_FIELD, email.as_str()).and(CLASS_ID_FIELD, class_id.as_str()),
        )?;
        let enrollment = enrollments
            .find_one(enrollment_filter)
            .session(&mut *session)
            .await?
            .ok_or(FinalizeError::EnrollmentNotFound)?;

        let payment = to_bson_document(payment)?;
        let inserted = payments.insert_one(payment).session(&mut *session).await?;

        let mut seat_filter = class_filter;
        seat_filter.insert(AVAILABLE_SEATS_FIELD, doc! { "$gt": 0 });
        let updated = classes
            .update_one(
                seat_filter,
                doc! { "$inc": { "enrolled": 1, "availableSeats": -1 } },
            )
            .session(&mut *session)
            .await?;
        if updated.matched_count == 0 {
            return Err(FinalizeError::SoldOut);
        }

        let enrollment_id = enrollment.get(ID_FIELD).cloned().unwrap_or(Bson::Null);
        let deleted = enrollments
            .delete_one(doc! { "_id": enrollment_id })
            .session(&mut *session)
            .await?;

        Ok(FinalizeOutcome {
            insert_result: InsertOutcome::new(id_string(&inserted.inserted_id)),
            update_result: UpdateOutcome::new(updated.matched_count, updated.modified_count, None),
            delete_result: DeleteOutcome::new(deleted.deleted_count),
        })
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend_tag(&self) -> &'static str {
        "mongo"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        query: FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let target = self.collection(collection);
        let mut action = target.find(filter_document(&query.filter)?);
        if let Some((field, order)) = &query.sort {
            let mut sort = bson::Document::new();
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            sort.insert(field.clone(), direction);
            action = action.sort(sort);
        }
        if let Some(limit) = query.limit {
            action = action.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let docs: Vec<bson::Document> = action.await?.try_collect().await?;
        debug!(collection = collection.name(), results = docs.len(), "mongo find");
        Ok(docs.into_iter().map(to_json_document).collect())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, StoreError> {
        let found = self
            .collection(collection)
            .find_one(filter_document(&filter)?)
            .await?;
        Ok(found.map(to_json_document))
    }

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<InsertOutcome, StoreError> {
        let result = self
            .collection(collection)
            .insert_one(to_bson_document(doc)?)
            .await?;
        Ok(InsertOutcome::new(id_string(&result.inserted_id)))
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut update_doc = update_document(&update)?;
        if upsert {
            // Plain string ids seed the upserted document from the filter; hex ids
            // are matched with `$in` and have to be set explicitly.
            let inserted_id = match filter_id(&filter) {
                None => Some(new_document_id()),
                Some(id) if ObjectId::parse_str(id).is_ok() => Some(String::from(id)),
                Some(_) => None,
            };
            if let Some(id) = inserted_id {
                let mut on_insert = match update_doc.remove("$setOnInsert") {
                    Some(Bson::Document(defaults)) => defaults,
                    _ => bson::Document::new(),
                };
                on_insert.insert(ID_FIELD, id);
                update_doc.insert("$setOnInsert", on_insert);
            }
        }
        let result = self
            .collection(collection)
            .update_one(filter_document(&filter)?, update_doc)
            .upsert(upsert)
            .await?;
        Ok(UpdateOutcome::new(
            result.matched_count,
            result.modified_count,
            result.upserted_id.as_ref().map(id_string),
        ))
    }

    async fn delete_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<DeleteOutcome, StoreError> {
        let result = self
            .collection(collection)
            .delete_one(filter_document(&filter)?)
            .await?;
        Ok(DeleteOutcome::new(result.deleted_count))
    }

    async fn finalize_enrollment(
        &self,
        finalization: Finalization,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        match self.finalize_in_session(&mut session, finalization).await {
            Ok(outcome) => {
                session.commit_transaction().await?;
                Ok(outcome)
            }
            Err(error) => {
                if let Err(abort_error) = session.abort_transaction().await {
                    warn!(error = %abort_error, "failed to abort finalization transaction");
                }
                Err(error)
            }
        }
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        info!("mongodb client closed");
    }
}

/// Converts an equality filter. A hex `_id` also matches a native ObjectId so
/// documents created outside this service stay addressable.
fn filter_document(filter: &Filter) -> Result<bson::Document, StoreError> {
    let mut doc = bson::Document::new();
    for (field, value) in filter.clauses() {
        if field == ID_FIELD {
            if let Value::String(raw) = value {
                if let Ok(oid) = ObjectId::parse_str(raw) {
                    doc.insert(field.clone(), doc! { "$in": [oid, raw.clone()] });
                    continue;
                }
            }
        }
        doc.insert(field.clone(), bson::to_bson(value)?);
    }
    Ok(doc)
}

fn filter_id(filter: &Filter) -> Option<&str> {
    filter
        .clauses()
        .iter()
        .find(|(field, _)| field == ID_FIELD)
        .and_then(|(_, value)| value.as_str())
}

fn update_document(update: &Update) -> Result<bson::Document, StoreError> {
    let mut doc = bson::Document::new();
    if !update.set_fields().is_empty() {
        doc.insert("$set", bson::to_document(update.set_fields())?);
    }
    if !update.inc_fields().is_empty() {
        let mut inc = bson::Document::new();
        for (field, by) in update.inc_fields() {
            inc.insert(field.clone(), *by);
        }
        doc.insert("$inc", inc);
    }
    if !update.insert_defaults().is_empty() {
        doc.insert("$setOnInsert", bson::to_document(update.insert_defaults())?);
    }
    Ok(doc)
}

/// Serializes a JSON document, assigning a string `_id` when none is present.
fn to_bson_document(mut doc: Document) -> Result<bson::Document, StoreError> {
    if !doc.get(ID_FIELD).is_some_and(Value::is_string) {
        doc.insert(String::from(ID_FIELD), Value::String(new_document_id()));
    }
    Ok(bson::to_document(&doc)?)
}

/// Relaxed extended JSON with `_id` flattened to a string.
fn to_json_document(mut doc: bson::Document) -> Document {
    if let Some(id) = doc.get(ID_FIELD) {
        let id = id_string(id);
        doc.insert(ID_FIELD, id);
    }
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn id_string(id: &Bson) -> String {
    match id {
        Bson::String(value) => value.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

fn bson_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}
