use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Number, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    compare_field, DocumentStore, Filter, FinalizeError, Finalization, FindQuery, SortOrder,
    StoreError, Update,
};
use crate::records::{
    new_document_id, number_field, Collection, DeleteOutcome, Document, FinalizeOutcome,
    InsertOutcome, UpdateOutcome, AVAILABLE_SEATS_FIELD, CLASS_ID_FIELD, EMAIL_FIELD,
    ENROLLED_FIELD, ID_FIELD,
};

/// Process-local store. One lock covers every collection, so a finalization is
/// observed either entirely or not at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection, assigning ids to documents that lack one.
    #[cfg(test)]
    pub async fn with_documents(self, collection: Collection, docs: Vec<Document>) -> Self {
        {
            let mut guard = self.collections.write().await;
            let entries = guard.entry(collection).or_default();
            entries.extend(docs.into_iter().map(assign_id));
        }
        self
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        query: FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().await;
        let mut docs: Vec<Document> = guard
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| query.filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, order)) = &query.sort {
            docs.sort_by(|a, b| match order {
                SortOrder::Ascending => compare_field(a, b, field),
                SortOrder::Descending => compare_field(b, a, field),
            });
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(&collection)
            .and_then(|docs| docs.iter().find(|doc| filter.matches(doc)))
            .cloned())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<InsertOutcome, StoreError> {
        let mut guard = self.collections.write().await;
        let entries = guard.entry(collection).or_default();
        let id = insert_into(entries, doc)?;
        debug!(collection = collection.name(), id = %id, "memory insert");
        Ok(InsertOutcome::new(id))
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut guard = self.collections.write().await;
        let entries = guard.entry(collection).or_default();

        if let Some(existing) = entries.iter_mut().find(|doc| filter.matches(doc)) {
            let mut updated = existing.clone();
            apply_update(&mut updated, &update)?;
            let modified = u64::from(updated != *existing);
            *existing = updated;
            return Ok(UpdateOutcome::new(1, modified, None));
        }

        if !upsert {
            return Ok(UpdateOutcome::new(0, 0, None));
        }

        let mut created = Document::new();
        for (field, value) in filter.clauses() {
            created.insert(field.clone(), value.clone());
        }
        apply_update(&mut created, &update)?;
        for (field, value) in update.insert_defaults() {
            created.entry(field.clone()).or_insert_with(|| value.clone());
        }
        let id = insert_into(entries, created)?;
        Ok(UpdateOutcome::new(0, 0, Some(id)))
    }

    async fn delete_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<DeleteOutcome, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(entries) = guard.get_mut(&collection) else {
            return Ok(DeleteOutcome::new(0));
        };
        match entries.iter().position(|doc| filter.matches(doc)) {
            Some(index) => {
                entries.remove(index);
                Ok(DeleteOutcome::new(1))
            }
            None => Ok(DeleteOutcome::new(0)),
        }
    }

    async fn finalize_enrollment(
        &self,
        finalization: Finalization,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        let Finalization {
            email,
            class_id,
            payment,
        } = finalization;
        let mut guard = self.collections.write().await;

        let class_filter = Filter::by_id(&class_id);
        let (class_index, mut class) = guard
            .get(&Collection::Classes)
            .and_then(|docs| {
                docs.iter()
                    .enumerate()
                    .find(|(_, doc)| class_filter.matches(doc))
            })
            .map(|(index, doc)| (index, doc.clone()))
            .ok_or(FinalizeError::ClassNotFound)?;

        if number_field(&class, AVAILABLE_SEATS_FIELD).unwrap_or(0.0) <= 0.0 {
            return Err(FinalizeError::SoldOut);
        }

        let enrollment_filter = Filter::eq(EMAIL_FIELD, email.as_str()).and(CLASS_ID_FIELD, class_id.as_str());
        let enrollment_index = guard
            .get(&Collection::Enrollments)
            .and_then(|docs| docs.iter().position(|doc| enrollment_filter.matches(doc)))
            .ok_or(FinalizeError::EnrollmentNotFound)?;

        // Validate every write before applying any of them.
        let seat_move = Update::default()
            .inc(ENROLLED_FIELD, 1)
            .inc(AVAILABLE_SEATS_FIELD, -1);
        apply_update(&mut class, &seat_move)?;
        let payment = assign_id(payment);
        let payment_id = id_of(&payment).unwrap_or_default();
        let payments = guard.entry(Collection::Payments).or_default();
        if payments.iter().any(|doc| id_of(doc) == Some(payment_id.clone())) {
            return Err(StoreError::DuplicateId(payment_id).into());
        }

        payments.push(payment);
        if let Some(slot) = guard
            .get_mut(&Collection::Classes)
            .and_then(|docs| docs.get_mut(class_index))
        {
            *slot = class;
        }
        if let Some(docs) = guard.get_mut(&Collection::Enrollments) {
            docs.remove(enrollment_index);
        }

        debug!(email = %email, class_id = %class_id, "memory enrollment finalized");
        Ok(FinalizeOutcome {
            insert_result: InsertOutcome::new(payment_id),
            update_result: UpdateOutcome::new(1, 1, None),
            delete_result: DeleteOutcome::new(1),
        })
    }

    async fn close(&self) {}
}

fn id_of(doc: &Document) -> Option<String> {
    doc.get(ID_FIELD).and_then(Value::as_str).map(String::from)
}

fn assign_id(mut doc: Document) -> Document {
    if id_of(&doc).is_none() {
        doc.insert(String::from(ID_FIELD), Value::String(new_document_id()));
    }
    doc
}

fn insert_into(entries: &mut Vec<Document>, doc: Document) -> Result<String, StoreError> {
    let doc = assign_id(doc);
    let id = id_of(&doc).unwrap_or_default();
    if entries.iter().any(|existing| id_of(existing).as_deref() == Some(id.as_str())) {
        return Err(StoreError::DuplicateId(id));
    }
    entries.push(doc);
    Ok(id)
}

fn apply_update(doc: &mut Document, update: &Update) -> Result<(), StoreError> {
    for (field, value) in update.set_fields() {
        doc.insert(field.clone(), value.clone());
    }
    for (field, by) in update.inc_fields() {
        let next = match doc.get(field) {
            None => Value::from(*by),
            Some(Value::Number(current)) => increment(current, *by)
                .ok_or_else(|| StoreError::NonNumericField(field.clone()))?,
            Some(_) => return Err(StoreError::NonNumericField(field.clone())),
        };
        doc.insert(field.clone(), next);
    }
    Ok(())
}

fn increment(current: &Number, by: i64) -> Option<Value> {
    if let Some(value) = current.as_i64() {
        return Some(Value::from(value.saturating_add(by)));
    }
    let value = current.as_f64()? + by as f64;
    Number::from_f64(value).map(Value::Number)
}
