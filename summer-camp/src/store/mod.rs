//! Document store seam.
//!
//! Handlers talk to a [`DocumentStore`]; `mongo` is the production backend and
//! `memory` backs local runs and tests. Queries are deliberately small: equality
//! filters, one sort key, a limit, `$set`/`$inc` updates with optional upsert.

mod memory;
mod mongo;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::records::{
    Collection, DeleteOutcome, Document, FinalizeOutcome, InsertOutcome, UpdateOutcome, ID_FIELD,
};

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("failed to encode document: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("document id {0} already exists")]
    DuplicateId(String),
    #[error("cannot increment non-numeric field {0}")]
    NonNumericField(String),
}

/// Why an enrollment could not be finalized. Nothing is written in any of these cases.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("class not found")]
    ClassNotFound,
    #[error("no seats available")]
    SoldOut,
    #[error("enrollment not found")]
    EnrollmentNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<mongodb::error::Error> for FinalizeError {
    fn from(error: mongodb::error::Error) -> Self {
        FinalizeError::Store(StoreError::Mongo(error))
    }
}

impl From<bson::ser::Error> for FinalizeError {
    fn from(error: bson::ser::Error) -> Self {
        FinalizeError::Store(StoreError::Encode(error))
    }
}

/// Conjunction of field equality clauses. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn by_id(id: &str) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            limit: None,
        }
    }

    pub fn sorted(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// `$set`, `$inc` and `$setOnInsert` operators applied to a single document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Document,
    inc: Vec<(String, i64)>,
    on_insert: Document,
}

impl Update {
    /// `$set` every field of `doc` except `_id`.
    pub fn set(mut doc: Document) -> Self {
        doc.remove(ID_FIELD);
        Self {
            set: doc,
            ..Self::default()
        }
    }

    pub fn set_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.inc.push((field.into(), by));
        self
    }

    /// Value written only when an upsert creates the document. Ignored for fields
    /// already `$set`, which the database would reject as a path conflict.
    pub fn default_on_insert(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        if !self.set.contains_key(&field) {
            self.on_insert.insert(field, value.into());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty()
    }

    pub fn set_fields(&self) -> &Document {
        &self.set
    }

    pub fn inc_fields(&self) -> &[(String, i64)] {
        &self.inc
    }

    pub fn insert_defaults(&self) -> &Document {
        &self.on_insert
    }
}

/// Everything needed to turn a pending enrollment into a paid one.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub email: String,
    pub class_id: String,
    pub payment: Document,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn find(&self, collection: Collection, query: FindQuery)
        -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, StoreError>;

    /// Inserts `doc`, keeping a string `_id` if present and assigning one otherwise.
    async fn insert_one(
        &self,
        collection: Collection,
        doc: Document,
    ) -> Result<InsertOutcome, StoreError>;

    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError>;

    async fn delete_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Records the payment, moves one seat from available to enrolled and removes the
    /// pending enrollment, all or nothing.
    async fn finalize_enrollment(
        &self,
        finalization: Finalization,
    ) -> Result<FinalizeOutcome, FinalizeError>;

    async fn close(&self);
}

/// Orders two documents by `field`: numbers numerically, strings lexically,
/// missing or mixed values first.
pub(crate) fn compare_field(a: &Document, b: &Document, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::MIN);
            let y = y.as_f64().unwrap_or(f64::MIN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => type_rank(x).cmp(&type_rank(y)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}
