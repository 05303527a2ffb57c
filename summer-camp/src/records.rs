//! Document model: collections, schemaless documents and driver-shaped write outcomes.
//!
//! Documents are plain JSON objects. Only the handful of fields the service reasons
//! about (`email`, `classId`, `availableSeats`, `enrolled`, `role`, ...) are named here;
//! everything else passes through untouched.

use serde::Serialize;
use serde_json::{Map, Value};

/// A schemaless document as stored and returned.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const EMAIL_FIELD: &str = "email";
pub const CLASS_ID_FIELD: &str = "classId";
pub const INSTRUCTOR_EMAIL_FIELD: &str = "instructorEmail";
pub const AVAILABLE_SEATS_FIELD: &str = "availableSeats";
pub const ENROLLED_FIELD: &str = "enrolled";
pub const STATUS_FIELD: &str = "status";
pub const FEEDBACK_FIELD: &str = "feedback";
pub const ROLE_FIELD: &str = "role";
pub const DATE_FIELD: &str = "date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Banners,
    Classes,
    Users,
    Instructors,
    Enrollments,
    Payments,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Banners => "banners",
            Collection::Classes => "classes",
            Collection::Users => "users",
            Collection::Instructors => "instructors",
            Collection::Enrollments => "enrollments",
            Collection::Payments => "payments",
        }
    }
}

/// Fresh document id: a 24-char ObjectId hex string.
pub fn new_document_id() -> String {
    bson::oid::ObjectId::new().to_hex()
}

pub fn str_field<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

pub fn number_field(doc: &Document, field: &str) -> Option<f64> {
    doc.get(field).and_then(Value::as_f64)
}

/// Drops a client-supplied `_id`; ids are assigned by the store or taken from the path.
pub fn without_id(mut doc: Document) -> Document {
    doc.remove(ID_FIELD);
    doc
}

/// How `GET /classes` selects documents. Resolved once from the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassListMode {
    ByInstructor(String),
    Popular(usize),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroLimit;

impl ClassListMode {
    /// `email` wins over `limit`; empty strings count as absent.
    pub fn resolve(email: Option<String>, limit: Option<usize>) -> Result<Self, ZeroLimit> {
        if let Some(email) = email.filter(|email| !email.trim().is_empty()) {
            return Ok(ClassListMode::ByInstructor(email));
        }
        match limit {
            Some(0) => Err(ZeroLimit),
            Some(limit) => Ok(ClassListMode::Popular(limit)),
            None => Ok(ClassListMode::All),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructorLookup {
    One(String),
    All,
}

impl InstructorLookup {
    pub fn resolve(email: Option<String>) -> Self {
        match email.filter(|email| !email.trim().is_empty()) {
            Some(email) => InstructorLookup::One(email),
            None => InstructorLookup::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOutcome {
    pub acknowledged: bool,
    pub inserted_id: String,
}

impl InsertOutcome {
    pub fn new(inserted_id: String) -> Self {
        Self {
            acknowledged: true,
            inserted_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<String>,
}

impl UpdateOutcome {
    pub fn new(matched_count: u64, modified_count: u64, upserted_id: Option<String>) -> Self {
        Self {
            acknowledged: true,
            matched_count,
            modified_count,
            upserted_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteOutcome {
    pub fn new(deleted_count: u64) -> Self {
        Self {
            acknowledged: true,
            deleted_count,
        }
    }
}

/// Combined result of the three writes that finalize an enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub insert_result: InsertOutcome,
    pub update_result: UpdateOutcome,
    pub delete_result: DeleteOutcome,
}
