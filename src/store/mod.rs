//! # Document Store
//!
//! Find/insert/update/delete by field-equality filter against named
//! collections. Records travel as JSON objects; typed decoding happens in the
//! repository layer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tenancy::DeadlineExceeded;

pub mod database;
pub mod memory;

pub use database::DatabaseStore;
pub use memory::InMemoryStore;

/// A stored record.
pub type Document = Map<String, Value>;

/// Field-equality filter. An empty filter matches every document; a `null`
/// term also matches a document without the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on `code`, the unique key within a collection.
    pub fn by_code(code: &str) -> Self {
        Self::new().eq("code", code)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.terms.get(field)
    }

    pub fn terms(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.terms.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether every term equals the document's field of the same name.
    pub fn matches(&self, document: &Document) -> bool {
        self.terms
            .iter()
            .all(|(field, expected)| match document.get(field) {
                Some(actual) => actual == expected,
                None => expected.is_null(),
            })
    }
}

/// Errors returned by document store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store call timed out")]
    Timeout,
    #[error("{collection} record '{code}' already exists")]
    Duplicate { collection: String, code: String },
    #[error("{collection} record '{code}' kept changing during the update")]
    Contention { collection: String, code: String },
    #[error("document is missing a string 'code' field")]
    MissingCode,
    #[error("stored document is not a JSON object: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl From<DeadlineExceeded> for StoreError {
    fn from(_: DeadlineExceeded) -> Self {
        StoreError::Timeout
    }
}

/// The document store the core consumes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(&self, collection: &str, filter: &Filter)
    -> Result<Option<Document>, StoreError>;

    /// All matching documents, oldest first.
    async fn find_all(&self, collection: &str, filter: &Filter)
    -> Result<Vec<Document>, StoreError>;

    /// Inserts a document; its `code` must be unique within the collection.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), StoreError>;

    /// Merges `set` into the first matching document (`$set` semantics) and
    /// returns the number of documents modified.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<u64, StoreError>;

    /// Deletes the first matching document and returns the number deleted.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
}

/// A JSON object as a [`Document`]; any other value yields an empty one.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

pub(crate) fn document_code(document: &Document) -> Result<&str, StoreError> {
    document
        .get("code")
        .and_then(Value::as_str)
        .filter(|code| !code.is_empty())
        .ok_or(StoreError::MissingCode)
}
