//! Persistence port for session documents.
//!
//! The clock owns this boundary; collaborators implement it. Documents are
//! flat JSON objects addressed by string keys. Writes offer merge semantics
//! so fields a writer does not name survive partial updates -- the conflict
//! policy across writers is last-write-wins, field by field.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A stored document: a flat JSON object.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No document exists at the key.
    #[error("document not found: {0}")]
    NotFound(String),
    /// The store could not be reached. Transient; callers retry on the next
    /// tick or the next explicit user action.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable key-value document store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the document at `key`, or `None` if it has never been written.
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError>;

    /// Write `fields` at `key`. With `merge`, existing fields not named in
    /// `fields` are preserved; without it the document is replaced. Creates
    /// the document either way.
    async fn set(&self, key: &str, fields: Document, merge: bool) -> Result<(), StoreError>;

    /// Partially update an existing document. Fails with [`StoreError::NotFound`]
    /// if the document has never been written.
    async fn update(&self, key: &str, partial: Document) -> Result<(), StoreError>;
}

/// Storage key for a user's session document.
pub fn session_key(user_id: &str) -> String {
    format!("session/{user_id}")
}

/// Shallow field-level merge of `fields` into `existing`.
pub(crate) fn merge_fields(existing: &mut Document, fields: Document) {
    for (name, value) in fields {
        existing.insert(name, value);
    }
}
