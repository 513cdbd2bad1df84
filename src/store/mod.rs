//! The document-store contract the operations execute against.

mod memory;

pub use memory::{Collection, MemoryStore, StoreMetrics};

use crate::errors::DbError;
use crate::model::ResourceModel;
use crate::query::{PopulateSpec, Query};
use crate::types::{Document, DocumentId};
use async_trait::async_trait;
use bson::Bson;

/// Options for [`Store::find_one_and_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Return the document as it is after the update.
    pub new: bool,
    pub run_validators: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { new: true, run_validators: false }
    }
}

/// Asynchronous document store. Every method is one round trip; implementations own
/// retries, deadlines and connection handling.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find(&self, query: &Query) -> Result<Vec<Document>, DbError>;

    async fn find_one(&self, query: &Query) -> Result<Option<Document>, DbError>;

    async fn count(&self, query: &Query) -> Result<u64, DbError>;

    /// Distinct values of `field` across the matching documents.
    async fn distinct(&self, query: &Query, field: &str) -> Result<Vec<Bson>, DbError>;

    /// Remove every matching document, returning how many were removed.
    async fn remove(&self, query: &Query) -> Result<u64, DbError>;

    async fn find_one_and_remove(&self, query: &Query) -> Result<Option<Document>, DbError>;

    /// Apply `$set` semantics for the dotted paths in `set` to the first match.
    async fn find_one_and_update(
        &self,
        query: &Query,
        set: &Document,
        opts: &UpdateOptions,
    ) -> Result<Option<Document>, DbError>;

    async fn create(&self, model: &ResourceModel, doc: Document) -> Result<Document, DbError>;

    /// Persist a whole document that was loaded earlier and mutated in memory.
    async fn save(&self, model: &ResourceModel, doc: Document) -> Result<Document, DbError>;

    async fn remove_document(&self, model: &ResourceModel, id: &DocumentId) -> Result<(), DbError>;

    /// Replace reference identities at the given paths with the referenced documents.
    async fn populate(
        &self,
        model: &ResourceModel,
        doc: Document,
        paths: &[PopulateSpec],
    ) -> Result<Document, DbError>;
}
