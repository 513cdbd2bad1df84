//! Record scoping: which documents of a collection a caller may reach.

use crate::access::{Access, AccessContext};
use crate::errors::DbError;
use crate::model::ResourceModel;
use crate::query::{Filter, Query, QueryMode};
use crate::types::DocumentId;
use async_trait::async_trait;
use std::sync::Arc;

/// A collection view restricted by a filter every query built from it carries.
#[derive(Debug, Clone)]
pub struct ScopedView {
    pub model: Arc<ResourceModel>,
    pub restriction: Filter,
}

impl ScopedView {
    #[must_use]
    pub fn unrestricted(model: Arc<ResourceModel>) -> Self {
        Self { model, restriction: Filter::True }
    }

    fn query(&self, mode: QueryMode) -> Query {
        Query::new(self.model.clone(), mode).and(self.restriction.clone())
    }

    #[must_use]
    pub fn find(&self) -> Query {
        self.query(QueryMode::Find)
    }

    #[must_use]
    pub fn find_one(&self) -> Query {
        self.query(QueryMode::FindOne)
    }

    #[must_use]
    pub fn count(&self) -> Query {
        self.query(QueryMode::Count)
    }

    #[must_use]
    pub fn find_by_id(&self, id: &DocumentId) -> Query {
        self.find_one().and(Filter::eq(&self.model.id_property, id.clone()))
    }
}

/// Record-scoping predicate consulted before every operation.
#[async_trait]
pub trait ContextFilter: Send + Sync {
    async fn scope_for(&self, model: &Arc<ResourceModel>, ctx: &AccessContext) -> Result<ScopedView, DbError>;
}

/// No restriction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unscoped;

#[async_trait]
impl ContextFilter for Unscoped {
    async fn scope_for(&self, model: &Arc<ResourceModel>, _ctx: &AccessContext) -> Result<ScopedView, DbError> {
        Ok(ScopedView::unrestricted(model.clone()))
    }
}

/// Restrict to documents whose `field` equals the caller. Private access sees everything.
#[derive(Debug, Clone)]
pub struct FieldScope {
    pub field: String,
}

impl FieldScope {
    #[must_use]
    pub fn new(field: &str) -> Self {
        Self { field: field.to_string() }
    }
}

#[async_trait]
impl ContextFilter for FieldScope {
    async fn scope_for(&self, model: &Arc<ResourceModel>, ctx: &AccessContext) -> Result<ScopedView, DbError> {
        if ctx.access == Access::Private {
            return Ok(ScopedView::unrestricted(model.clone()));
        }
        let caller = ctx
            .caller
            .as_deref()
            .ok_or_else(|| DbError::QueryError(format!("{}: no caller to scope by {}", model.name, self.field)))?;
        Ok(ScopedView { model: model.clone(), restriction: Filter::eq(&self.field, caller) })
    }
}
