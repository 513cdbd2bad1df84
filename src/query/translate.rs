//! Query translation: turn per-request [`QueryOptions`] into an executable [`Query`].

use crate::errors::DbError;
use crate::model::ResourceModel;
use crate::store::{Store, UpdateOptions};
use crate::types::Document;
use bson::Bson;
use std::sync::Arc;

use super::types::{
    Filter, MAX_LIMIT, MAX_POPULATE_PATHS, MAX_PROJECTION_FIELDS, MAX_SORT_FIELDS, PopulateSpec,
    Projection, QueryOptions, ReadPreference, SortSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Find,
    FindOne,
    Count,
}

/// A query against one collection, refined step by step and executed through a [`Store`].
#[derive(Debug, Clone)]
pub struct Query {
    pub model: Arc<ResourceModel>,
    pub mode: QueryMode,
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub populate: Vec<PopulateSpec>,
    pub sort: Vec<SortSpec>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub distinct: Option<String>,
    pub read_preference: Option<ReadPreference>,
    pub lean: bool,
}

impl Query {
    #[must_use]
    pub fn new(model: Arc<ResourceModel>, mode: QueryMode) -> Self {
        Self {
            model,
            mode,
            filter: Filter::True,
            projection: None,
            populate: Vec::new(),
            sort: Vec::new(),
            skip: None,
            limit: None,
            distinct: None,
            read_preference: None,
            lean: true,
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.model.collection
    }

    #[must_use]
    pub fn and(mut self, filter: Filter) -> Self {
        self.filter = std::mem::take(&mut self.filter).and(filter);
        self
    }

    #[must_use]
    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    #[must_use]
    pub fn populate(mut self, spec: PopulateSpec) -> Self {
        self.populate.push(spec);
        self
    }

    #[must_use]
    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// `skip(0)` clears any skip.
    #[must_use]
    pub const fn skip(mut self, n: u64) -> Self {
        self.skip = if n == 0 { None } else { Some(n) };
        self
    }

    /// `limit(0)` clears any limit.
    #[must_use]
    pub const fn limit(mut self, n: u64) -> Self {
        self.limit = if n == 0 { None } else { Some(n) };
        self
    }

    #[must_use]
    pub fn distinct(mut self, field: &str) -> Self {
        self.distinct = Some(field.to_string());
        self
    }

    #[must_use]
    pub const fn read(mut self, pref: ReadPreference) -> Self {
        self.read_preference = Some(pref);
        self
    }

    #[must_use]
    pub const fn lean(mut self, lean: bool) -> Self {
        self.lean = lean;
        self
    }

    /// Turn this query into a count over the same selection.
    #[must_use]
    pub const fn count(mut self) -> Self {
        self.mode = QueryMode::Count;
        self
    }

    /// # Errors
    /// Propagates the store's execution error.
    pub async fn exec_many(&self, store: &dyn Store) -> Result<Vec<Document>, DbError> {
        store.find(self).await
    }

    /// # Errors
    /// Propagates the store's execution error.
    pub async fn exec_one(&self, store: &dyn Store) -> Result<Option<Document>, DbError> {
        store.find_one(self).await
    }

    /// # Errors
    /// Propagates the store's execution error.
    pub async fn exec_count(&self, store: &dyn Store) -> Result<u64, DbError> {
        store.count(self).await
    }

    /// # Errors
    /// Returns `DbError::QueryError` when no distinct field was set.
    pub async fn exec_distinct(&self, store: &dyn Store) -> Result<Vec<Bson>, DbError> {
        let field = self.distinct.as_deref().ok_or_else(|| DbError::QueryError("no distinct field".into()))?;
        store.distinct(self, field).await
    }

    /// # Errors
    /// Propagates the store's execution error.
    pub async fn remove(&self, store: &dyn Store) -> Result<u64, DbError> {
        store.remove(self).await
    }

    /// # Errors
    /// Propagates the store's execution error.
    pub async fn find_one_and_remove(&self, store: &dyn Store) -> Result<Option<Document>, DbError> {
        store.find_one_and_remove(self).await
    }

    /// # Errors
    /// Propagates the store's execution or validation error.
    pub async fn find_one_and_update(
        &self,
        store: &dyn Store,
        set: &Document,
        opts: &UpdateOptions,
    ) -> Result<Option<Document>, DbError> {
        store.find_one_and_update(self, set, opts).await
    }
}

/// Apply the request's query options to `base`.
///
/// Each option targets its own query dimension; oversized sort, projection and populate
/// lists and limits are truncated to the crate-wide maxima.
#[must_use]
pub fn translate(base: Query, opts: &QueryOptions) -> Query {
    let mut q = base.and(opts.filter.clone());

    if let Some(projection) = &opts.projection {
        let mut projection = projection.clone();
        if projection.len() > MAX_PROJECTION_FIELDS {
            log::warn!("projection too long: {} fields", projection.len());
            projection.include.truncate(MAX_PROJECTION_FIELDS);
            projection.exclude.truncate(MAX_PROJECTION_FIELDS.saturating_sub(projection.include.len()));
        }
        q = q.select(projection);
    }

    if opts.populate.len() > MAX_POPULATE_PATHS {
        log::warn!("populate list too long: {}", opts.populate.len());
    }
    for spec in opts.populate.iter().take(MAX_POPULATE_PATHS) {
        q = q.populate(spec.clone());
    }

    if opts.sort.len() > MAX_SORT_FIELDS {
        log::warn!("sort spec too long: {}", opts.sort.len());
    }
    for spec in opts.sort.iter().take(MAX_SORT_FIELDS) {
        q = q.sort(spec.clone());
    }

    if let Some(skip) = opts.skip {
        q = q.skip(skip);
    }
    if let Some(limit) = opts.limit {
        if limit > MAX_LIMIT {
            log::warn!("limit {limit} clamped to {MAX_LIMIT}");
        }
        q = q.limit(limit.min(MAX_LIMIT));
    }

    if let Some(pref) = opts.read_preference {
        q = q.read(pref);
    }
    if let Some(field) = &opts.distinct {
        q = q.distinct(field);
    }

    log::debug!(
        "query plan: collection={} mode={:?} filter={:?} skip={:?} limit={:?}",
        q.collection(),
        q.mode,
        q.filter,
        q.skip,
        q.limit
    );
    q
}
