//! Request handlers for one resource.
//!
//! Each handler scopes the collection for the caller, builds a query (or sanitizes the
//! body), runs it against the [`Store`] and writes the outcome onto the [`Envelope`].
//! Failures go to the [`ErrorHandler`] before being returned.

use crate::access::{AccessContext, ExclusionFilter, FieldFilter};
use crate::config::Options;
use crate::envelope::{Envelope, Payload};
use crate::errors::OpError;
use crate::logger::AUDIT_TARGET;
use crate::model::ResourceModel;
use crate::query::{Query, QueryOptions, translate};
use crate::sanitize::{apply_set, change_set, sanitize};
use crate::scope::{ContextFilter, ScopedView, Unscoped};
use crate::store::{Store, UpdateOptions};
use crate::types::{Document, DocumentId};
use bson::Bson;
use std::sync::Arc;

/// One incoming request as seen by the handlers.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Identity from the route, for single-document operations.
    pub id: Option<DocumentId>,
    pub body: Option<Document>,
    pub query: QueryOptions,
    pub access: AccessContext,
}

impl Request {
    #[must_use]
    pub fn new(access: AccessContext) -> Self {
        Self { access, ..Self::default() }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: Document) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }
}

pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, err: &OpError, req: &Request, env: &mut Envelope);
}

/// Logs the failure and writes its status and message onto the envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn on_error(&self, err: &OpError, req: &Request, env: &mut Envelope) {
        log::warn!("request failed ({}): {err} id={:?}", err.status_code(), req.id);
        env.set_status(err.status_code());
        env.error = Some(err.to_string());
    }
}

pub struct Operations {
    pub model: Arc<ResourceModel>,
    pub options: Options,
    store: Arc<dyn Store>,
    filter: Arc<dyn FieldFilter>,
    context: Arc<dyn ContextFilter>,
    on_error: Arc<dyn ErrorHandler>,
}

impl Operations {
    #[must_use]
    pub fn new(model: Arc<ResourceModel>, store: Arc<dyn Store>, options: Options) -> Self {
        Self {
            model,
            options,
            store,
            filter: Arc::new(ExclusionFilter::new()),
            context: Arc::new(Unscoped),
            on_error: Arc::new(LogErrorHandler),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn FieldFilter>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_context_filter(mut self, context: Arc<dyn ContextFilter>) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_error_handler(mut self, on_error: Arc<dyn ErrorHandler>) -> Self {
        self.on_error = on_error;
        self
    }

    fn fail(&self, err: OpError, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        self.on_error.on_error(&err, req, env);
        Err(err)
    }

    /// Answer an excluded `distinct` field with an empty list instead of querying.
    fn distinct_gate(&self, req: &Request, env: &mut Envelope) -> bool {
        let Some(field) = req.query.distinct.as_deref() else { return false };
        if !self.filter.is_excluded(field, &req.access) {
            return false;
        }
        log::debug!("{}: distinct on excluded field {field}", self.model.name);
        env.set_result(Payload::Documents(Vec::new()), 200);
        true
    }

    async fn scope(&self, req: &Request) -> Result<ScopedView, OpError> {
        Ok(self.context.scope_for(&self.model, &req.access).await?)
    }

    fn read_hints(&self, q: Query) -> Query {
        q.read(self.options.read_preference).lean(self.options.lean)
    }

    fn by_id(view: &ScopedView, req: &Request) -> Result<Query, OpError> {
        req.id.as_ref().map(|id| view.find_by_id(id)).ok_or(OpError::NotFound)
    }

    /// List matching documents, or their distinct values of one field.
    ///
    /// # Errors
    /// `OpError::Store` when the scope or a store call fails.
    pub async fn get_items(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        if self.distinct_gate(req, env) {
            return Ok(());
        }
        match self.list(req, env).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e, req, env),
        }
    }

    async fn list(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        let view = self.scope(req).await?;
        let query = self.read_hints(translate(view.find(), &req.query));
        let payload = if query.distinct.is_some() {
            Payload::Values(query.exec_distinct(self.store.as_ref()).await?)
        } else {
            Payload::Documents(query.exec_many(self.store.as_ref()).await?)
        };
        env.set_result(payload, 200);
        if self.options.total_count_header {
            let total = query.skip(0).limit(0).count().exec_count(self.store.as_ref()).await?;
            env.total_count = Some(total);
        }
        Ok(())
    }

    /// # Errors
    /// `OpError::Store` when the scope or the count fails.
    pub async fn get_count(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        let res = async {
            let view = self.scope(req).await?;
            let count = translate(view.count(), &req.query).exec_count(self.store.as_ref()).await?;
            env.set_result(Payload::Count { count }, 200);
            Ok::<(), OpError>(())
        }
        .await;
        match res {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e, req, env),
        }
    }

    async fn read_one(&self, req: &Request) -> Result<Document, OpError> {
        let view = self.scope(req).await?;
        let query = self.read_hints(translate(Self::by_id(&view, req)?, &req.query));
        query.exec_one(self.store.as_ref()).await?.ok_or(OpError::NotFound)
    }

    /// # Errors
    /// `OpError::NotFound` when no document has the identity, `OpError::Store` otherwise.
    pub async fn get_item(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        if self.distinct_gate(req, env) {
            return Ok(());
        }
        match self.read_one(req).await {
            Ok(item) => {
                env.set_result(Payload::Document(item), 200);
                Ok(())
            }
            Err(e) => self.fail(e, req, env),
        }
    }

    /// Read one document with every nested value replaced by `true`.
    ///
    /// # Errors
    /// As [`Self::get_item`].
    pub async fn get_shallow(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        if self.distinct_gate(req, env) {
            return Ok(());
        }
        match self.read_one(req).await {
            Ok(item) => {
                env.set_result(Payload::Document(self.shallow(item)), 200);
                Ok(())
            }
            Err(e) => self.fail(e, req, env),
        }
    }

    /// Every non-identity value that is not a plain string, number or boolean becomes
    /// `true`, including `null`.
    fn shallow(&self, item: Document) -> Document {
        item.into_iter()
            .map(|(k, v)| {
                let nested = matches!(
                    v,
                    Bson::Document(_)
                        | Bson::Array(_)
                        | Bson::ObjectId(_)
                        | Bson::DateTime(_)
                        | Bson::Binary(_)
                        | Bson::Null
                        | Bson::RegularExpression(_)
                        | Bson::Decimal128(_)
                        | Bson::Timestamp(_)
                );
                if nested && k != self.model.id_property { (k, Bson::Boolean(true)) } else { (k, v) }
            })
            .collect()
    }

    /// # Errors
    /// `OpError::Store` when the scope or the removal fails.
    pub async fn delete_items(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        let res = async {
            let view = self.scope(req).await?;
            let removed = translate(view.find(), &req.query).remove(self.store.as_ref()).await?;
            log::info!(target: AUDIT_TARGET, "delete_many collection={} removed={removed}", self.model.collection);
            env.set_status(204);
            Ok::<(), OpError>(())
        }
        .await;
        match res {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e, req, env),
        }
    }

    /// # Errors
    /// `OpError::NotFound` when nothing was removed, `OpError::Store` otherwise.
    pub async fn delete_item(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        match self.remove_one(req, env).await {
            Ok(id) => {
                log::info!(target: AUDIT_TARGET, "delete_one collection={} id={id}", self.model.collection);
                env.set_status(204);
                Ok(())
            }
            Err(e) => self.fail(e, req, env),
        }
    }

    async fn remove_one(&self, req: &Request, env: &mut Envelope) -> Result<Bson, OpError> {
        if self.options.find_one_and_remove {
            let view = self.scope(req).await?;
            let removed = Self::by_id(&view, req)?.find_one_and_remove(self.store.as_ref()).await?;
            let removed = removed.ok_or(OpError::NotFound)?;
            return Ok(self.identity_of(&removed));
        }
        let doc = env.document.take().ok_or(OpError::NotFound)?;
        let id = self.identity_of(&doc);
        self.store.remove_document(&self.model, &id).await?;
        Ok(id)
    }

    fn identity_of(&self, doc: &Document) -> Bson {
        doc.get(&self.model.id_property).cloned().unwrap_or(Bson::Null)
    }

    /// # Errors
    /// `OpError::Store` when creation or population fails.
    pub async fn create_object(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        let body = self.prepare(req);
        let res = async {
            let created = self.store.create(&self.model, body).await?;
            log::info!(target: AUDIT_TARGET, "create collection={} id={}", self.model.collection, self.identity_of(&created));
            Ok::<_, OpError>(self.store.populate(&self.model, created, &req.query.populate).await?)
        }
        .await;
        match res {
            Ok(item) => {
                env.set_result(Payload::Document(item), 201);
                Ok(())
            }
            Err(e) => self.fail(e, req, env),
        }
    }

    /// Apply the request body as a `$set` of dotted paths.
    ///
    /// # Errors
    /// `OpError::NotFound` when the document does not exist, `OpError::Store` otherwise.
    pub async fn modify_object(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        let set = change_set(&self.model, &self.prepare(req));
        let res = if self.options.find_one_and_update {
            self.update_atomic(req, &set).await
        } else {
            self.update_loaded(req, env, &set).await
        };
        match res {
            Ok(item) => {
                env.set_result(Payload::Document(item), 200);
                Ok(())
            }
            Err(e) => self.fail(e, req, env),
        }
    }

    async fn update_atomic(&self, req: &Request, set: &Document) -> Result<Document, OpError> {
        let view = self.scope(req).await?;
        let query = Self::by_id(&view, req)?;
        if set.is_empty() {
            log::debug!("{}: empty update body, reading current document", self.model.name);
            let mut query = query;
            for spec in &req.query.populate {
                query = query.populate(spec.clone());
            }
            return query.exec_one(self.store.as_ref()).await?.ok_or(OpError::NotFound);
        }
        let opts = UpdateOptions { new: true, run_validators: self.options.run_validators };
        let updated = query.find_one_and_update(self.store.as_ref(), set, &opts).await?.ok_or(OpError::NotFound)?;
        log::info!(target: AUDIT_TARGET, "update collection={} id={} paths={}", self.model.collection, self.identity_of(&updated), set.len());
        Ok(self.store.populate(&self.model, updated, &req.query.populate).await?)
    }

    async fn update_loaded(&self, req: &Request, env: &mut Envelope, set: &Document) -> Result<Document, OpError> {
        let mut doc = env.document.take().ok_or(OpError::NotFound)?;
        let saved = if apply_set(&self.model, &mut doc, set) {
            let saved = self.store.save(&self.model, doc).await?;
            log::info!(target: AUDIT_TARGET, "update collection={} id={} paths={}", self.model.collection, self.identity_of(&saved), set.len());
            saved
        } else {
            doc
        };
        Ok(self.store.populate(&self.model, saved, &req.query.populate).await?)
    }

    fn prepare(&self, req: &Request) -> Document {
        let body = req.body.clone().unwrap_or_default();
        sanitize(body, &req.access, self.filter.as_ref(), &self.model, &req.query.populate)
    }

    /// Load the addressed document onto `env.document` for the non-atomic update and
    /// delete paths.
    ///
    /// # Errors
    /// `OpError::NotFound` when no document has the identity, `OpError::Store` otherwise.
    pub async fn load_document(&self, req: &Request, env: &mut Envelope) -> Result<(), OpError> {
        let res = async {
            let view = self.scope(req).await?;
            Self::by_id(&view, req)?.exec_one(self.store.as_ref()).await?.ok_or(OpError::NotFound)
        }
        .await;
        match res {
            Ok(doc) => {
                env.document = Some(doc);
                Ok(())
            }
            Err(e) => self.fail(e, req, env),
        }
    }
}
