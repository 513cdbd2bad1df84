use crate::errors::DbError;
use crate::model::{FieldKind, IdKind, ModelRegistry, ResourceModel};
use crate::query::{Filter, PopulateSpec, Query, compare_docs, eval_filter, get_path, project, set_path};
use crate::sanitize::apply_set;
use crate::types::{CollectionName, Document, DocumentId};
use async_trait::async_trait;
use bson::Bson;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Store, UpdateOptions};

/// Documents of one collection, in insertion order.
pub struct Collection {
    pub name: CollectionName,
    docs: RwLock<Vec<Document>>,
}

impl Collection {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), docs: RwLock::new(Vec::new()) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    #[must_use]
    pub fn get_all_documents(&self) -> Vec<Document> {
        self.docs.read().clone()
    }
}

#[derive(Default)]
pub struct StoreMetrics {
    pub reads_total: AtomicU64,
    pub writes_total: AtomicU64,
}

/// In-process [`Store`]: collections live in memory behind `RwLock`s.
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionName, Arc<Collection>>>,
    models: ModelRegistry,
    pub metrics: StoreMetrics,
}

impl MemoryStore {
    #[must_use]
    pub fn new(models: ModelRegistry) -> Self {
        Self { collections: RwLock::new(HashMap::new()), models, metrics: StoreMetrics::default() }
    }

    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(col) = self.collections.read().get(name) {
            return col.clone();
        }
        self.collections.write().entry(name.to_string()).or_insert_with(|| Arc::new(Collection::new(name))).clone()
    }

    /// Load documents without counting round trips.
    pub fn seed(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        self.collection(collection).docs.write().extend(docs);
    }

    #[must_use]
    pub fn list_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Store calls served so far.
    #[must_use]
    pub fn round_trips(&self) -> u64 {
        self.metrics.reads_total.load(Ordering::Relaxed) + self.metrics.writes_total.load(Ordering::Relaxed)
    }

    fn read_call(&self, op: &str, query: &Query) {
        self.metrics.reads_total.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "store {op}: collection={} read_preference={:?} lean={}",
            query.collection(),
            query.read_preference,
            query.lean
        );
    }

    fn write_call(&self, op: &str, collection: &str) {
        self.metrics.writes_total.fetch_add(1, Ordering::Relaxed);
        log::debug!("store {op}: collection={collection}");
    }

    /// Matching documents after sort and pagination.
    fn select(&self, query: &Query) -> Result<Vec<Document>, DbError> {
        let filter = cast_filter(&query.model, &query.filter)?;
        let col = self.collection(query.collection());
        let docs = col.docs.read();
        Ok(matching(&docs, query, &filter).into_iter().map(|i| docs[i].clone()).collect())
    }

    fn shape(&self, query: &Query, doc: Document) -> Document {
        let doc = match &query.projection {
            Some(p) if !p.is_empty() => project(&doc, p, &query.model.id_property),
            _ => doc,
        };
        self.populate_now(&query.model, doc, &query.populate)
    }

    fn find_by_id(&self, model: &ResourceModel, id: &Bson) -> Option<Document> {
        let col = self.collection(&model.collection);
        let docs = col.docs.read();
        docs.iter().find(|d| d.get(&model.id_property) == Some(id)).cloned()
    }

    fn populate_now(&self, model: &ResourceModel, mut doc: Document, paths: &[PopulateSpec]) -> Document {
        for spec in paths {
            let Some(target) = self.models.target_of(model, &spec.path) else {
                log::debug!("populate: {} is not a known reference of {}", spec.path, model.name);
                continue;
            };
            let resolve = |id: &Bson| {
                self.find_by_id(&target, id).map(|d| match &spec.select {
                    Some(p) if !p.is_empty() => project(&d, p, &target.id_property),
                    _ => d,
                })
            };
            let populated = match (model.kind_of(&spec.path), get_path(&doc, &spec.path)) {
                (Some(FieldKind::SingularReference { .. }), Some(id)) if !matches!(id, Bson::Null) => {
                    Some(resolve(id).map_or(Bson::Null, Bson::Document))
                }
                (Some(FieldKind::ReferenceCollection { .. }), Some(Bson::Array(ids))) => {
                    Some(Bson::Array(ids.iter().filter_map(|id| resolve(id).map(Bson::Document)).collect()))
                }
                _ => None,
            };
            if let Some(v) = populated {
                set_path(&mut doc, &spec.path, v);
            }
        }
        doc
    }
}

/// Indices into `docs` of the matches, sorted then paginated.
fn matching(docs: &[Document], query: &Query, filter: &Filter) -> Vec<usize> {
    let mut hits: Vec<usize> = (0..docs.len()).filter(|&i| eval_filter(&docs[i], filter)).collect();
    if !query.sort.is_empty() {
        hits.sort_by(|&a, &b| compare_docs(&docs[a], &docs[b], &query.sort));
    }
    let skip = usize::try_from(query.skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = query.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
    hits.into_iter().skip(skip).take(limit).collect()
}

/// Cast string identities in comparisons on the identity field, as the driver would.
fn cast_filter(model: &ResourceModel, filter: &Filter) -> Result<Filter, DbError> {
    if model.id_kind != IdKind::ObjectId {
        return Ok(filter.clone());
    }
    let cast_all = |fs: &[Filter]| fs.iter().map(|f| cast_filter(model, f)).collect::<Result<Vec<_>, _>>();
    Ok(match filter {
        Filter::And(fs) => Filter::And(cast_all(fs)?),
        Filter::Or(fs) => Filter::Or(cast_all(fs)?),
        Filter::Nor(fs) => Filter::Nor(cast_all(fs)?),
        Filter::Not(f) => Filter::Not(Box::new(cast_filter(model, f)?)),
        Filter::Cmp { path, op, value } if *path == model.id_property => {
            Filter::Cmp { path: path.clone(), op: *op, value: model.cast_id(value)? }
        }
        Filter::In { path, values } if *path == model.id_property => Filter::In {
            path: path.clone(),
            values: values.iter().map(|v| model.cast_id(v)).collect::<Result<_, _>>()?,
        },
        Filter::Nin { path, values } if *path == model.id_property => Filter::Nin {
            path: path.clone(),
            values: values.iter().map(|v| model.cast_id(v)).collect::<Result<_, _>>()?,
        },
        other => other.clone(),
    })
}

/// Schema validation run on create/save, and on atomic updates when requested.
fn validate(model: &ResourceModel, doc: &Document) -> Result<(), DbError> {
    for path in model.required_fields() {
        if matches!(get_path(doc, path), None | Some(Bson::Null)) {
            return Err(DbError::Validation(format!("{}: Path `{path}` is required.", model.name)));
        }
    }
    for (path, def) in &model.fields {
        let bad = match (&def.kind, get_path(doc, path)) {
            (FieldKind::SingularReference { .. }, Some(v)) => matches!(v, Bson::Document(_) | Bson::Array(_)),
            (FieldKind::ReferenceCollection { .. }, Some(Bson::Array(items))) => {
                items.iter().any(|v| matches!(v, Bson::Document(_) | Bson::Array(_)))
            }
            (FieldKind::ReferenceCollection { .. }, Some(Bson::Null) | None) => false,
            (FieldKind::ReferenceCollection { .. }, Some(_)) => true,
            _ => false,
        };
        if bad {
            return Err(DbError::Cast(format!("{}: Cast to reference failed at path \"{path}\"", model.name)));
        }
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(&self, query: &Query) -> Result<Vec<Document>, DbError> {
        self.read_call("find", query);
        Ok(self.select(query)?.into_iter().map(|d| self.shape(query, d)).collect())
    }

    async fn find_one(&self, query: &Query) -> Result<Option<Document>, DbError> {
        self.read_call("find_one", query);
        Ok(self.select(query)?.into_iter().next().map(|d| self.shape(query, d)))
    }

    async fn count(&self, query: &Query) -> Result<u64, DbError> {
        self.read_call("count", query);
        Ok(self.select(query)?.len() as u64)
    }

    async fn distinct(&self, query: &Query, field: &str) -> Result<Vec<Bson>, DbError> {
        self.read_call("distinct", query);
        let mut out: Vec<Bson> = Vec::new();
        let mut push = |v: &Bson| {
            if !out.contains(v) {
                out.push(v.clone());
            }
        };
        for doc in self.select(query)? {
            match get_path(&doc, field) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut push),
                Some(v) => push(v),
                None => {}
            }
        }
        Ok(out)
    }

    async fn remove(&self, query: &Query) -> Result<u64, DbError> {
        self.write_call("remove", query.collection());
        let filter = cast_filter(&query.model, &query.filter)?;
        let col = self.collection(query.collection());
        let mut docs = col.docs.write();
        let mut doomed = matching(&docs, query, &filter);
        doomed.sort_unstable();
        for &i in doomed.iter().rev() {
            docs.remove(i);
        }
        Ok(doomed.len() as u64)
    }

    async fn find_one_and_remove(&self, query: &Query) -> Result<Option<Document>, DbError> {
        self.write_call("find_one_and_remove", query.collection());
        let filter = cast_filter(&query.model, &query.filter)?;
        let col = self.collection(query.collection());
        let mut docs = col.docs.write();
        Ok(matching(&docs, query, &filter).first().map(|&i| docs.remove(i)))
    }

    async fn find_one_and_update(
        &self,
        query: &Query,
        set: &Document,
        opts: &UpdateOptions,
    ) -> Result<Option<Document>, DbError> {
        self.write_call("find_one_and_update", query.collection());
        let filter = cast_filter(&query.model, &query.filter)?;
        let col = self.collection(query.collection());
        let mut docs = col.docs.write();
        let Some(&i) = matching(&docs, query, &filter).first() else { return Ok(None) };
        let mut after = docs[i].clone();
        apply_set(&query.model, &mut after, set);
        if opts.run_validators {
            validate(&query.model, &after)?;
        }
        let before = std::mem::replace(&mut docs[i], after.clone());
        Ok(Some(if opts.new { after } else { before }))
    }

    async fn create(&self, model: &ResourceModel, mut doc: Document) -> Result<Document, DbError> {
        self.write_call("create", &model.collection);
        if !matches!(doc.get(&model.id_property), Some(v) if *v != Bson::Null) {
            doc.insert(model.id_property.clone(), model.new_id());
        }
        if let Some(vk) = &model.version_key
            && !doc.contains_key(vk)
        {
            doc.insert(vk.clone(), Bson::Int32(0));
        }
        validate(model, &doc)?;
        let id = doc.get(&model.id_property).cloned().unwrap_or(Bson::Null);
        if self.find_by_id(model, &id).is_some() {
            return Err(DbError::Validation(format!("duplicate key {}: {id}", model.id_property)));
        }
        self.collection(&model.collection).docs.write().push(doc.clone());
        Ok(doc)
    }

    async fn save(&self, model: &ResourceModel, doc: Document) -> Result<Document, DbError> {
        self.write_call("save", &model.collection);
        validate(model, &doc)?;
        let id = doc.get(&model.id_property).cloned().unwrap_or(Bson::Null);
        let col = self.collection(&model.collection);
        let mut docs = col.docs.write();
        let slot = docs
            .iter_mut()
            .find(|d| d.get(&model.id_property) == Some(&id))
            .ok_or_else(|| DbError::NoSuchDocument(id.to_string()))?;
        *slot = doc.clone();
        Ok(doc)
    }

    async fn remove_document(&self, model: &ResourceModel, id: &DocumentId) -> Result<(), DbError> {
        self.write_call("remove_document", &model.collection);
        let col = self.collection(&model.collection);
        col.docs.write().retain(|d| d.get(&model.id_property) != Some(id));
        Ok(())
    }

    async fn populate(
        &self,
        model: &ResourceModel,
        doc: Document,
        paths: &[PopulateSpec],
    ) -> Result<Document, DbError> {
        if paths.is_empty() {
            return Ok(doc);
        }
        self.metrics.reads_total.fetch_add(1, Ordering::Relaxed);
        Ok(self.populate_now(model, doc, paths))
    }
}
