#![allow(dead_code)]

use async_trait::async_trait;
use bson::{Bson, doc};
use docrest::access::{Access, AccessContext, ExcludedMap};
use docrest::config::Options;
use docrest::errors::DbError;
use docrest::model::{IdKind, ModelRegistry, ResourceModel, Visibility};
use docrest::operations::Operations;
use docrest::query::{PopulateSpec, Query};
use docrest::store::{MemoryStore, Store, UpdateOptions};
use docrest::types::{Document, DocumentId};
use std::sync::Arc;

pub fn customer_model() -> ResourceModel {
    ResourceModel::new("Customer")
        .id_kind(IdKind::String)
        .required("name")
        .scalar("age")
        .reference("account", "Account")
        .references("orders", "Order")
        .embedded("address")
        .hidden("ssn", Visibility::Private)
        .hidden("address.zip", Visibility::Protected)
}

pub fn registry() -> (ModelRegistry, Arc<ResourceModel>) {
    let mut reg = ModelRegistry::new();
    reg.register(ResourceModel::new("Account").id_kind(IdKind::String).required("name"));
    reg.register(ResourceModel::new("Order").id_kind(IdKind::String).scalar("total"));
    let customer = reg.register(customer_model());
    (reg, customer)
}

pub fn seeded_store() -> (Arc<MemoryStore>, Arc<ResourceModel>) {
    let (reg, customer) = registry();
    let store = Arc::new(MemoryStore::new(reg));
    store.seed("accounts", [doc! { "_id": "A1", "name": "Acme" }, doc! { "_id": "A2", "name": "Globex" }]);
    store.seed("orders", [doc! { "_id": "O1", "total": 10 }, doc! { "_id": "O2", "total": 20 }]);
    store.seed(
        "customers",
        [
            doc! { "_id": "c1", "name": "Bob", "age": 40, "ssn": "111", "account": "A1", "orders": ["O1"], "owner": "u1", "__v": 0 },
            doc! { "_id": "c2", "name": "Alice", "age": 30, "ssn": "222", "account": "A2", "orders": ["O1", "O2"], "address": { "city": "X", "zip": "9" }, "owner": "u2", "__v": 0 },
            doc! { "_id": "c3", "name": "Carol", "age": 35, "owner": "u1", "__v": 0 },
        ],
    );
    (store, customer)
}

pub fn operations(options: Options) -> (Operations, Arc<MemoryStore>) {
    let (store, customer) = seeded_store();
    (Operations::new(customer, store.clone(), options), store)
}

pub fn ctx(access: Access) -> AccessContext {
    AccessContext::new(access, Arc::new(ExcludedMap::from_model(&customer_model())))
}

/// A store whose every call fails, for the 400 paths.
pub struct FailingStore;

fn boom<T>() -> Result<T, DbError> {
    Err(DbError::QueryError("connection reset".into()))
}

#[async_trait]
impl Store for FailingStore {
    async fn find(&self, _: &Query) -> Result<Vec<Document>, DbError> {
        boom()
    }
    async fn find_one(&self, _: &Query) -> Result<Option<Document>, DbError> {
        boom()
    }
    async fn count(&self, _: &Query) -> Result<u64, DbError> {
        boom()
    }
    async fn distinct(&self, _: &Query, _: &str) -> Result<Vec<Bson>, DbError> {
        boom()
    }
    async fn remove(&self, _: &Query) -> Result<u64, DbError> {
        boom()
    }
    async fn find_one_and_remove(&self, _: &Query) -> Result<Option<Document>, DbError> {
        boom()
    }
    async fn find_one_and_update(&self, _: &Query, _: &Document, _: &UpdateOptions) -> Result<Option<Document>, DbError> {
        boom()
    }
    async fn create(&self, _: &ResourceModel, _: Document) -> Result<Document, DbError> {
        boom()
    }
    async fn save(&self, _: &ResourceModel, _: Document) -> Result<Document, DbError> {
        boom()
    }
    async fn remove_document(&self, _: &ResourceModel, _: &DocumentId) -> Result<(), DbError> {
        boom()
    }
    async fn populate(&self, _: &ResourceModel, _: Document, _: &[PopulateSpec]) -> Result<Document, DbError> {
        boom()
    }
}
