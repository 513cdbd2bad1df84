mod support;

use bson::{Bson, doc};
use docrest::access::Access;
use docrest::config::Options;
use docrest::envelope::{Envelope, Payload};
use docrest::errors::OpError;
use docrest::model::{ModelRegistry, ResourceModel};
use docrest::operations::{ErrorHandler, Operations, Request};
use docrest::query::parse_query_options_json;
use docrest::scope::FieldScope;
use docrest::store::MemoryStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use support::{FailingStore, ctx, operations, seeded_store};

fn req(access: Access) -> Request {
    Request::new(ctx(access))
}

fn with_query(access: Access, json: &str) -> Request {
    req(access).query(parse_query_options_json(json).unwrap())
}

fn docs(env: &Envelope) -> &[bson::Document] {
    match &env.result {
        Some(Payload::Documents(d)) => d,
        other => panic!("expected documents, got {other:?}"),
    }
}

fn document(env: &Envelope) -> &bson::Document {
    match &env.result {
        Some(Payload::Document(d)) => d,
        other => panic!("expected a document, got {other:?}"),
    }
}

#[tokio::test]
async fn list_is_scoped_to_the_caller() {
    let (ops, store) = operations(Options::default());
    let ops = ops.with_context_filter(Arc::new(FieldScope::new("owner")));
    let mut env = Envelope::new();
    let r = Request::new(ctx(Access::Public).caller("u1"));
    ops.get_items(&r, &mut env).await.unwrap();
    assert_eq!(env.status_code, Some(200));
    let names: Vec<&str> = docs(&env).iter().map(|d| d.get_str("name").unwrap()).collect();
    assert_eq!(names, vec!["Bob", "Carol"]);
    assert_eq!(env.total_count, None);
    assert_eq!(store.round_trips(), 1);
}

#[tokio::test]
async fn total_count_ignores_pagination_and_costs_one_more_call() {
    let (ops, store) = operations(Options { total_count_header: true, ..Options::default() });
    let mut env = Envelope::new();
    ops.get_items(&with_query(Access::Public, r#"{"sort": "age", "skip": 1, "limit": 1}"#), &mut env).await.unwrap();
    assert_eq!(docs(&env).len(), 1);
    assert_eq!(docs(&env)[0].get_str("name").unwrap(), "Carol");
    assert_eq!(env.total_count, Some(3));
    assert_eq!(store.round_trips(), 2);
}

#[tokio::test]
async fn distinct_on_excluded_field_is_answered_without_the_store() {
    let (ops, store) = operations(Options::default());
    let r = with_query(Access::Public, r#"{"distinct": "ssn"}"#);

    let mut env = Envelope::new();
    ops.get_items(&r, &mut env).await.unwrap();
    assert_eq!(env.result, Some(Payload::Documents(vec![])));
    assert_eq!(env.status_code, Some(200));

    let mut env = Envelope::new();
    ops.get_item(&r.clone().id("c1"), &mut env).await.unwrap();
    assert_eq!(env.result, Some(Payload::Documents(vec![])));

    let mut env = Envelope::new();
    ops.get_shallow(&r.id("c1"), &mut env).await.unwrap();
    assert_eq!(env.result, Some(Payload::Documents(vec![])));
    assert_eq!(store.round_trips(), 0);
}

#[tokio::test]
async fn distinct_on_visible_field_lists_values() {
    let (ops, _) = operations(Options::default());
    let mut env = Envelope::new();
    ops.get_items(&with_query(Access::Private, r#"{"distinct": "ssn"}"#), &mut env).await.unwrap();
    assert_eq!(env.result, Some(Payload::Values(vec![Bson::from("111"), Bson::from("222")])));
}

#[tokio::test]
async fn count_applies_the_filter() {
    let (ops, _) = operations(Options::default());
    let mut env = Envelope::new();
    ops.get_count(&with_query(Access::Public, r#"{"query": {"age": {"$gte": 35}}}"#), &mut env).await.unwrap();
    assert_eq!(env.result, Some(Payload::Count { count: 2 }));
    assert_eq!(env.status_code, Some(200));
}

#[tokio::test]
async fn read_one_populates_in_a_single_call() {
    let (ops, store) = operations(Options::default());
    let mut env = Envelope::new();
    let r = with_query(Access::Public, r#"{"populate": "account,orders"}"#).id("c2");
    ops.get_item(&r, &mut env).await.unwrap();
    let item = document(&env);
    assert_eq!(item.get_document("account").unwrap(), &doc! { "_id": "A2", "name": "Globex" });
    assert_eq!(item.get_array("orders").unwrap().len(), 2);
    assert_eq!(store.round_trips(), 1);
}

#[tokio::test]
async fn read_one_missing_is_not_found() {
    let (ops, _) = operations(Options::default());
    let mut env = Envelope::new();
    let err = ops.get_item(&req(Access::Public).id("nope"), &mut env).await.unwrap_err();
    assert!(matches!(err, OpError::NotFound));
    assert_eq!(env.status_code, Some(404));
    assert_eq!(env.error.as_deref(), Some("Not Found"));
    assert!(env.result.is_none());
}

#[tokio::test]
async fn malformed_object_id_is_a_bad_request() {
    let mut reg = ModelRegistry::new();
    let thing = reg.register(ResourceModel::new("Thing"));
    let ops = Operations::new(thing, Arc::new(MemoryStore::new(reg)), Options::default());
    let mut env = Envelope::new();
    let err = ops.get_item(&req(Access::Public).id("not-hex"), &mut env).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(env.status_code, Some(400));
}

#[tokio::test]
async fn store_failures_are_bad_requests_with_the_message() {
    let (_, customer) = seeded_store();
    let ops = Operations::new(customer, Arc::new(FailingStore), Options::default());
    let mut env = Envelope::new();
    assert!(ops.get_items(&req(Access::Public), &mut env).await.is_err());
    assert_eq!(env.status_code, Some(400));
    assert_eq!(env.error.as_deref(), Some("Query error: connection reset"));

    let mut env = Envelope::new();
    assert!(ops.create_object(&req(Access::Public).body(doc! { "name": "x" }), &mut env).await.is_err());
    assert_eq!(env.status_code, Some(400));
}

#[tokio::test]
async fn shallow_read_marks_nested_values() {
    let (ops, _) = operations(Options::default());
    let mut env = Envelope::new();
    ops.get_shallow(&req(Access::Private).id("c2"), &mut env).await.unwrap();
    assert_eq!(
        document(&env),
        &doc! {
            "_id": "c2", "name": "Alice", "age": 30, "ssn": "222", "account": "A2",
            "orders": true, "address": true, "owner": "u2", "__v": 0,
        }
    );
}

#[tokio::test]
async fn create_strips_identity_version_and_hidden_fields() {
    let (ops, store) = operations(Options::default());
    let mut env = Envelope::new();
    let body = doc! { "_id": "evil", "__v": 9, "name": "Zed", "ssn": "x", "account": "A1" };
    let r = with_query(Access::Public, r#"{"populate": "account"}"#).body(body);
    ops.create_object(&r, &mut env).await.unwrap();
    assert_eq!(env.status_code, Some(201));
    let item = document(&env);
    assert_ne!(item.get_str("_id").unwrap(), "evil");
    assert_eq!(item.get_i32("__v").unwrap(), 0);
    assert!(item.get("ssn").is_none());
    assert_eq!(item.get_document("account").unwrap().get_str("name").unwrap(), "Acme");
    assert_eq!(store.collection("customers").len(), 4);
    assert_eq!(store.round_trips(), 2);
}

#[tokio::test]
async fn create_without_required_field_fails() {
    let (ops, _) = operations(Options::default());
    let mut env = Envelope::new();
    let err = ops.create_object(&req(Access::Public), &mut env).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn update_depopulates_and_sets_dotted_paths() {
    let (ops, store) = operations(Options::default());
    let body = doc! {
        "name": "Alice",
        "account": { "_id": "A1", "name": "Acme" },
        "orders": [{ "_id": "O1" }, { "_id": "O2" }],
        "address": { "city": "X" },
    };
    let mut env = Envelope::new();
    ops.modify_object(&req(Access::Public).id("c1").body(body), &mut env).await.unwrap();
    assert_eq!(env.status_code, Some(200));
    let item = document(&env);
    assert_eq!(item.get_str("name").unwrap(), "Alice");
    assert_eq!(item.get_str("account").unwrap(), "A1");
    assert_eq!(item.get_array("orders").unwrap(), &vec![Bson::from("O1"), Bson::from("O2")]);
    assert_eq!(item.get_document("address").unwrap(), &doc! { "city": "X" });
    assert_eq!(item.get_i32("age").unwrap(), 40);
    assert_eq!(store.round_trips(), 1);
}

#[tokio::test]
async fn update_keeps_sibling_fields_and_hidden_paths() {
    let (ops, store) = operations(Options::default());
    let mut env = Envelope::new();
    let body = doc! { "address": { "city": "Y", "zip": "0" }, "ssn": "hack" };
    ops.modify_object(&req(Access::Public).id("c2").body(body), &mut env).await.unwrap();
    let stored = store.collection("customers").get_all_documents().remove(1);
    assert_eq!(stored.get_document("address").unwrap(), &doc! { "city": "Y", "zip": "9" });
    assert_eq!(stored.get_str("ssn").unwrap(), "222");
}

#[tokio::test]
async fn update_missing_document_is_not_found() {
    let (ops, _) = operations(Options::default());
    let mut env = Envelope::new();
    let err = ops.modify_object(&req(Access::Public).id("zz").body(doc! { "name": "x" }), &mut env).await.unwrap_err();
    assert!(matches!(err, OpError::NotFound));
    assert_eq!(env.status_code, Some(404));
}

#[tokio::test]
async fn empty_update_returns_current_document_without_writing() {
    let (ops, store) = operations(Options::default());
    let mut env = Envelope::new();
    ops.modify_object(&req(Access::Public).id("c3").body(doc! { "_id": "c9", "__v": 4 }), &mut env).await.unwrap();
    assert_eq!(document(&env).get_str("name").unwrap(), "Carol");
    assert_eq!(store.metrics.writes_total.load(Ordering::Relaxed), 0);
    assert_eq!(store.round_trips(), 1);
}

#[tokio::test]
async fn run_validators_rejects_invalid_updates() {
    let (ops, _) = operations(Options { run_validators: true, ..Options::default() });
    let mut env = Envelope::new();
    let err = ops.modify_object(&req(Access::Public).id("c1").body(doc! { "name": Bson::Null }), &mut env).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn non_atomic_update_saves_the_loaded_document() {
    let (ops, store) = operations(Options { find_one_and_update: false, ..Options::default() });
    let r = req(Access::Public).id("c3").body(doc! { "orders": [{ "_id": "O2" }] });
    let mut env = Envelope::new();
    ops.load_document(&r, &mut env).await.unwrap();
    ops.modify_object(&r, &mut env).await.unwrap();
    let stored = store.collection("customers").get_all_documents().remove(2);
    assert_eq!(stored.get_array("orders").unwrap(), &vec![Bson::from("O2")]);

    let mut env = Envelope::new();
    let err = ops.modify_object(&r, &mut env).await.unwrap_err();
    assert!(matches!(err, OpError::NotFound));
}

#[tokio::test]
async fn update_ignores_dotted_keys_into_hidden_identity_and_version_fields() {
    let (ops, store) = operations(Options::default());
    let body = doc! { "ssn.x": "hack", "address.zip": "0", "_id.y": 1, "__v.z": 2, "name": "Z" };
    let mut env = Envelope::new();
    ops.modify_object(&req(Access::Public).id("c2").body(body), &mut env).await.unwrap();
    let stored = store.collection("customers").get_all_documents().remove(1);
    assert_eq!(stored.get_str("_id").unwrap(), "c2");
    assert_eq!(stored.get_str("name").unwrap(), "Z");
    assert_eq!(stored.get_str("ssn").unwrap(), "222");
    assert_eq!(stored.get_document("address").unwrap(), &doc! { "city": "X", "zip": "9" });
    assert_eq!(stored.get_i32("__v").unwrap(), 0);
}

#[tokio::test]
async fn atomic_update_populates_the_result() {
    let (ops, store) = operations(Options::default());
    let r = with_query(Access::Public, r#"{"populate": "account"}"#).id("c1").body(doc! { "name": "Z" });
    let mut env = Envelope::new();
    ops.modify_object(&r, &mut env).await.unwrap();
    let item = document(&env);
    assert_eq!(item.get_str("name").unwrap(), "Z");
    assert_eq!(item.get_document("account").unwrap(), &doc! { "_id": "A1", "name": "Acme" });
    let stored = store.collection("customers").get_all_documents().remove(0);
    assert_eq!(stored.get_str("account").unwrap(), "A1");
}

#[tokio::test]
async fn non_atomic_update_populates_the_result() {
    let (ops, store) = operations(Options { find_one_and_update: false, ..Options::default() });
    let r = with_query(Access::Public, r#"{"populate": "account"}"#).id("c2").body(doc! { "age": 31 });
    let mut env = Envelope::new();
    ops.load_document(&r, &mut env).await.unwrap();
    ops.modify_object(&r, &mut env).await.unwrap();
    let item = document(&env);
    assert_eq!(item.get_i32("age").unwrap(), 31);
    assert_eq!(item.get_document("account").unwrap(), &doc! { "_id": "A2", "name": "Globex" });
    let stored = store.collection("customers").get_all_documents().remove(1);
    assert_eq!(stored.get_str("account").unwrap(), "A2");
}

#[tokio::test]
async fn delete_one_then_again_is_not_found() {
    let (ops, store) = operations(Options::default());
    let r = req(Access::Public).id("c1");
    let mut env = Envelope::new();
    ops.delete_item(&r, &mut env).await.unwrap();
    assert_eq!(env.status_code, Some(204));
    assert!(env.result.is_none());
    assert_eq!(store.collection("customers").len(), 2);

    let mut env = Envelope::new();
    assert!(matches!(ops.delete_item(&r, &mut env).await, Err(OpError::NotFound)));
    assert_eq!(env.status_code, Some(404));
}

#[tokio::test]
async fn delete_many_removes_matches() {
    let (ops, store) = operations(Options::default());
    let mut env = Envelope::new();
    ops.delete_items(&with_query(Access::Public, r#"{"query": {"age": {"$gte": 35}}}"#), &mut env).await.unwrap();
    assert_eq!(env.status_code, Some(204));
    let left = store.collection("customers").get_all_documents();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].get_str("_id").unwrap(), "c2");
}

struct Counting(AtomicUsize);

impl ErrorHandler for Counting {
    fn on_error(&self, err: &OpError, _req: &Request, env: &mut Envelope) {
        self.0.fetch_add(1, Ordering::SeqCst);
        env.status_code = Some(err.status_code());
    }
}

#[tokio::test]
async fn custom_error_handler_sees_every_failure() {
    let handler = Arc::new(Counting(AtomicUsize::new(0)));
    let (ops, _) = operations(Options::default());
    let ops = ops.with_error_handler(handler.clone());
    let mut env = Envelope::new();
    let _ = ops.get_item(&req(Access::Public).id("zz"), &mut env).await;
    let _ = ops.delete_item(&req(Access::Public).id("zz"), &mut env).await;
    assert_eq!(handler.0.load(Ordering::SeqCst), 2);
    assert!(env.error.is_none());
}
