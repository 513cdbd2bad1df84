//! Field-level access policy: access levels, precomputed exclusion sets, and the
//! [`FieldFilter`] contract used on the write path and by the distinct-field gate.

use crate::model::{ResourceModel, Visibility};
use crate::query::PopulateSpec;
use crate::types::Document;
use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Public,
    Protected,
    Private,
}

impl FromStr for Access {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "protected" => Ok(Self::Protected),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown access level: {other}")),
        }
    }
}

/// Field paths hidden from each access level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedMap {
    by_access: HashMap<Access, BTreeSet<String>>,
}

impl ExcludedMap {
    /// Public callers lose protected and private fields, protected callers lose private
    /// fields, private callers see everything.
    #[must_use]
    pub fn from_model(model: &ResourceModel) -> Self {
        let private: BTreeSet<String> = model.fields_with(Visibility::Private).map(str::to_string).collect();
        let protected: BTreeSet<String> = model.fields_with(Visibility::Protected).map(str::to_string).collect();
        let mut by_access = HashMap::new();
        by_access.insert(Access::Public, private.union(&protected).cloned().collect());
        by_access.insert(Access::Protected, private);
        by_access.insert(Access::Private, BTreeSet::new());
        Self { by_access }
    }

    #[must_use]
    pub fn with(mut self, access: Access, fields: &[&str]) -> Self {
        self.by_access.entry(access).or_default().extend(fields.iter().map(|f| (*f).to_string()));
        self
    }

    pub fn excluded_for(&self, access: Access) -> impl Iterator<Item = &str> {
        self.by_access.get(&access).into_iter().flatten().map(String::as_str)
    }

    /// A field is hidden when it is excluded itself, lives under an excluded path, or
    /// contains an excluded path.
    #[must_use]
    pub fn is_excluded(&self, access: Access, field: &str) -> bool {
        self.excluded_for(access).any(|ex| overlaps(ex, field))
    }
}

fn overlaps(a: &str, b: &str) -> bool {
    fn under(child: &str, parent: &str) -> bool {
        child.len() > parent.len() && child.starts_with(parent) && child.as_bytes()[parent.len()] == b'.'
    }
    a == b || under(a, b) || under(b, a)
}

/// Who is calling and what they may see.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub caller: Option<String>,
    pub access: Access,
    pub excluded: Arc<ExcludedMap>,
}

impl AccessContext {
    #[must_use]
    pub const fn new(access: Access, excluded: Arc<ExcludedMap>) -> Self {
        Self { caller: None, access, excluded }
    }

    #[must_use]
    pub fn caller(mut self, caller: &str) -> Self {
        self.caller = Some(caller.to_string());
        self
    }
}

/// Access policy engine consulted by the operations.
pub trait FieldFilter: Send + Sync {
    /// Remove every field of `body` the caller may not touch.
    fn filter_object(&self, body: Document, ctx: &AccessContext, populate: &[PopulateSpec]) -> Document;

    /// Whether `field` is hidden from the caller.
    fn is_excluded(&self, field: &str, ctx: &AccessContext) -> bool;
}

/// Default policy driven by the caller's [`ExcludedMap`], with optional per-reference
/// maps applied to populated sub-documents.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    references: HashMap<String, Arc<ExcludedMap>>,
}

impl ExclusionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter documents populated at `path` with the referenced resource's exclusions.
    #[must_use]
    pub fn with_reference(mut self, path: &str, excluded: Arc<ExcludedMap>) -> Self {
        self.references.insert(path.to_string(), excluded);
        self
    }
}

impl FieldFilter for ExclusionFilter {
    fn filter_object(&self, mut body: Document, ctx: &AccessContext, populate: &[PopulateSpec]) -> Document {
        let excluded: Vec<&str> = ctx.excluded.excluded_for(ctx.access).collect();
        for path in &excluded {
            remove_path(&mut body, path);
        }
        remove_dotted_keys(&mut body, "", &excluded);
        for spec in populate {
            let Some(excluded) = self.references.get(&spec.path) else { continue };
            if let Some(value) = get_path_mut(&mut body, &spec.path) {
                for path in excluded.excluded_for(ctx.access) {
                    remove_from_value(value, path);
                }
            }
        }
        body
    }

    fn is_excluded(&self, field: &str, ctx: &AccessContext) -> bool {
        ctx.excluded.is_excluded(ctx.access, field)
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(v) = doc.get_mut(head) {
                remove_from_value(v, rest);
            }
        }
    }
}

/// Dotted keys (`{"address.zip": ..}`) name nested paths once flattened, so they are
/// matched against the exclusions by their full path.
fn remove_dotted_keys(doc: &mut Document, prefix: &str, excluded: &[&str]) {
    let keys: Vec<String> = doc.keys().cloned().collect();
    for key in keys {
        let full = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        if key.contains('.') && excluded.iter().any(|ex| overlaps(ex, &full)) {
            doc.remove(&key);
        } else if let Some(Bson::Document(d)) = doc.get_mut(&key) {
            remove_dotted_keys(d, &full, excluded);
        }
    }
}

fn remove_from_value(value: &mut Bson, path: &str) {
    match value {
        Bson::Document(d) => remove_path(d, path),
        Bson::Array(items) => items.iter_mut().for_each(|v| remove_from_value(v, path)),
        _ => {}
    }
}

fn get_path_mut<'a>(doc: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    match path.split_once('.') {
        None => doc.get_mut(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(d)) => get_path_mut(d, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn model() -> ResourceModel {
        ResourceModel::new("Customer")
            .scalar("name")
            .hidden("ssn", Visibility::Private)
            .hidden("address.zip", Visibility::Protected)
            .reference("account", "Account")
    }

    #[test]
    fn exclusions_shrink_with_privilege() {
        let m = ExcludedMap::from_model(&model());
        assert!(m.is_excluded(Access::Public, "ssn"));
        assert!(m.is_excluded(Access::Public, "address.zip"));
        assert!(m.is_excluded(Access::Protected, "ssn"));
        assert!(!m.is_excluded(Access::Protected, "address.zip"));
        assert!(!m.is_excluded(Access::Private, "ssn"));
    }

    #[test]
    fn parent_and_child_paths_are_excluded() {
        let m = ExcludedMap::from_model(&model());
        // distinct over the parent would leak the child
        assert!(m.is_excluded(Access::Public, "address"));
        assert!(!m.is_excluded(Access::Public, "addressee"));
        let m = ExcludedMap::default().with(Access::Public, &["secret"]);
        assert!(m.is_excluded(Access::Public, "secret.inner"));
    }

    #[test]
    fn filter_object_strips_nested_and_populated_fields() {
        let excluded = Arc::new(ExcludedMap::from_model(&model()));
        let account_excluded = Arc::new(ExcludedMap::default().with(Access::Public, &["balance"]));
        let f = ExclusionFilter::new().with_reference("account", account_excluded);
        let ctx = AccessContext::new(Access::Public, excluded);
        let body = doc! {
            "name": "Alice",
            "ssn": "123",
            "address": { "city": "X", "zip": "999" },
            "account": { "_id": "A1", "balance": 10 },
        };
        let populate = vec![PopulateSpec::path("account")];
        let out = f.filter_object(body, &ctx, &populate);
        assert_eq!(out, doc! { "name": "Alice", "address": { "city": "X" }, "account": { "_id": "A1" } });
    }

    #[test]
    fn filter_object_strips_dotted_keys() {
        let ctx = AccessContext::new(Access::Public, Arc::new(ExcludedMap::from_model(&model())));
        let body = doc! {
            "ssn.last4": "1234",
            "address.zip": "0",
            "address": { "zip.plus4": "1", "city": "Y" },
            "address.city": "Z",
            "name": "n",
        };
        let out = ExclusionFilter::new().filter_object(body, &ctx, &[]);
        assert_eq!(out, doc! { "address": { "city": "Y" }, "address.city": "Z", "name": "n" });
    }

    #[test]
    fn access_parses_case_insensitively() {
        assert_eq!("Private".parse::<Access>().unwrap(), Access::Private);
        assert!("admin".parse::<Access>().is_err());
    }
}
