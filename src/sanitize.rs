//! Write-path body preparation: access filtering, identity stripping, depopulation of
//! embedded references, and flattening to dot-notation change sets.

use crate::access::{AccessContext, FieldFilter};
use crate::model::{DEFAULT_ID_PROPERTY, FieldKind, ResourceModel};
use crate::query::{PopulateSpec, get_path, set_path};
use crate::types::Document;
use bson::Bson;

/// Outcome of depopulating one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Depopulated {
    Unchanged,
    Replaced(Bson),
}

/// Filter `body` through the access policy, then drop the identity and version fields,
/// including dotted keys beneath them.
#[must_use]
pub fn sanitize(
    body: Document,
    ctx: &AccessContext,
    filter: &dyn FieldFilter,
    model: &ResourceModel,
    populate: &[PopulateSpec],
) -> Document {
    let mut body = filter.filter_object(body, ctx, populate);
    let reserved: Vec<&str> = std::iter::once(model.id_property.as_str()).chain(model.version_key.as_deref()).collect();
    let doomed: Vec<String> = body.keys().filter(|k| reserved.iter().any(|r| at_or_under(k, r))).cloned().collect();
    for key in doomed {
        body.remove(&key);
    }
    body
}

fn at_or_under(key: &str, field: &str) -> bool {
    key.strip_prefix(field).is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// Replace embedded reference documents with their identity values. Keys are never dropped.
#[must_use]
pub fn depopulate(model: &ResourceModel, body: &Document) -> Document {
    depopulate_at(model, body, "")
}

fn depopulate_at(model: &ResourceModel, body: &Document, prefix: &str) -> Document {
    let mut out = Document::new();
    for (key, value) in body {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        let value = match depopulate_field(model, &path, value) {
            Depopulated::Unchanged => value.clone(),
            Depopulated::Replaced(v) => v,
        };
        out.insert(key.clone(), value);
    }
    out
}

fn depopulate_field(model: &ResourceModel, path: &str, value: &Bson) -> Depopulated {
    match (model.kind_of(path), value) {
        (Some(FieldKind::ReferenceCollection { .. }), Bson::Array(items)) => {
            if !items.iter().any(|v| matches!(v, Bson::Document(_))) {
                return Depopulated::Unchanged;
            }
            let positional = items
                .iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), reference_id(item).unwrap_or_else(|| item.clone())))
                .collect::<Document>();
            Depopulated::Replaced(Bson::Document(positional))
        }
        (Some(kind), Bson::Document(_)) if kind.is_reference() => {
            reference_id(value).map_or(Depopulated::Unchanged, Depopulated::Replaced)
        }
        (_, Bson::Document(d)) => Depopulated::Replaced(Bson::Document(depopulate_at(model, d, path))),
        _ => Depopulated::Unchanged,
    }
}

fn reference_id(value: &Bson) -> Option<Bson> {
    match value {
        Bson::Document(d) => d.get(DEFAULT_ID_PROPERTY).filter(|id| !matches!(id, Bson::Null)).cloned(),
        _ => None,
    }
}

/// Flatten nested sub-documents to dotted keys. Empty sub-documents stay as leaves.
#[must_use]
pub fn flatten(doc: &Document) -> Document {
    let mut out = Document::new();
    flatten_into(doc, "", &|_| false, &mut out);
    out
}

/// Like [`flatten`], but reference fields of `model` are leaves.
#[must_use]
pub fn flatten_for(model: &ResourceModel, doc: &Document) -> Document {
    let mut out = Document::new();
    flatten_into(doc, "", &|path| model.is_reference(path), &mut out);
    out
}

fn flatten_into(doc: &Document, prefix: &str, is_leaf: &dyn Fn(&str) -> bool, out: &mut Document) {
    for (key, value) in doc {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            Bson::Document(d) if !d.is_empty() && !is_leaf(&path) => flatten_into(d, &path, is_leaf, out),
            _ => {
                out.insert(path, value.clone());
            }
        }
    }
}

/// Depopulate then flatten: the `$set` change set for an update body.
#[must_use]
pub fn change_set(model: &ResourceModel, body: &Document) -> Document {
    flatten_for(model, &depopulate(model, body))
}

/// Apply a flattened change set to `doc`. Returns whether anything changed.
pub fn apply_set(model: &ResourceModel, doc: &mut Document, set: &Document) -> bool {
    let mut changed = false;
    for (path, value) in set {
        let value = match (model.kind_of(path), value) {
            (Some(FieldKind::ReferenceCollection { .. }), Bson::Document(positions)) if is_positional(positions) => {
                assign_positions(get_path(doc, path), positions)
            }
            _ => value.clone(),
        };
        changed |= set_path(doc, path, value);
    }
    changed
}

fn is_positional(d: &Document) -> bool {
    !d.is_empty() && d.keys().all(|k| k.parse::<usize>().is_ok())
}

fn assign_positions(current: Option<&Bson>, positions: &Document) -> Bson {
    let mut items = match current {
        Some(Bson::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    for (key, value) in positions {
        let Ok(i) = key.parse::<usize>() else { continue };
        if i >= items.len() {
            items.resize(i + 1, Bson::Null);
        }
        items[i] = value.clone();
    }
    Bson::Array(items)
}
