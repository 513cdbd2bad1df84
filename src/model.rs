//! Resource models: the static shape of one collection as seen by the operation layer.
//!
//! A model carries a capability table mapping each declared field path to a
//! [`FieldKind`]. Sanitizing and population switch on that table instead of
//! inspecting values at runtime.

use crate::errors::DbError;
use crate::types::{CollectionName, DocumentId};
use bson::Bson;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_ID_PROPERTY: &str = "_id";
pub const DEFAULT_VERSION_KEY: &str = "__v";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldKind {
    Scalar,
    Embedded,
    #[serde(rename = "reference")]
    SingularReference { to: String },
    #[serde(rename = "references")]
    ReferenceCollection { to: String },
}

impl FieldKind {
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::SingularReference { .. } | Self::ReferenceCollection { .. })
    }

    /// Name of the referenced resource, if this is a reference field.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::SingularReference { to } | Self::ReferenceCollection { to } => Some(to),
            Self::Scalar | Self::Embedded => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    #[default]
    ObjectId,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    #[must_use]
    pub const fn new(kind: FieldKind) -> Self {
        Self { kind, visibility: Visibility::Public, required: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceModel {
    pub name: String,
    pub collection: CollectionName,
    #[serde(default = "default_id_property")]
    pub id_property: String,
    #[serde(default)]
    pub id_kind: IdKind,
    #[serde(default = "default_version_key")]
    pub version_key: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
}

fn default_id_property() -> String {
    DEFAULT_ID_PROPERTY.to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_version_key() -> Option<String> {
    Some(DEFAULT_VERSION_KEY.to_string())
}

impl ResourceModel {
    /// A model whose collection name is the lowercased, pluralized resource name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: format!("{}s", name.to_ascii_lowercase()),
            id_property: default_id_property(),
            id_kind: IdKind::ObjectId,
            version_key: default_version_key(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    #[must_use]
    pub fn id_kind(mut self, kind: IdKind) -> Self {
        self.id_kind = kind;
        self
    }

    #[must_use]
    pub fn version_key(mut self, key: Option<&str>) -> Self {
        self.version_key = key.map(str::to_string);
        self
    }

    #[must_use]
    pub fn field(mut self, path: &str, def: FieldDef) -> Self {
        self.fields.insert(path.to_string(), def);
        self
    }

    #[must_use]
    pub fn scalar(self, path: &str) -> Self {
        self.field(path, FieldDef::new(FieldKind::Scalar))
    }

    #[must_use]
    pub fn required(self, path: &str) -> Self {
        self.field(path, FieldDef { required: true, ..FieldDef::new(FieldKind::Scalar) })
    }

    #[must_use]
    pub fn embedded(self, path: &str) -> Self {
        self.field(path, FieldDef::new(FieldKind::Embedded))
    }

    #[must_use]
    pub fn reference(self, path: &str, to: &str) -> Self {
        self.field(path, FieldDef::new(FieldKind::SingularReference { to: to.to_string() }))
    }

    #[must_use]
    pub fn references(self, path: &str, to: &str) -> Self {
        self.field(path, FieldDef::new(FieldKind::ReferenceCollection { to: to.to_string() }))
    }

    /// Declare a scalar field with a visibility level.
    #[must_use]
    pub fn hidden(self, path: &str, visibility: Visibility) -> Self {
        self.field(path, FieldDef { visibility, ..FieldDef::new(FieldKind::Scalar) })
    }

    #[must_use]
    pub fn kind_of(&self, path: &str) -> Option<&FieldKind> {
        self.fields.get(path).map(|d| &d.kind)
    }

    #[must_use]
    pub fn is_reference(&self, path: &str) -> bool {
        self.kind_of(path).is_some_and(FieldKind::is_reference)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter(|(_, d)| d.required).map(|(p, _)| p.as_str())
    }

    pub fn fields_with(&self, visibility: Visibility) -> impl Iterator<Item = &str> {
        self.fields.iter().filter(move |(_, d)| d.visibility == visibility).map(|(p, _)| p.as_str())
    }

    /// Convert an identity value to the representation the model stores.
    ///
    /// # Errors
    /// Returns `DbError::Cast` when a string cannot be read as an `ObjectId`.
    pub fn cast_id(&self, id: &DocumentId) -> Result<DocumentId, DbError> {
        match (self.id_kind, id) {
            (IdKind::ObjectId, Bson::String(s)) => ObjectId::parse_str(s)
                .map(Bson::ObjectId)
                .map_err(|_| DbError::Cast(format!("Cast to ObjectId failed for value \"{s}\" at path \"{}\"", self.id_property))),
            _ => Ok(id.clone()),
        }
    }

    /// Read a raw path segment (e.g. from a URL) as an identity value.
    #[must_use]
    pub fn parse_id(&self, raw: &str) -> DocumentId {
        match self.id_kind {
            IdKind::ObjectId => {
                ObjectId::parse_str(raw).map_or_else(|_| Bson::String(raw.to_string()), Bson::ObjectId)
            }
            IdKind::String => Bson::String(raw.to_string()),
        }
    }

    /// Mint a fresh identity value for a new document.
    #[must_use]
    pub fn new_id(&self) -> DocumentId {
        match self.id_kind {
            IdKind::ObjectId => Bson::ObjectId(ObjectId::new()),
            IdKind::String => Bson::String(ObjectId::new().to_hex()),
        }
    }
}

/// All models known to a deployment, keyed by resource name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ResourceModel>>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: ResourceModel) -> Arc<ResourceModel> {
        let model = Arc::new(model);
        self.models.insert(model.name.clone(), model.clone());
        model
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ResourceModel>> {
        self.models.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceModel>> {
        self.models.values()
    }

    /// The model a reference field of `model` points at.
    #[must_use]
    pub fn target_of(&self, model: &ResourceModel, path: &str) -> Option<Arc<ResourceModel>> {
        model.kind_of(path).and_then(FieldKind::target).and_then(|t| self.get(t))
    }
}
