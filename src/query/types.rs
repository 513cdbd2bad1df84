use bson::Bson;
use serde::{Deserialize, Serialize};

// Safety limits to prevent resource abuse
pub(crate) const MAX_PATH_DEPTH: usize = 32;
pub(crate) const MAX_IN_SET: usize = 1000;
pub const MAX_SORT_FIELDS: usize = 8;
pub const MAX_PROJECTION_FIELDS: usize = 64;
pub const MAX_POPULATE_PATHS: usize = 16;
pub const MAX_LIMIT: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
    #[cfg(feature = "regex")]
    Regex { path: String, pattern: String, case_insensitive: bool },
}

impl Filter {
    #[must_use]
    pub fn eq(path: &str, value: impl Into<Bson>) -> Self {
        Self::Cmp { path: path.to_string(), op: CmpOp::Eq, value: value.into() }
    }

    /// Conjoin two filters, dropping trivial `True` operands.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, f) | (f, Self::True) => f,
            (Self::And(mut fs), Self::And(more)) => {
                fs.extend(more);
                Self::And(fs)
            }
            (Self::And(mut fs), f) => {
                fs.push(f);
                Self::And(fs)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }
}

/// Field selection: inclusion list, exclusion list, or both (identity is kept unless excluded).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Projection {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.include.len() + self.exclude.len()
    }
}

/// Expand the reference stored at `path`, optionally selecting fields of the referent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateSpec {
    pub path: String,
    #[serde(default)]
    pub select: Option<Projection>,
}

impl PopulateSpec {
    #[must_use]
    pub fn path(path: &str) -> Self {
        Self { path: path.to_string(), select: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Per-request query parameters, already validated in shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub filter: Filter,
    pub projection: Option<Projection>,
    pub sort: Vec<SortSpec>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub populate: Vec<PopulateSpec>,
    pub distinct: Option<String>,
    pub read_preference: Option<ReadPreference>,
}

impl Default for Filter {
    fn default() -> Self {
        Self::True
    }
}
