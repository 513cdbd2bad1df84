use crate::errors::DbError;
use crate::types::Document;
use bson::Bson;
use serde::{Deserialize, Serialize};

use super::types::{
    CmpOp, Filter, MAX_IN_SET, MAX_PATH_DEPTH, Order, PopulateSpec, Projection, QueryOptions,
    ReadPreference, SortSpec,
};

// Serde-facing structures for safe JSON parsing of query options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectSerde {
    List(String),
    Map(Document),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSerde {
    List(String),
    Map(Document),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulateSpecSerde {
    pub path: String,
    #[serde(default)]
    pub select: Option<SelectSerde>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PopulateSerde {
    List(String),
    Specs(Vec<PopulateSpecSerde>),
}

/// Query options as they arrive from query-string parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawQueryOptions {
    pub query: Option<Document>,
    pub select: Option<SelectSerde>,
    pub sort: Option<SortSerde>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub populate: Option<PopulateSerde>,
    pub distinct: Option<String>,
    pub read_preference: Option<ReadPreference>,
}

impl TryFrom<RawQueryOptions> for QueryOptions {
    type Error = DbError;
    fn try_from(raw: RawQueryOptions) -> Result<Self, Self::Error> {
        let filter = match raw.query {
            Some(q) => parse_filter_doc(&q)?,
            None => Filter::True,
        };
        let projection = raw.select.map(parse_select).transpose()?;
        let sort = raw.sort.map(parse_sort).transpose()?.unwrap_or_default();
        let populate = match raw.populate {
            None => Vec::new(),
            Some(PopulateSerde::List(s)) => split_list(&s).map(PopulateSpec::path).collect(),
            Some(PopulateSerde::Specs(specs)) => specs
                .into_iter()
                .map(|p| Ok(PopulateSpec { path: p.path, select: p.select.map(parse_select).transpose()? }))
                .collect::<Result<_, DbError>>()?,
        };
        Ok(Self {
            filter,
            projection,
            sort,
            skip: raw.skip,
            limit: raw.limit,
            populate,
            distinct: raw.distinct.filter(|d| !d.is_empty()),
            read_preference: raw.read_preference,
        })
    }
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty())
}

fn truthy(v: &Bson) -> Result<bool, DbError> {
    match v {
        Bson::Boolean(b) => Ok(*b),
        Bson::Int32(i) => Ok(*i != 0),
        Bson::Int64(i) => Ok(*i != 0),
        Bson::Double(f) => Ok(*f != 0.0),
        other => Err(DbError::QueryError(format!("invalid projection value: {other}"))),
    }
}

fn parse_select(sel: SelectSerde) -> Result<Projection, DbError> {
    let mut p = Projection::default();
    match sel {
        SelectSerde::List(s) => {
            for f in split_list(&s) {
                match f.strip_prefix('-') {
                    Some(ex) => p.exclude.push(ex.to_string()),
                    None => p.include.push(f.to_string()),
                }
            }
        }
        SelectSerde::Map(d) => {
            for (k, v) in d {
                if truthy(&v)? { p.include.push(k) } else { p.exclude.push(k) }
            }
        }
    }
    Ok(p)
}

fn parse_sort(sort: SortSerde) -> Result<Vec<SortSpec>, DbError> {
    match sort {
        SortSerde::List(s) => Ok(split_list(&s)
            .map(|f| match f.strip_prefix('-') {
                Some(desc) => SortSpec { field: desc.to_string(), order: Order::Desc },
                None => SortSpec { field: f.to_string(), order: Order::Asc },
            })
            .collect()),
        SortSerde::Map(d) => d
            .into_iter()
            .map(|(field, v)| {
                let order = match &v {
                    Bson::Int32(1) | Bson::Int64(1) => Order::Asc,
                    Bson::Int32(-1) | Bson::Int64(-1) => Order::Desc,
                    Bson::Double(f) if *f > 0.0 => Order::Asc,
                    Bson::Double(f) if *f < 0.0 => Order::Desc,
                    Bson::String(s) if matches!(s.as_str(), "asc" | "ascending") => Order::Asc,
                    Bson::String(s) if matches!(s.as_str(), "desc" | "descending") => Order::Desc,
                    other => return Err(DbError::QueryError(format!("invalid sort order for {field}: {other}"))),
                };
                Ok(SortSpec { field, order })
            })
            .collect(),
    }
}

/// Parse a Mongo-style filter document such as `{"age": {"$gt": 3}, "$or": [...]}`.
///
/// # Errors
/// Returns `DbError::QueryError` on unknown operators or malformed operands.
pub fn parse_filter_doc(doc: &Document) -> Result<Filter, DbError> {
    let mut parts = Vec::new();
    for (k, v) in doc {
        match k.as_str() {
            "$and" => parts.push(Filter::And(parse_filter_list(k, v)?)),
            "$or" => parts.push(Filter::Or(parse_filter_list(k, v)?)),
            "$nor" => parts.push(Filter::Nor(parse_filter_list(k, v)?)),
            op if op.starts_with('$') => {
                return Err(DbError::QueryError(format!("unknown top-level operator: {op}")));
            }
            path => parts.push(parse_field(path, v)?),
        }
    }
    Ok(match parts.len() {
        0 => Filter::True,
        1 => parts.remove(0),
        _ => Filter::And(parts),
    })
}

fn parse_filter_list(op: &str, v: &Bson) -> Result<Vec<Filter>, DbError> {
    let Bson::Array(items) = v else {
        return Err(DbError::QueryError(format!("{op} requires an array")));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => parse_filter_doc(d),
            other => Err(DbError::QueryError(format!("{op} entries must be documents, got {other}"))),
        })
        .collect()
}

fn parse_field(path: &str, v: &Bson) -> Result<Filter, DbError> {
    if path.split('.').count() > MAX_PATH_DEPTH {
        return Err(DbError::QueryError(format!("path too deep: {path}")));
    }
    match v {
        Bson::Document(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
            let mut fs = Vec::new();
            for (op, arg) in ops {
                if op == "$options" {
                    continue;
                }
                fs.push(parse_operator(path, op, arg, ops)?);
            }
            Ok(if fs.len() == 1 { fs.remove(0) } else { Filter::And(fs) })
        }
        Bson::RegularExpression(re) => {
            regex_filter(path, re.pattern.as_str(), re.options.as_str().contains('i'))
        }
        other => Ok(Filter::Cmp { path: path.to_string(), op: CmpOp::Eq, value: other.clone() }),
    }
}

fn parse_operator(path: &str, op: &str, arg: &Bson, all: &Document) -> Result<Filter, DbError> {
    let cmp = |op: CmpOp| -> Result<Filter, DbError> {
        Ok(Filter::Cmp { path: path.to_string(), op, value: arg.clone() })
    };
    match op {
        "$eq" => cmp(CmpOp::Eq),
        "$ne" => cmp(CmpOp::Ne),
        "$gt" => cmp(CmpOp::Gt),
        "$gte" => cmp(CmpOp::Gte),
        "$lt" => cmp(CmpOp::Lt),
        "$lte" => cmp(CmpOp::Lte),
        "$in" | "$nin" => {
            let Bson::Array(values) = arg else {
                return Err(DbError::QueryError(format!("{op} requires an array")));
            };
            let values: Vec<Bson> = values.iter().take(MAX_IN_SET).cloned().collect();
            Ok(if op == "$in" {
                Filter::In { path: path.to_string(), values }
            } else {
                Filter::Nin { path: path.to_string(), values }
            })
        }
        "$exists" => Ok(Filter::Exists { path: path.to_string(), exists: truthy(arg)? }),
        "$not" => Ok(Filter::Not(Box::new(parse_field(path, arg)?))),
        "$regex" => {
            let ci = matches!(all.get("$options"), Some(Bson::String(o)) if o.contains('i'));
            match arg {
                Bson::String(p) => regex_filter(path, p, ci),
                Bson::RegularExpression(re) => {
                    regex_filter(path, re.pattern.as_str(), ci || re.options.as_str().contains('i'))
                }
                other => Err(DbError::QueryError(format!("$regex requires a string, got {other}"))),
            }
        }
        other => Err(DbError::QueryError(format!("unknown operator {other} on {path}"))),
    }
}

#[cfg(feature = "regex")]
fn regex_filter(path: &str, pattern: &str, case_insensitive: bool) -> Result<Filter, DbError> {
    Ok(Filter::Regex { path: path.to_string(), pattern: pattern.to_string(), case_insensitive })
}

#[cfg(not(feature = "regex"))]
fn regex_filter(_path: &str, _pattern: &str, _case_insensitive: bool) -> Result<Filter, DbError> {
    Err(DbError::QueryError("$regex requires the 'regex' feature".into()))
}

/// # Errors
/// Returns an error if the JSON string is not a valid filter document.
pub fn parse_filter_json(json: &str) -> Result<Filter, DbError> {
    let doc: Document = serde_json::from_str(json)?;
    parse_filter_doc(&doc)
}

/// # Errors
/// Returns an error if the JSON string cannot be parsed into query options.
pub fn parse_query_options_json(json: &str) -> Result<QueryOptions, DbError> {
    let raw: RawQueryOptions = serde_json::from_str(json)?;
    QueryOptions::try_from(raw)
}
