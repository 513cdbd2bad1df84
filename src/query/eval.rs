use crate::types::Document;
use bson::Bson;
use std::cmp::Ordering;

use super::types::{CmpOp, Filter, MAX_IN_SET, MAX_PATH_DEPTH, MAX_SORT_FIELDS, Order, Projection, SortSpec};

pub fn eval_filter(doc: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::True => true,
        Filter::And(fs) => fs.iter().all(|f| eval_filter(doc, f)),
        Filter::Or(fs) => fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Nor(fs) => !fs.iter().any(|f| eval_filter(doc, f)),
        Filter::Not(f) => !eval_filter(doc, f),
        Filter::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
        Filter::In { path, values } => get_path(doc, path).is_some_and(|v| matches_any(v, |x| is_in_set(x, values))),
        Filter::Nin { path, values } => !get_path(doc, path).is_some_and(|v| matches_any(v, |x| is_in_set(x, values))),
        Filter::Cmp { path, op: CmpOp::Ne, value } => !get_path(doc, path).is_some_and(|v| matches_any(v, |x| x == value)),
        Filter::Cmp { path, op, value } => get_path(doc, path).is_some_and(|v| {
            matches_any(v, |x| {
                let c = compare_bson(x, value);
                match op {
                    CmpOp::Eq => x == value || (is_num(x) && is_num(value) && c == Ordering::Equal),
                    CmpOp::Gt => comparable(x, value) && c == Ordering::Greater,
                    CmpOp::Gte => comparable(x, value) && c != Ordering::Less,
                    CmpOp::Lt => comparable(x, value) && c == Ordering::Less,
                    CmpOp::Lte => comparable(x, value) && c != Ordering::Greater,
                    CmpOp::Ne => unreachable!("handled above"),
                }
            })
        }),
        #[cfg(feature = "regex")]
        Filter::Regex { path, pattern, case_insensitive } => {
            let mut re = regex::RegexBuilder::new(pattern);
            re.case_insensitive(*case_insensitive);
            let Ok(r) = re.build() else { return false };
            get_path(doc, path).is_some_and(|v| matches_any(v, |x| matches!(x, Bson::String(s) if r.is_match(s))))
        }
    }
}

/// Array fields match when the whole value or any element satisfies the predicate.
fn matches_any(v: &Bson, pred: impl Fn(&Bson) -> bool) -> bool {
    pred(v) || matches!(v, Bson::Array(items) if items.iter().any(&pred))
}

fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    set.iter().take(MAX_IN_SET).any(|x| x == v)
}

fn comparable(a: &Bson, b: &Bson) -> bool {
    (is_num(a) && is_num(b)) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

pub fn compare_docs(a: &Document, b: &Document, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut cur = doc;
    let mut parts = path.split('.').peekable();
    let mut segs = 0usize;
    while let Some(part) = parts.next() {
        segs += 1;
        if segs > MAX_PATH_DEPTH {
            return None;
        }
        let v = cur.get(part)?;
        if parts.peek().is_none() {
            return Some(v);
        }
        match v {
            Bson::Document(d) => cur = d,
            _ => return None,
        }
    }
    None
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        _ => f64::NAN,
    }
}

pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

const fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => 255,
    }
}

/// Apply a field selection. Inclusion keeps only the listed paths plus the identity
/// field; exclusion then removes its paths.
pub fn project(doc: &Document, projection: &Projection, id_property: &str) -> Document {
    let mut out = if projection.include.is_empty() {
        doc.clone()
    } else {
        let mut kept = Document::new();
        if let Some(id) = doc.get(id_property) {
            kept.insert(id_property, id.clone());
        }
        for path in &projection.include {
            if let Some(v) = get_path(doc, path) {
                set_path(&mut kept, path, v.clone());
            }
        }
        kept
    };
    for path in &projection.exclude {
        unset_path(&mut out, path);
    }
    out
}

fn ensure_subdoc<'a>(root: &'a mut Document, key: &str) -> &'a mut Document {
    if !matches!(root.get(key), Some(Bson::Document(_))) {
        root.insert(key, Bson::Document(Document::new()));
    }
    match root.get_mut(key) {
        Some(Bson::Document(d)) => d,
        _ => unreachable!("sub-document inserted above"),
    }
}

fn traverse_to_parent<'a>(root: &'a mut Document, path: &str) -> (&'a mut Document, String) {
    let mut cur = root;
    let mut iter = path.split('.').peekable();
    let mut last = String::new();
    while let Some(seg) = iter.next() {
        if iter.peek().is_none() {
            last = seg.to_string();
            break;
        }
        cur = ensure_subdoc(cur, seg);
    }
    (cur, last)
}

/// Set a dotted path, creating intermediate sub-documents. Returns whether the value changed.
pub fn set_path(root: &mut Document, path: &str, value: Bson) -> bool {
    let (parent, last) = traverse_to_parent(root, path);
    let old = parent.insert(last, value.clone());
    old.as_ref() != Some(&value)
}

pub fn unset_path(root: &mut Document, path: &str) -> bool {
    match path.split_once('.') {
        None => root.remove(path).is_some(),
        Some((head, rest)) => match root.get_mut(head) {
            Some(Bson::Document(d)) => unset_path(d, rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn numeric_equality_crosses_widths() {
        let d = doc! { "age": 30_i64 };
        assert!(eval_filter(&d, &Filter::eq("age", 30)));
        assert!(eval_filter(&d, &Filter::Cmp { path: "age".into(), op: CmpOp::Gt, value: Bson::Double(29.5) }));
        assert!(!eval_filter(&d, &Filter::Cmp { path: "age".into(), op: CmpOp::Lt, value: Bson::String("z".into()) }));
    }

    #[test]
    fn array_fields_match_elements() {
        let d = doc! { "orders": ["O1", "O2"] };
        assert!(eval_filter(&d, &Filter::eq("orders", "O2")));
        assert!(!eval_filter(&d, &Filter::Cmp { path: "orders".into(), op: CmpOp::Ne, value: "O1".into() }));
        assert!(eval_filter(&d, &Filter::In { path: "orders".into(), values: vec!["O9".into(), "O1".into()] }));
    }

    #[test]
    fn nested_paths_and_logical() {
        let d = doc! { "address": { "city": "X" }, "n": 1 };
        let f = Filter::Or(vec![Filter::eq("address.city", "Y"), Filter::eq("n", 1)]);
        assert!(eval_filter(&d, &f));
        assert!(!eval_filter(&d, &Filter::Nor(vec![f])));
        assert!(eval_filter(&d, &Filter::Exists { path: "address.zip".into(), exists: false }));
    }

    #[test]
    fn project_include_keeps_identity() {
        let d = doc! { "_id": 1, "name": "a", "ssn": "x", "address": { "city": "X", "zip": "1" } };
        let p = Projection { include: vec!["name".into(), "address.city".into()], exclude: vec![] };
        assert_eq!(project(&d, &p, "_id"), doc! { "_id": 1, "name": "a", "address": { "city": "X" } });
        let p = Projection { include: vec![], exclude: vec!["ssn".into(), "address.zip".into()] };
        assert_eq!(project(&d, &p, "_id"), doc! { "_id": 1, "name": "a", "address": { "city": "X" } });
    }

    #[test]
    fn sort_missing_fields_first_then_desc() {
        let a = doc! { "v": 1 };
        let b = doc! {};
        let asc = [SortSpec { field: "v".into(), order: Order::Asc }];
        assert_eq!(compare_docs(&a, &b, &asc), Ordering::Greater);
        let desc = [SortSpec { field: "v".into(), order: Order::Desc }];
        assert_eq!(compare_docs(&a, &b, &desc), Ordering::Less);
    }

    #[test]
    fn set_and_unset_dotted_paths() {
        let mut d = doc! { "a": 1 };
        assert!(set_path(&mut d, "b.c", Bson::Int32(2)));
        assert!(!set_path(&mut d, "b.c", Bson::Int32(2)));
        assert_eq!(d, doc! { "a": 1, "b": { "c": 2 } });
        assert!(unset_path(&mut d, "b.c"));
        assert!(!unset_path(&mut d, "b.zz"));
        assert_eq!(d, doc! { "a": 1, "b": {} });
    }
}
