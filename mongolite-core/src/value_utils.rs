//! Value utility functions shared across modules
//!
//! Nested field access with dot notation and the cross-type total order used
//! by sorting, index-key extraction, and the filter matcher.

use bson::{Bson, Document};
use std::cmp::Ordering;

/// Get a nested value from a document with dot notation support
///
/// Supports:
/// - Simple fields: "name"
/// - Nested documents: "address.city"
/// - Array indexing: "items.0.name"
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    // Fast path: no dots means simple field access
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut parts = path.split('.');
    let mut value = doc.get(parts.next()?)?;
    for part in parts {
        value = descend(value, part)?;
    }
    Some(value)
}

/// One dot-path step into a BSON value.
fn descend<'a>(value: &'a Bson, part: &str) -> Option<&'a Bson> {
    match value {
        Bson::Document(map) => map.get(part),
        Bson::Array(arr) => {
            if let Ok(index) = part.parse::<usize>() {
                arr.get(index)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Rank a BSON value by type for cross-type comparisons.
///
/// Follows the canonical MongoDB sort order: null sorts below numbers,
/// numbers below strings, and so on. All numeric types share one rank so
/// they compare numerically with each other.
pub fn type_rank(value: &Bson) -> u8 {
    match value {
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
        Bson::JavaScriptCode(_) => 12,
        Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => 127,
        _ => 64,
    }
}

/// Numeric view of a BSON value, if it has one.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok(),
        _ => None,
    }
}

/// Compare two BSON values under the cross-type total order.
///
/// Numeric types compare numerically with each other, strings
/// lexicographically, arrays and documents element-wise. Values of different
/// type families order by [`type_rank`].
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Bson::MinKey, Bson::MinKey) | (Bson::MaxKey, Bson::MaxKey) => Ordering::Equal,
        (Bson::Null, _) => Ordering::Equal, // same rank: null/undefined
        (_, Bson::Null) => Ordering::Equal,
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
        (Bson::String(x), Bson::Symbol(y)) => x.as_str().cmp(y.as_str()),
        (Bson::Symbol(x), Bson::String(y)) => x.as_str().cmp(y.as_str()),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => {
            (&x.pattern, &x.options).cmp(&(&y.pattern, &y.options))
        }
        (Bson::Array(x), Bson::Array(y)) => {
            for (xe, ye) in x.iter().zip(y.iter()) {
                let ord = compare_bson(xe, ye);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                let ord = xk.cmp(yk);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = compare_bson(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => {
            // Remaining same-rank pairs are numeric.
            match (as_f64(a), as_f64(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        }
    }
}

/// Semantic equality under the total order (so Int32(5) == Int64(5)).
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    compare_bson(a, b) == Ordering::Equal
}

/// Set a field with dot notation, creating intermediate documents along the
/// path. An existing non-document intermediate is replaced.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    if !path.contains('.') {
        doc.insert(path, value);
        return;
    }
    let (first, rest) = path.split_once('.').expect("path contains a dot");
    match doc.get_mut(first) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => {
            let mut inner = Document::new();
            set_path(&mut inner, rest, value);
            doc.insert(first, Bson::Document(inner));
        }
    }
}

/// Remove a field with dot notation. Returns the removed value, if any.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    if !path.contains('.') {
        return doc.remove(path);
    }
    let (first, rest) = path.split_once('.')?;
    match doc.get_mut(first) {
        Some(Bson::Document(inner)) => remove_path(inner, rest),
        _ => None,
    }
}

/// Compare two optional values; a missing field sorts below any present one.
pub fn compare_optional(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_bson(av, bv),
    }
}
