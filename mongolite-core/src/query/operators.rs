// src/query/operators.rs
//! Filter operator implementations.
//!
//! A filter document compiles into a [`Predicate`] tree; each field carries a
//! list of [`Condition`]s. Comparison follows the cross-type total order of
//! `value_utils`, with the usual array semantics: a condition on a field
//! holding an array matches when any element matches.

use crate::error::{MongoliteError, Result};
use crate::value_utils::{bson_eq, compare_bson, get_path, type_rank};
use bson::{Bson, Document};
use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Mutex;

// ============================================================================
// REGEX CACHE
// ============================================================================

lazy_static! {
    /// Process-wide cache of compiled patterns, keyed by "pattern:options".
    /// LRU with a 100 entry limit to bound memory.
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(100).unwrap()));
}

/// Translate MongoDB-style options (i, m, s, x) into inline regex flags.
fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let valid_options: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    let mut regex_str = String::new();
    if !valid_options.is_empty() {
        regex_str.push_str("(?");
        regex_str.push_str(&valid_options);
        regex_str.push(')');
    }
    regex_str.push_str(pattern);
    regex_str
}

fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}:{}", pattern, options);
    {
        let mut cache = REGEX_CACHE.lock().unwrap();
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(regex.clone());
        }
    }

    let regex = Regex::new(&build_regex_pattern(pattern, options)).map_err(|e| {
        MongoliteError::Query(format!("invalid regex pattern '{}': {}", pattern, e))
    })?;

    REGEX_CACHE.lock().unwrap().put(cache_key, regex.clone());
    Ok(regex)
}

// ============================================================================
// PREDICATE MODEL
// ============================================================================

/// One condition applied to a field value.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
    Regex(Regex),
    /// `$all`: the array value contains every listed element.
    All(Vec<Bson>),
    /// `$size`: exact array length.
    Size(i64),
    /// `$type`: BSON type name of the value.
    Type(String),
    /// `$elemMatch`: at least one array element satisfies the inner match.
    ElemMatch(ElemMatcher),
    /// `$not`: inverts the wrapped operator document.
    Not(Vec<Condition>),
}

/// Inner match of `$elemMatch`: operator conditions applied to scalar
/// elements, or a sub-filter applied to document elements.
#[derive(Debug, Clone)]
pub enum ElemMatcher {
    Conditions(Vec<Condition>),
    Filter(Box<Predicate>),
}

/// Compiled filter tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Nor(Vec<Predicate>),
    Field {
        path: String,
        conditions: Vec<Condition>,
    },
}

/// Compile a filter document into a predicate tree. The top level is an
/// implicit `$and` over its entries.
pub fn compile(filter: &Document) -> Result<Predicate> {
    let mut parts = Vec::with_capacity(filter.len());
    for (key, value) in filter.iter() {
        if let Some(op) = key.strip_prefix('$') {
            let branches = combinator_branches(key, value)?;
            parts.push(match op {
                "and" => Predicate::And(branches),
                "or" => Predicate::Or(branches),
                "nor" => Predicate::Nor(branches),
                _ => {
                    return Err(MongoliteError::Query(format!(
                        "unknown top-level operator '{}'",
                        key
                    )))
                }
            });
        } else {
            parts.push(Predicate::Field {
                path: key.clone(),
                conditions: compile_conditions(key, value)?,
            });
        }
    }
    Ok(Predicate::And(parts))
}

fn combinator_branches(key: &str, value: &Bson) -> Result<Vec<Predicate>> {
    let array = match value {
        Bson::Array(array) if !array.is_empty() => array,
        _ => {
            return Err(MongoliteError::Query(format!(
                "'{}' requires a non-empty array of filters",
                key
            )))
        }
    };
    array
        .iter()
        .map(|entry| match entry {
            Bson::Document(sub) => compile(sub),
            other => Err(MongoliteError::Query(format!(
                "'{}' entries must be documents, got {}",
                key, other
            ))),
        })
        .collect()
}

/// Compile the right-hand side of one field: either an operator document or
/// a literal equality.
fn compile_conditions(path: &str, value: &Bson) -> Result<Vec<Condition>> {
    match value {
        Bson::Document(spec) if spec.keys().any(|k| k.starts_with('$')) => {
            if !spec.keys().all(|k| k.starts_with('$')) {
                return Err(MongoliteError::Query(format!(
                    "cannot mix operators and literal fields in condition on '{}'",
                    path
                )));
            }
            compile_operator_doc(path, spec)
        }
        Bson::RegularExpression(re) => Ok(vec![Condition::Regex(get_or_compile_regex(
            &re.pattern,
            &re.options,
        )?)]),
        other => Ok(vec![Condition::Eq(other.clone())]),
    }
}

fn compile_operator_doc(path: &str, spec: &Document) -> Result<Vec<Condition>> {
    let mut conditions = Vec::with_capacity(spec.len());
    // $options belongs to a sibling $regex and is consumed with it.
    let options = match spec.get("$options") {
        None => String::new(),
        Some(Bson::String(s)) => s.clone(),
        Some(other) => {
            return Err(MongoliteError::Query(format!(
                "'$options' must be a string, got {}",
                other
            )))
        }
    };

    for (op, arg) in spec.iter() {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$gt" => Condition::Gt(arg.clone()),
            "$gte" => Condition::Gte(arg.clone()),
            "$lt" => Condition::Lt(arg.clone()),
            "$lte" => Condition::Lte(arg.clone()),
            "$in" => Condition::In(membership_list(op, arg)?),
            "$nin" => Condition::Nin(membership_list(op, arg)?),
            "$exists" => match arg {
                Bson::Boolean(b) => Condition::Exists(*b),
                Bson::Int32(n) => Condition::Exists(*n != 0),
                Bson::Int64(n) => Condition::Exists(*n != 0),
                other => {
                    return Err(MongoliteError::Query(format!(
                        "'$exists' takes a boolean, got {}",
                        other
                    )))
                }
            },
            "$regex" => match arg {
                Bson::String(pattern) => {
                    Condition::Regex(get_or_compile_regex(pattern, &options)?)
                }
                Bson::RegularExpression(re) => {
                    Condition::Regex(get_or_compile_regex(&re.pattern, &re.options)?)
                }
                other => {
                    return Err(MongoliteError::Query(format!(
                        "'$regex' takes a pattern, got {}",
                        other
                    )))
                }
            },
            "$options" => continue,
            "$all" => Condition::All(membership_list(op, arg)?),
            "$size" => match arg {
                Bson::Int32(n) => Condition::Size(*n as i64),
                Bson::Int64(n) => Condition::Size(*n),
                other => {
                    return Err(MongoliteError::Query(format!(
                        "'$size' takes an integer, got {}",
                        other
                    )))
                }
            },
            "$type" => match arg {
                Bson::String(name) => Condition::Type(name.clone()),
                other => {
                    return Err(MongoliteError::Query(format!(
                        "'$type' takes a type name, got {}",
                        other
                    )))
                }
            },
            "$elemMatch" => match arg {
                Bson::Document(inner) => {
                    if inner.keys().all(|k| k.starts_with('$')) && !inner.is_empty() {
                        Condition::ElemMatch(ElemMatcher::Conditions(compile_operator_doc(
                            path, inner,
                        )?))
                    } else {
                        Condition::ElemMatch(ElemMatcher::Filter(Box::new(compile(inner)?)))
                    }
                }
                other => {
                    return Err(MongoliteError::Query(format!(
                        "'$elemMatch' takes a document, got {}",
                        other
                    )))
                }
            },
            "$not" => match arg {
                Bson::Document(inner) => Condition::Not(compile_operator_doc(path, inner)?),
                Bson::RegularExpression(re) => Condition::Not(vec![Condition::Regex(
                    get_or_compile_regex(&re.pattern, &re.options)?,
                )]),
                other => {
                    return Err(MongoliteError::Query(format!(
                        "'$not' takes an operator document, got {}",
                        other
                    )))
                }
            },
            unknown => {
                return Err(MongoliteError::Query(format!(
                    "unknown operator '{}' on field '{}'",
                    unknown, path
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn membership_list(op: &str, arg: &Bson) -> Result<Vec<Bson>> {
    match arg {
        Bson::Array(values) => Ok(values.clone()),
        other => Err(MongoliteError::Query(format!(
            "'{}' takes an array, got {}",
            op, other
        ))),
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

impl Predicate {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::And(parts) => parts.iter().all(|p| p.matches(doc)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(doc)),
            Predicate::Nor(parts) => !parts.iter().any(|p| p.matches(doc)),
            Predicate::Field { path, conditions } => {
                let value = get_path(doc, path);
                conditions.iter().all(|c| c.matches(value))
            }
        }
    }
}

/// Equality with array-element semantics: a direct match, or any element of
/// an array value matching.
fn eq_match(doc_value: Option<&Bson>, target: &Bson) -> bool {
    match doc_value {
        None => matches!(target, Bson::Null),
        Some(v) => {
            if bson_eq(v, target) {
                return true;
            }
            match v {
                Bson::Array(array) => array.iter().any(|e| bson_eq(e, target)),
                _ => false,
            }
        }
    }
}

/// Ordered comparison; only values in the same type family compare, and an
/// array value matches when any element does.
fn ord_match(doc_value: Option<&Bson>, target: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let v = match doc_value {
        None => return false,
        Some(v) => v,
    };
    let direct = |candidate: &Bson| {
        type_rank(candidate) == type_rank(target) && accept(compare_bson(candidate, target))
    };
    if direct(v) {
        return true;
    }
    match v {
        Bson::Array(array) => array.iter().any(direct),
        _ => false,
    }
}

/// BSON type name as `$type` spells it.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
        Bson::Symbol(_) => "symbol",
        Bson::Undefined => "undefined",
        _ => "javascript",
    }
}

fn type_match(doc_value: Option<&Bson>, name: &str) -> bool {
    let v = match doc_value {
        None => return false,
        Some(v) => v,
    };
    if bson_type_name(v) == name {
        return true;
    }
    // An array field also matches when any element has the named type.
    match v {
        Bson::Array(array) if name != "array" => {
            array.iter().any(|e| bson_type_name(e) == name)
        }
        _ => false,
    }
}

fn elem_match(doc_value: Option<&Bson>, inner: &ElemMatcher) -> bool {
    let array = match doc_value {
        Some(Bson::Array(array)) => array,
        _ => return false,
    };
    array.iter().any(|element| match inner {
        ElemMatcher::Conditions(conditions) => {
            conditions.iter().all(|c| c.matches(Some(element)))
        }
        ElemMatcher::Filter(predicate) => match element {
            Bson::Document(doc) => predicate.matches(doc),
            _ => false,
        },
    })
}

fn regex_match(doc_value: Option<&Bson>, regex: &Regex) -> bool {
    let direct = |candidate: &Bson| match candidate {
        Bson::String(s) => regex.is_match(s),
        _ => false,
    };
    match doc_value {
        None => false,
        Some(Bson::Array(array)) => array.iter().any(direct),
        Some(v) => direct(v),
    }
}

impl Condition {
    pub fn matches(&self, doc_value: Option<&Bson>) -> bool {
        match self {
            Condition::Eq(target) => eq_match(doc_value, target),
            Condition::Ne(target) => !eq_match(doc_value, target),
            Condition::Gt(target) => ord_match(doc_value, target, |o| o == Ordering::Greater),
            Condition::Gte(target) => ord_match(doc_value, target, |o| o != Ordering::Less),
            Condition::Lt(target) => ord_match(doc_value, target, |o| o == Ordering::Less),
            Condition::Lte(target) => ord_match(doc_value, target, |o| o != Ordering::Greater),
            Condition::In(targets) => targets.iter().any(|t| eq_match(doc_value, t)),
            Condition::Nin(targets) => !targets.iter().any(|t| eq_match(doc_value, t)),
            Condition::Exists(expected) => doc_value.is_some() == *expected,
            Condition::Regex(regex) => regex_match(doc_value, regex),
            Condition::All(targets) => match doc_value {
                Some(Bson::Array(array)) => targets
                    .iter()
                    .all(|t| array.iter().any(|e| bson_eq(e, t))),
                _ => false,
            },
            Condition::Size(expected) => match doc_value {
                Some(Bson::Array(array)) => array.len() as i64 == *expected,
                _ => false,
            },
            Condition::Type(name) => type_match(doc_value, name),
            Condition::ElemMatch(inner) => elem_match(doc_value, inner),
            Condition::Not(inner) => !inner.iter().all(|c| c.matches(doc_value)),
        }
    }
}
