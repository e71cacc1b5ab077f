// mongolite-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use crate::error::{MongoliteError, Result};
use crate::value_utils::{compare_optional, get_path};
use bson::{Bson, Document};

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection document: field → 1 (include) or 0 (exclude).
    /// `_id` may be excluded even in include mode.
    pub projection: Option<Document>,

    /// Sort: [(field, direction)], direction: 1 (asc) or -1 (desc)
    pub sort: Option<Vec<(String, i32)>>,

    /// Maximum number of documents to return
    pub limit: Option<usize>,

    /// Number of matching documents to discard first
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, i32)>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Parse a sort specification document like `{"age": -1, "name": 1}`.
pub fn parse_sort_doc(spec: &Document) -> Result<Vec<(String, i32)>> {
    if spec.is_empty() {
        return Err(MongoliteError::InvalidArgument(
            "sort specification must not be empty".to_string(),
        ));
    }
    let mut sort = Vec::with_capacity(spec.len());
    for (field, value) in spec.iter() {
        let direction = match value {
            Bson::Int32(1) | Bson::Int64(1) => 1,
            Bson::Int32(-1) | Bson::Int64(-1) => -1,
            Bson::Double(d) if *d == 1.0 => 1,
            Bson::Double(d) if *d == -1.0 => -1,
            other => {
                return Err(MongoliteError::InvalidArgument(format!(
                    "sort direction for '{}' must be 1 or -1, got {}",
                    field, other
                )))
            }
        };
        sort.push((field.clone(), direction));
    }
    Ok(sort)
}

/// Validate a projection document: inclusion and exclusion must not mix,
/// except for excluding `_id` inside an inclusion projection.
pub fn validate_projection(projection: &Document) -> Result<()> {
    let mut saw_include = false;
    let mut saw_exclude = false;
    for (field, value) in projection.iter() {
        let include = match value {
            Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false) => false,
            Bson::Int32(1) | Bson::Int64(1) | Bson::Boolean(true) => true,
            Bson::Double(d) if *d == 0.0 => false,
            Bson::Double(d) if *d == 1.0 => true,
            other => {
                return Err(MongoliteError::InvalidArgument(format!(
                    "projection value for '{}' must be 0 or 1, got {}",
                    field, other
                )))
            }
        };
        if include {
            saw_include = true;
        } else if field != "_id" {
            saw_exclude = true;
        }
    }
    if saw_include && saw_exclude {
        return Err(MongoliteError::InvalidArgument(
            "cannot mix inclusion and exclusion in one projection".to_string(),
        ));
    }
    Ok(())
}

fn is_excluding(value: &Bson) -> bool {
    matches!(
        value,
        Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false)
    ) || matches!(value, Bson::Double(d) if *d == 0.0)
}

/// Apply a projection to a document.
/// Inclusion supports dot notation for nested fields (e.g. "address.city");
/// exclusion removes top-level fields.
pub fn apply_projection(doc: &Document, projection: &Document) -> Document {
    if projection.is_empty() {
        return doc.clone();
    }

    let include_mode = projection.iter().any(|(_, value)| !is_excluding(value));

    let mut result = Document::new();
    if include_mode {
        // _id comes first unless explicitly excluded.
        if !projection.get("_id").map(is_excluding).unwrap_or(false) {
            if let Some(id) = doc.get("_id") {
                result.insert("_id", id.clone());
            }
        }
        for (field, value) in projection.iter() {
            if field == "_id" || is_excluding(value) {
                continue;
            }
            if let Some(found) = get_path(doc, field) {
                result.insert(field.clone(), found.clone());
            }
        }
    } else {
        for (key, value) in doc.iter() {
            if !projection.get(key).map(is_excluding).unwrap_or(false) {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

/// Sort documents in place by the sort spec, using the cross-type value
/// order; missing fields sort first on ascending fields.
pub fn apply_sort(docs: &mut [Document], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ord = compare_optional(get_path(a, field), get_path(b, field));
            if ord != std::cmp::Ordering::Equal {
                return if *direction == 1 { ord } else { ord.reverse() };
            }
        }
        std::cmp::Ordering::Equal
    });
}
