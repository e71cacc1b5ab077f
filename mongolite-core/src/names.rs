// mongolite-core/src/names.rs
// Deterministic mapping from collection names to backend tree names.

use crate::error::{MongoliteError, Result};

/// Prefix for collection primary trees.
pub const COLLECTION_PREFIX: &str = "col:";

/// Reserved tree holding the catalog. Not addressable as a collection.
pub const CATALOG_TREE: &str = "_mongolite_schema";

/// Longest accepted collection name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Encode a collection name into its backend tree name.
pub fn collection_tree_name(name: &str) -> String {
    format!("{}{}", COLLECTION_PREFIX, name)
}

/// Validate a user-supplied collection name.
///
/// Names must be non-empty UTF-8 without ':', NUL, or control characters,
/// and must not collide with the reserved catalog tree.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MongoliteError::InvalidArgument(
            "collection name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MongoliteError::InvalidArgument(format!(
            "collection name exceeds {} bytes",
            MAX_NAME_LEN
        )));
    }
    if name == CATALOG_TREE {
        return Err(MongoliteError::InvalidArgument(format!(
            "'{}' is reserved",
            CATALOG_TREE
        )));
    }
    if let Some(bad) = name.chars().find(|c| *c == ':' || c.is_control()) {
        return Err(MongoliteError::InvalidArgument(format!(
            "collection name contains forbidden character {:?}",
            bad
        )));
    }
    Ok(())
}
