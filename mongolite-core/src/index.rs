// mongolite-core/src/index.rs
// Secondary index engine: key specifications, extraction from documents,
// unique/sparse enforcement, and maintenance across mutations.
//
// Index entries live in duplicate-sorted sub-trees owned by the collection's
// primary tree. The entry key is the encoded composite index key with the
// 12-byte document id appended, so duplicates of one index key stay sorted by
// document id and delete-by-key is exact.

use crate::error::{MongoliteError, Result};
use crate::index_key::encode_field;
use crate::store::{StoreRead, TreeId, WriteTxn};
use crate::value_utils::get_path;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Longest accepted encoded composite key. Keeps the full entry key inside
/// the store's node budget with the document id appended.
pub const MAX_INDEX_KEY: usize = 1000;

/// Ordered list of `(field path, direction)` pairs; direction is 1 or -1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<(String, i32)>,
}

impl IndexSpec {
    /// Build a spec from a MongoDB-style key document, e.g.
    /// `{"email": 1}` or `{"name": 1, "age": -1}`. Field order matters.
    pub fn from_doc(keys: &Document) -> Result<IndexSpec> {
        if keys.is_empty() {
            return Err(MongoliteError::InvalidArgument(
                "index key specification must not be empty".to_string(),
            ));
        }
        let mut fields = Vec::with_capacity(keys.len());
        for (path, value) in keys.iter() {
            if path.is_empty() {
                return Err(MongoliteError::InvalidArgument(
                    "index field path must not be empty".to_string(),
                ));
            }
            let direction = match value {
                Bson::Int32(1) | Bson::Int64(1) => 1,
                Bson::Int32(-1) | Bson::Int64(-1) => -1,
                Bson::Double(d) if *d == 1.0 => 1,
                Bson::Double(d) if *d == -1.0 => -1,
                other => {
                    return Err(MongoliteError::InvalidArgument(format!(
                        "index direction for '{}' must be 1 or -1, got {}",
                        path, other
                    )))
                }
            };
            fields.push((path.clone(), direction));
        }
        Ok(IndexSpec { fields })
    }

    /// Default index name: `field_direction` pairs joined with underscores,
    /// e.g. `email_1` or `name_1_age_-1`.
    pub fn default_name(&self) -> String {
        self.fields
            .iter()
            .map(|(path, dir)| format!("{}_{}", path, dir))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Persisted description of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub spec: IndexSpec,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexDescriptor {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bson::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<IndexDescriptor> {
        bson::from_slice(bytes)
            .map_err(|e| MongoliteError::Schema(format!("index descriptor decode failed: {}", e)))
    }

    /// Address of this index's sub-tree under its collection tree.
    pub fn tree_id(&self, tree_name: &str) -> TreeId {
        TreeId::index(tree_name, &self.name)
    }
}

/// Result of key extraction for one document.
#[derive(Debug)]
pub struct Extracted {
    /// Encoded composite keys; more than one when an indexed field holds an
    /// array (multi-key).
    pub keys: Vec<Vec<u8>>,
    /// True when some indexed field was missing from the document.
    pub absent: bool,
}

/// Extract the composite index key(s) of `doc` under `desc`.
///
/// An array value fans out to one key per element. Null is a real value,
/// distinct from a missing field; missing fields encode as the canonical
/// marker that sorts before everything.
pub fn extract_keys(doc: &Document, desc: &IndexDescriptor) -> Result<Extracted> {
    let mut scalar_values: Vec<Option<&Bson>> = Vec::with_capacity(desc.spec.fields.len());
    let mut array_field: Option<(usize, &Vec<Bson>)> = None;

    for (i, (path, _)) in desc.spec.fields.iter().enumerate() {
        match get_path(doc, path) {
            Some(Bson::Array(arr)) => {
                if array_field.is_some() {
                    return Err(MongoliteError::Index(format!(
                        "cannot index parallel arrays in '{}'",
                        desc.name
                    )));
                }
                array_field = Some((i, arr));
                scalar_values.push(None); // placeholder, substituted per element
            }
            value => scalar_values.push(value),
        }
    }

    let empty_array = matches!(array_field, Some((_, arr)) if arr.is_empty());
    let absent = empty_array
        || scalar_values
            .iter()
            .enumerate()
            .any(|(i, v)| v.is_none() && array_field.map(|(ai, _)| ai) != Some(i));

    let mut keys: Vec<Vec<u8>> = Vec::new();
    match array_field {
        Some((array_idx, arr)) if !arr.is_empty() => {
            for element in arr {
                let mut buf = Vec::new();
                for (i, (_, dir)) in desc.spec.fields.iter().enumerate() {
                    let value = if i == array_idx {
                        Some(element)
                    } else {
                        scalar_values[i]
                    };
                    encode_field(&mut buf, value, *dir < 0);
                }
                keys.push(buf);
            }
        }
        _ => {
            let mut buf = Vec::new();
            for (i, (_, dir)) in desc.spec.fields.iter().enumerate() {
                encode_field(&mut buf, scalar_values[i], *dir < 0);
            }
            keys.push(buf);
        }
    }

    keys.sort();
    keys.dedup();
    for key in &keys {
        if key.len() > MAX_INDEX_KEY {
            return Err(MongoliteError::InvalidArgument(format!(
                "index key of {} bytes exceeds the {} byte limit",
                key.len(),
                MAX_INDEX_KEY
            )));
        }
    }
    Ok(Extracted { keys, absent })
}

/// Entry key inside the index sub-tree: composite key plus the document id.
pub fn entry_key(index_key: &[u8], id: &ObjectId) -> Vec<u8> {
    let mut key = Vec::with_capacity(index_key.len() + 12);
    key.extend_from_slice(index_key);
    key.extend_from_slice(&id.bytes());
    key
}

/// Does any other document already claim `index_key` in this index?
pub fn unique_conflict<T: StoreRead>(
    txn: &T,
    tree: &TreeId,
    index_key: &[u8],
    id: &ObjectId,
) -> Result<bool> {
    for item in txn.iter_seek(tree, Some(index_key))? {
        let (key, value) = item?;
        if !key.starts_with(index_key) {
            break;
        }
        if value != id.bytes() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Write the index entries of a freshly inserted document. Fails with
/// [`MongoliteError::Index`] on a unique violation; the caller aborts.
pub fn insert_document_entries(
    txn: &mut WriteTxn,
    tree_name: &str,
    indexes: &[IndexDescriptor],
    doc: &Document,
    id: &ObjectId,
) -> Result<()> {
    for desc in indexes {
        let extracted = extract_keys(doc, desc)?;
        if extracted.absent && desc.sparse {
            continue;
        }
        let tree = desc.tree_id(tree_name);
        for key in &extracted.keys {
            if desc.unique && unique_conflict(txn, &tree, key, id)? {
                return Err(duplicate_key(desc));
            }
            txn.put(&tree, &entry_key(key, id), &id.bytes(), true)?;
        }
    }
    Ok(())
}

/// Remove the index entries of a document that is being deleted.
pub fn delete_document_entries(
    txn: &mut WriteTxn,
    tree_name: &str,
    indexes: &[IndexDescriptor],
    doc: &Document,
    id: &ObjectId,
) -> Result<()> {
    for desc in indexes {
        let extracted = extract_keys(doc, desc)?;
        if extracted.absent && desc.sparse {
            continue;
        }
        let tree = desc.tree_id(tree_name);
        for key in &extracted.keys {
            txn.delete(&tree, &entry_key(key, id))?;
        }
    }
    Ok(())
}

/// Diff-based maintenance for an update: stale entries are removed, fresh
/// ones written, unchanged ones left alone.
pub fn update_document_entries(
    txn: &mut WriteTxn,
    tree_name: &str,
    indexes: &[IndexDescriptor],
    old_doc: &Document,
    new_doc: &Document,
    id: &ObjectId,
) -> Result<()> {
    for desc in indexes {
        let old = extract_keys(old_doc, desc)?;
        let new = extract_keys(new_doc, desc)?;

        let old_keys: BTreeSet<Vec<u8>> = if old.absent && desc.sparse {
            BTreeSet::new()
        } else {
            old.keys.into_iter().collect()
        };
        let new_keys: BTreeSet<Vec<u8>> = if new.absent && desc.sparse {
            BTreeSet::new()
        } else {
            new.keys.into_iter().collect()
        };

        let tree = desc.tree_id(tree_name);
        for stale in old_keys.difference(&new_keys) {
            txn.delete(&tree, &entry_key(stale, id))?;
        }
        for fresh in new_keys.difference(&old_keys) {
            if desc.unique && unique_conflict(txn, &tree, fresh, id)? {
                return Err(duplicate_key(desc));
            }
            txn.put(&tree, &entry_key(fresh, id), &id.bytes(), true)?;
        }
    }
    Ok(())
}

/// Populate a new index from every document already in the primary tree.
/// Runs inside the caller's transaction; a unique violation aborts the build.
pub fn build_index(txn: &mut WriteTxn, tree_name: &str, desc: &IndexDescriptor) -> Result<u64> {
    let primary = TreeId::data(tree_name);

    // Collect first: the scan borrows the transaction the writes need.
    let mut entries: Vec<(Vec<u8>, ObjectId)> = Vec::new();
    for item in txn.iter(&primary)? {
        let (key, value) = item?;
        let id = decode_primary_key(&key)?;
        let doc = Document::from_reader(&mut value.as_slice())
            .map_err(|e| MongoliteError::Schema(format!("stored document decode failed: {}", e)))?;
        let extracted = extract_keys(&doc, desc)?;
        if extracted.absent && desc.sparse {
            continue;
        }
        for index_key in extracted.keys {
            entries.push((index_key, id));
        }
    }

    entries.sort();
    if desc.unique {
        for pair in entries.windows(2) {
            if pair[0].0 == pair[1].0 && pair[0].1 != pair[1].1 {
                return Err(duplicate_key(desc));
            }
        }
    }

    let tree = desc.tree_id(tree_name);
    let total = entries.len() as u64;
    for (index_key, id) in entries {
        txn.put(&tree, &entry_key(&index_key, &id), &id.bytes(), true)?;
    }
    Ok(total)
}

/// Decode the 12-byte primary key back into an ObjectId.
pub fn decode_primary_key(key: &[u8]) -> Result<ObjectId> {
    let bytes: [u8; 12] = key
        .try_into()
        .map_err(|_| MongoliteError::Schema(format!("primary key of {} bytes", key.len())))?;
    Ok(ObjectId::from_bytes(bytes))
}

fn duplicate_key(desc: &IndexDescriptor) -> MongoliteError {
    MongoliteError::Index(format!(
        "duplicate key violates unique index '{}'",
        desc.name
    ))
}
