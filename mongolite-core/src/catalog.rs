// mongolite-core/src/catalog.rs
// Durable registry of collections: one BSON entry per collection in the
// reserved meta-tree, keyed by collection name. Every catalog operation runs
// inside the caller's transaction so mutations and their catalog updates
// commit atomically.

use crate::error::{MongoliteError, Result};
use crate::names::CATALOG_TREE;
use crate::store::{StoreRead, TreeId, WriteTxn};
use bson::oid::ObjectId;
use bson::Document;
use serde::{Deserialize, Serialize};

/// Entry type of ordinary collections.
pub const TYPE_COLLECTION: &str = "collection";
/// Entry type of the database-level metadata record.
pub const TYPE_METADATA: &str = "metadata";

/// Reserved catalog key for database-level metadata. Starts with a NUL byte,
/// which collection-name validation forbids, so it can never collide.
pub const DB_META_KEY: &str = "\u{0}db_meta";

/// One catalog record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub tree_name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub created_at: bson::DateTime,
    pub modified_at: bson::DateTime,
    pub doc_count: i64,
    pub options: Option<Document>,
    pub metadata: Option<Document>,
}

/// Millisecond wall clock as a BSON datetime.
pub fn now() -> bson::DateTime {
    bson::DateTime::from_millis(chrono::Utc::now().timestamp_millis())
}

impl CatalogEntry {
    pub fn new_collection(
        name: &str,
        tree_name: &str,
        options: Option<Document>,
        metadata: Option<Document>,
    ) -> CatalogEntry {
        let created = now();
        CatalogEntry {
            id: ObjectId::new(),
            name: name.to_string(),
            tree_name: tree_name.to_string(),
            entry_type: TYPE_COLLECTION.to_string(),
            created_at: created,
            modified_at: created,
            doc_count: 0,
            options,
            metadata,
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bson::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<CatalogEntry> {
        bson::from_slice(bytes)
            .map_err(|e| MongoliteError::Schema(format!("catalog entry decode failed: {}", e)))
    }
}

/// Address of the reserved meta-tree.
pub fn catalog_tree() -> TreeId {
    TreeId::data(CATALOG_TREE)
}

/// Create the meta-tree if it does not exist yet. Called once at open.
pub fn ensure_catalog(txn: &mut WriteTxn) -> Result<()> {
    txn.create_tree(CATALOG_TREE)?;
    Ok(())
}

/// Look a collection up by name.
pub fn get<T: StoreRead>(txn: &T, name: &str) -> Result<Option<CatalogEntry>> {
    match txn.get(&catalog_tree(), name.as_bytes())? {
        Some(bytes) => Ok(Some(CatalogEntry::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

/// Idempotent insert-or-overwrite of an entry under its name.
pub fn put(txn: &mut WriteTxn, entry: &CatalogEntry) -> Result<()> {
    txn.put(
        &catalog_tree(),
        entry.name.as_bytes(),
        &entry.to_bytes()?,
        true,
    )?;
    Ok(())
}

/// Remove an entry; absent names fail with `NotFound`.
pub fn delete(txn: &mut WriteTxn, name: &str) -> Result<()> {
    if !txn.delete(&catalog_tree(), name.as_bytes())? {
        return Err(MongoliteError::NotFound(format!(
            "collection '{}' not found",
            name
        )));
    }
    Ok(())
}

/// All entries of one type, in name order.
pub fn list<T: StoreRead>(txn: &T, type_filter: &str) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    for item in txn.iter(&catalog_tree())? {
        let (_, bytes) = item.map_err(MongoliteError::from)?;
        let entry = CatalogEntry::from_bytes(&bytes)?;
        if entry.entry_type == type_filter {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Fetch the database-level metadata document, if any was stored.
pub fn get_db_metadata<T: StoreRead>(txn: &T) -> Result<Option<Document>> {
    match txn.get(&catalog_tree(), DB_META_KEY.as_bytes())? {
        Some(bytes) => Ok(CatalogEntry::from_bytes(&bytes)?.metadata),
        None => Ok(None),
    }
}

/// Store or replace the database-level metadata document.
pub fn set_db_metadata(txn: &mut WriteTxn, metadata: Option<Document>) -> Result<()> {
    let mut entry = CatalogEntry::new_collection(DB_META_KEY, "", None, metadata);
    entry.entry_type = TYPE_METADATA.to_string();
    txn.put(
        &catalog_tree(),
        DB_META_KEY.as_bytes(),
        &entry.to_bytes()?,
        true,
    )?;
    Ok(())
}
