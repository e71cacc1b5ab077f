// mongolite-core/src/tree_cache.rs
// Open-tree memoization: collection name → backend tree handle, catalog
// identity, and the lazily loaded index descriptor list.

use crate::catalog;
use crate::error::{MongoliteError, Result};
use crate::index::IndexDescriptor;
use crate::names::{collection_tree_name, validate_collection_name};
use crate::store::{StoreRead, TreeId};
use ahash::RandomState;
use bson::oid::ObjectId;
use std::collections::HashMap;

/// Cached per-collection state.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    /// Backend tree handle of the primary tree.
    pub tree: TreeId,
    /// Encoded tree name (`col:<name>`).
    pub tree_name: String,
    /// Collection identifier from its catalog entry.
    pub id: ObjectId,
}

#[derive(Debug)]
struct CacheEntry {
    handle: CollectionHandle,
    indexes: Vec<IndexDescriptor>,
    indexes_loaded: bool,
}

/// Unordered map from collection name to cached handle state.
#[derive(Debug, Default)]
pub struct TreeCache {
    entries: HashMap<String, CacheEntry, RandomState>,
}

impl TreeCache {
    pub fn new() -> TreeCache {
        TreeCache {
            entries: HashMap::default(),
        }
    }

    /// Resolve a collection to its primary-tree handle. Misses consult the
    /// catalog; an absent collection is `NotFound`, never auto-created.
    pub fn resolve<T: StoreRead>(&mut self, txn: &T, name: &str) -> Result<CollectionHandle> {
        if let Some(entry) = self.entries.get(name) {
            return Ok(entry.handle.clone());
        }
        validate_collection_name(name)?;
        let entry = catalog::get(txn, name)?.ok_or_else(|| {
            MongoliteError::NotFound(format!("collection '{}' not found", name))
        })?;
        let tree_name = collection_tree_name(name);
        let handle = CollectionHandle {
            tree: TreeId::data(&tree_name),
            tree_name,
            id: entry.id,
        };
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                handle: handle.clone(),
                indexes: Vec::new(),
                indexes_loaded: false,
            },
        );
        Ok(handle)
    }

    /// Index descriptors of a collection, loaded from the store's persisted
    /// descriptors on first use and cached until invalidated.
    pub fn indexes<T: StoreRead>(&mut self, txn: &T, name: &str) -> Result<Vec<IndexDescriptor>> {
        let handle = self.resolve(txn, name)?;
        let entry = self.entries.get_mut(name).expect("entry just resolved");
        if !entry.indexes_loaded {
            let mut loaded = Vec::new();
            for (_, desc_bytes) in txn.index_descriptors(&handle.tree_name)? {
                loaded.push(IndexDescriptor::from_bytes(&desc_bytes)?);
            }
            entry.indexes = loaded;
            entry.indexes_loaded = true;
        }
        Ok(entry.indexes.clone())
    }

    /// Drain the descriptor list so the next consultation reloads it. Called
    /// after create_index / drop_index.
    pub fn invalidate_indexes(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.indexes.clear();
            entry.indexes_loaded = false;
        }
    }

    /// Remove one collection's entry (collection drop).
    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    /// Drop everything (database close, rollback of an explicit transaction).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
