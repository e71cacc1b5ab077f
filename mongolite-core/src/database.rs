// mongolite-core/src/database.rs
// Public database surface: open/close, collections, explicit transactions,
// indexes. Document CRUD lives in collection.rs as further impl blocks.
//
// Thread safety: one mutex per handle guards all mutable state (tree cache,
// transaction runtime, counters) for the duration of each public call.
// Within a call there is no internal parallelism.

use crate::catalog::{self, CatalogEntry, TYPE_COLLECTION};
use crate::error::{MongoliteError, Result, StoreError};
use crate::index::{build_index, IndexDescriptor, IndexSpec};
use crate::{log_debug, log_info};
use crate::names::{collection_tree_name, validate_collection_name};
use crate::store::{Store, StoreOptions};
use crate::transaction::TxnRuntime;
use crate::tree_cache::TreeCache;
use bson::oid::ObjectId;
use bson::Document;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Pass-through backend flag: skip the per-commit fsync.
pub const FLAG_NO_SYNC: u32 = 0x1;

/// Recognized open options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Initial mapping size.
    pub max_bytes: u64,
    /// Upper bound on the number of collections.
    pub max_dbs: usize,
    /// Opaque backend flag bits (`FLAG_*`).
    pub backend_flags: u32,
    /// User document stored as database metadata at open.
    pub metadata: Option<Document>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            max_bytes: 1 << 30,
            max_dbs: 256,
            backend_flags: 0,
            metadata: None,
        }
    }
}

/// Options for `create_index`.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Index name; derived from the key spec when absent.
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
}

pub(crate) struct DatabaseState {
    pub(crate) cache: TreeCache,
    pub(crate) txns: TxnRuntime,
    pub(crate) changes: u64,
    pub(crate) last_insert_id: Option<ObjectId>,
}

/// An embedded document database over one memory-mapped store file.
pub struct Database {
    pub(crate) store: Store,
    path: PathBuf,
    max_dbs: usize,
    pub(crate) state: Mutex<DatabaseState>,
}

impl Database {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let store = Store::open(
            &path,
            StoreOptions {
                map_bytes: config.max_bytes,
                no_sync: config.backend_flags & FLAG_NO_SYNC != 0,
            },
        )?;

        let db = Database {
            store,
            path,
            max_dbs: config.max_dbs,
            state: Mutex::new(DatabaseState {
                cache: TreeCache::new(),
                txns: TxnRuntime::new(),
                changes: 0,
                last_insert_id: None,
            }),
        };

        // Bootstrap the catalog; store caller metadata when provided.
        {
            let mut state = db.state.lock();
            let metadata = config.metadata.clone();
            state.txns.with_write(&db.store, |txn| {
                catalog::ensure_catalog(txn)?;
                if metadata.is_some() {
                    catalog::set_db_metadata(txn, metadata.clone())?;
                }
                Ok(())
            })?;
        }
        log_info!("opened database {}", db.path.display());
        Ok(db)
    }

    /// Open with default configuration.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Database> {
        Self::open(path, DatabaseConfig::default())
    }

    /// Abort in-flight transactions, release pooled readers, and flush.
    pub fn close(self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.txns.shutdown();
            state.cache.clear();
        }
        self.store.sync(true)?;
        Ok(())
    }

    /// Flush file contents; with `force`, fsync even under `FLAG_NO_SYNC`.
    pub fn sync(&self, force: bool) -> Result<()> {
        Ok(self.store.sync(force)?)
    }

    /// Path of the backing file.
    pub fn filename(&self) -> &Path {
        &self.path
    }

    /// Identifier assigned by the most recent successful insert.
    pub fn last_insert_id(&self) -> Option<ObjectId> {
        self.state.lock().last_insert_id
    }

    /// Number of documents touched by mutations on this handle.
    pub fn changes(&self) -> u64 {
        self.state.lock().changes
    }

    /// Database statistics: file, map, and per-collection document counts.
    pub fn stats(&self) -> Result<Document> {
        let state = &mut *self.state.lock();
        let entries = if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            catalog::list(txn, TYPE_COLLECTION)?
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = catalog::list(&txn, TYPE_COLLECTION);
            state.txns.release_read(txn);
            result?
        };

        let mut collections = Document::new();
        for entry in &entries {
            collections.insert(entry.name.clone(), entry.doc_count);
        }
        Ok(bson::doc! {
            "path": self.path.display().to_string(),
            "map_bytes": self.store.map_size() as i64,
            "last_txn_id": self.store.last_txn_id() as i64,
            "collection_count": entries.len() as i32,
            "collections": collections,
            "changes": state.changes as i64,
        })
    }

    // ========== Database metadata ==========

    pub fn metadata(&self) -> Result<Option<Document>> {
        let state = &mut *self.state.lock();
        if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            catalog::get_db_metadata(txn)
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = catalog::get_db_metadata(&txn);
            state.txns.release_read(txn);
            result
        }
    }

    pub fn set_metadata(&self, metadata: Option<Document>) -> Result<()> {
        let state = &mut *self.state.lock();
        state.txns.with_write(&self.store, |txn| {
            catalog::set_db_metadata(txn, metadata.clone())
        })
    }

    // ========== Explicit transactions ==========

    /// Begin an explicit transaction; mutations join it until commit or
    /// rollback.
    pub fn begin(&self) -> Result<()> {
        let state = &mut *self.state.lock();
        state.txns.begin_explicit(&self.store)
    }

    pub fn commit(&self) -> Result<()> {
        let state = &mut *self.state.lock();
        state.txns.commit_explicit()
    }

    /// Roll back the explicit transaction. The tree cache is cleared: a
    /// rolled-back create/drop must not leave stale handles behind.
    pub fn rollback(&self) -> Result<()> {
        let state = &mut *self.state.lock();
        let result = state.txns.rollback_explicit();
        state.cache.clear();
        result
    }

    /// Is an explicit transaction active on this handle?
    pub fn in_transaction(&self) -> bool {
        self.state.lock().txns.in_transaction()
    }

    // ========== Collections ==========

    /// Create a collection. Fails with `AlreadyExists` when the name is in
    /// use and `InvalidArgument` on a malformed name.
    pub fn create_collection(&self, name: &str, options: Option<Document>) -> Result<()> {
        validate_collection_name(name)?;
        let max_dbs = self.max_dbs;
        let state = &mut *self.state.lock();
        state.txns.with_write(&self.store, |txn| {
            if catalog::get(txn, name)?.is_some() {
                return Err(MongoliteError::AlreadyExists(format!(
                    "collection '{}' already exists",
                    name
                )));
            }
            if catalog::list(txn, TYPE_COLLECTION)?.len() >= max_dbs {
                return Err(MongoliteError::InvalidArgument(format!(
                    "collection limit of {} reached",
                    max_dbs
                )));
            }
            let tree_name = collection_tree_name(name);
            txn.create_tree(&tree_name)?;
            let entry = CatalogEntry::new_collection(name, &tree_name, options.clone(), None);
            catalog::put(txn, &entry)
        })?;
        log_debug!("created collection '{}'", name);
        Ok(())
    }

    /// Drop a collection together with its indexes.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let state = &mut *self.state.lock();
        let result = state.txns.with_write(&self.store, |txn| {
            catalog::delete(txn, name)?;
            txn.drop_tree(&collection_tree_name(name))?;
            Ok(())
        });
        // Stale handles must go even on failure after a partial resolve.
        state.cache.remove(name);
        if result.is_ok() {
            log_debug!("dropped collection '{}'", name);
        }
        result
    }

    pub fn collection_exists(&self, name: &str) -> Result<bool> {
        let state = &mut *self.state.lock();
        if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            Ok(catalog::get(txn, name)?.is_some())
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = catalog::get(&txn, name).map(|entry| entry.is_some());
            state.txns.release_read(txn);
            result
        }
    }

    /// Names of all collections, in name order.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let state = &mut *self.state.lock();
        let entries = if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            catalog::list(txn, TYPE_COLLECTION)?
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = catalog::list(&txn, TYPE_COLLECTION);
            state.txns.release_read(txn);
            result?
        };
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    /// User metadata stored on a collection.
    pub fn collection_metadata(&self, name: &str) -> Result<Option<Document>> {
        let state = &mut *self.state.lock();
        let entry = if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            catalog::get(txn, name)?
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = catalog::get(&txn, name);
            state.txns.release_read(txn);
            result?
        };
        entry
            .map(|entry| entry.metadata)
            .ok_or_else(|| MongoliteError::NotFound(format!("collection '{}' not found", name)))
    }

    pub fn set_collection_metadata(&self, name: &str, metadata: Option<Document>) -> Result<()> {
        let state = &mut *self.state.lock();
        state.txns.with_write(&self.store, |txn| {
            let mut entry = catalog::get(txn, name)?.ok_or_else(|| {
                MongoliteError::NotFound(format!("collection '{}' not found", name))
            })?;
            entry.metadata = metadata.clone();
            entry.modified_at = catalog::now();
            catalog::put(txn, &entry)
        })
    }

    // ========== Indexes ==========

    /// Create a secondary index and populate it from existing documents.
    /// Returns the index name.
    pub fn create_index(
        &self,
        collection: &str,
        keys: &Document,
        options: IndexOptions,
    ) -> Result<String> {
        let spec = IndexSpec::from_doc(keys)?;
        let name = options.name.clone().unwrap_or_else(|| spec.default_name());
        if name.is_empty() {
            return Err(MongoliteError::InvalidArgument(
                "index name must not be empty".to_string(),
            ));
        }
        let desc = IndexDescriptor {
            name: name.clone(),
            spec,
            unique: options.unique,
            sparse: options.sparse,
        };

        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        state.txns.with_write(&self.store, |txn| {
            let handle = cache.resolve(txn, collection)?;
            match txn.index_create(&handle.tree_name, &desc.name, &desc.to_bytes()?) {
                Err(StoreError::KeyExists) => {
                    return Err(MongoliteError::AlreadyExists(format!(
                        "index '{}' already exists on '{}'",
                        desc.name, collection
                    )))
                }
                other => other?,
            }
            build_index(txn, &handle.tree_name, &desc)?;

            let mut entry = catalog::get(txn, collection)?.ok_or_else(|| {
                MongoliteError::NotFound(format!("collection '{}' not found", collection))
            })?;
            entry.modified_at = catalog::now();
            catalog::put(txn, &entry)
        })?;
        cache.invalidate_indexes(collection);
        log_debug!("created index '{}' on '{}'", name, collection);
        Ok(name)
    }

    /// Drop an index by name.
    pub fn drop_index(&self, collection: &str, index_name: &str) -> Result<()> {
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        state.txns.with_write(&self.store, |txn| {
            let handle = cache.resolve(txn, collection)?;
            if !txn.index_drop(&handle.tree_name, index_name)? {
                return Err(MongoliteError::NotFound(format!(
                    "index '{}' not found on '{}'",
                    index_name, collection
                )));
            }
            Ok(())
        })?;
        cache.invalidate_indexes(collection);
        Ok(())
    }

    /// Descriptors of all indexes on a collection.
    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDescriptor>> {
        let state = &mut *self.state.lock();
        if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            state.cache.indexes(txn, collection)
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = state.cache.indexes(&txn, collection);
            state.txns.release_read(txn);
            result
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.txns.shutdown();
        state.cache.clear();
        let _ = self.store.sync(false);
    }
}
