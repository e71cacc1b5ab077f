// mongolite-core/src/collection.rs
// Document lifecycle on top of the transactional store: _id minting,
// validation, insert/update/delete with index maintenance, filter-driven
// lookup, and the doc-count bookkeeping that keeps the catalog honest.

use crate::catalog;
use crate::cursor::FindCursor;
use crate::database::Database;
use crate::error::{MongoliteError, Result, StoreError};
use crate::log_debug;
use crate::index::{
    delete_document_entries, insert_document_entries, update_document_entries, IndexDescriptor,
};
use crate::query::Matcher;
use crate::query_planner::{QueryPlan, QueryPlanner};
use crate::store::{StoreRead, TreeId, WriteTxn};
use crate::tree_cache::{CollectionHandle, TreeCache};
use crate::value_utils::{as_f64, remove_path, set_path};
use bson::oid::ObjectId;
use bson::{Bson, Document};

/// Result of a batched insert.
#[derive(Debug, Clone)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<ObjectId>,
}

// ============================================================================
// DOCUMENT PREPARATION
// ============================================================================

/// Structural validation applied before any write.
fn validate_document(doc: &Document) -> Result<()> {
    for key in doc.keys() {
        if key.is_empty() {
            return Err(MongoliteError::Validation(
                "field names must not be empty".to_string(),
            ));
        }
        if key.starts_with('$') {
            return Err(MongoliteError::Validation(format!(
                "field name '{}' must not start with '$'",
                key
            )));
        }
        if key.contains('\0') {
            return Err(MongoliteError::Validation(
                "field names must not contain NUL".to_string(),
            ));
        }
    }
    Ok(())
}

/// Settle the primary key for a candidate document.
///
/// Missing `_id`: mint one and prepend it. An ObjectId `_id` keys the
/// document directly. Any other `_id` type is preserved as a user field
/// while an internal surrogate identifier keys the primary tree.
fn prepare_document(doc: Document) -> (ObjectId, Document) {
    let user_id = match doc.get("_id") {
        Some(Bson::ObjectId(id)) => Some(*id),
        Some(_) => return (ObjectId::new(), doc),
        None => None,
    };
    match user_id {
        Some(id) => (id, doc),
        None => {
            let id = ObjectId::new();
            let mut prepared = Document::new();
            prepared.insert("_id", id);
            for (key, value) in doc {
                prepared.insert(key, value);
            }
            (id, prepared)
        }
    }
}

fn parse_stored(bytes: &[u8]) -> Result<Document> {
    Document::from_reader(&mut &bytes[..])
        .map_err(|e| MongoliteError::Schema(format!("stored document decode failed: {}", e)))
}

/// Parse a JSON string into a BSON document (extended-JSON bridge).
fn parse_json_document(json: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let bson = Bson::try_from(value)
        .map_err(|e| MongoliteError::Validation(format!("JSON to BSON failed: {}", e)))?;
    match bson {
        Bson::Document(doc) => Ok(doc),
        other => Err(MongoliteError::Validation(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Relaxed extended-JSON rendering of a document.
fn document_to_json(doc: Document) -> String {
    Bson::Document(doc).into_relaxed_extjson().to_string()
}

// ============================================================================
// SHARED TRANSACTIONAL PLUMBING
// ============================================================================

/// Refresh `doc_count` (from the store's native cardinality) and
/// `modified_at` in the same transaction as the mutation they describe.
fn refresh_catalog(txn: &mut WriteTxn, collection: &str, primary: &TreeId) -> Result<()> {
    let mut entry = catalog::get(txn, collection)?
        .ok_or_else(|| MongoliteError::NotFound(format!("collection '{}' not found", collection)))?;
    entry.doc_count = txn.count(primary)? as i64;
    entry.modified_at = catalog::now();
    catalog::put(txn, &entry)
}

fn insert_in_txn(
    txn: &mut WriteTxn,
    cache: &mut TreeCache,
    collection: &str,
    doc: Document,
) -> Result<ObjectId> {
    let handle = cache.resolve(&*txn, collection)?;
    let indexes = cache.indexes(&*txn, collection)?;
    validate_document(&doc)?;
    let (id, prepared) = prepare_document(doc);
    let bytes = bson::to_vec(&prepared)?;

    match txn.put(&handle.tree, &id.bytes(), &bytes, false) {
        Err(StoreError::KeyExists) => {
            return Err(MongoliteError::AlreadyExists(format!(
                "duplicate _id {} in '{}'",
                id, collection
            )))
        }
        other => {
            other?;
        }
    }
    insert_document_entries(txn, &handle.tree_name, &indexes, &prepared, &id)?;
    refresh_catalog(txn, collection, &handle.tree)?;
    Ok(id)
}

/// Walk the best access path for `matcher` and collect up to `limit`
/// matching `(id, document)` pairs.
fn scan_matches<T: StoreRead>(
    txn: &T,
    handle: &CollectionHandle,
    indexes: &[IndexDescriptor],
    matcher: &Matcher,
    limit: Option<usize>,
) -> Result<Vec<(ObjectId, Document)>> {
    let mut found = Vec::new();
    let full = |found: &Vec<(ObjectId, Document)>| match limit {
        Some(n) => found.len() >= n,
        None => false,
    };

    match QueryPlanner::plan(matcher.filter(), indexes) {
        QueryPlan::IdLookup(id) => {
            if let Some(bytes) = txn.get(&handle.tree, &id.bytes())? {
                let doc = parse_stored(&bytes)?;
                if matcher.matches(&doc) {
                    found.push((id, doc));
                }
            }
        }
        QueryPlan::IndexScan { index, probe } => {
            let index_tree = index.tree_id(&handle.tree_name);
            for item in txn.iter_seek(&index_tree, Some(probe.as_slice()))? {
                if full(&found) {
                    break;
                }
                let (entry_key, id_bytes) = item?;
                if !entry_key.starts_with(&probe) {
                    break;
                }
                let id = crate::index::decode_primary_key(&id_bytes)?;
                let bytes = match txn.get(&handle.tree, &id.bytes())? {
                    Some(bytes) => bytes,
                    None => continue,
                };
                let doc = parse_stored(&bytes)?;
                if matcher.matches(&doc) {
                    found.push((id, doc));
                }
            }
        }
        QueryPlan::CollectionScan => {
            for item in txn.iter(&handle.tree)? {
                if full(&found) {
                    break;
                }
                let (key, bytes) = item?;
                let doc = parse_stored(&bytes)?;
                if matcher.matches(&doc) {
                    found.push((crate::index::decode_primary_key(&key)?, doc));
                }
            }
        }
    }
    Ok(found)
}

fn find_one_in<T: StoreRead>(
    txn: &T,
    cache: &mut TreeCache,
    collection: &str,
    matcher: &Matcher,
    projection: Option<&Document>,
) -> Result<Option<Document>> {
    let handle = cache.resolve(txn, collection)?;
    let indexes = cache.indexes(txn, collection)?;
    let mut found = scan_matches(txn, &handle, &indexes, matcher, Some(1))?;
    Ok(found.pop().map(|(_, doc)| match projection {
        Some(projection) => crate::find_options::apply_projection(&doc, projection),
        None => doc,
    }))
}

fn count_in<T: StoreRead>(
    txn: &T,
    cache: &mut TreeCache,
    collection: &str,
    filter: Option<&Document>,
) -> Result<u64> {
    let handle = cache.resolve(txn, collection)?;
    match filter {
        None => Ok(txn.count(&handle.tree)?),
        Some(filter) if filter.is_empty() => Ok(txn.count(&handle.tree)?),
        Some(filter) => {
            let matcher = Matcher::new(filter)?;
            let indexes = cache.indexes(txn, collection)?;
            Ok(scan_matches(txn, &handle, &indexes, &matcher, None)?.len() as u64)
        }
    }
}

/// Keep the error kind but mark which batch element failed.
fn batch_error(e: MongoliteError, index: usize) -> MongoliteError {
    let tag = |msg: String| format!("insert_many failed at index {}: {}", index, msg);
    match e {
        MongoliteError::AlreadyExists(m) => MongoliteError::AlreadyExists(tag(m)),
        MongoliteError::Index(m) => MongoliteError::Index(tag(m)),
        MongoliteError::Validation(m) => MongoliteError::Validation(tag(m)),
        MongoliteError::InvalidArgument(m) => MongoliteError::InvalidArgument(tag(m)),
        other => other,
    }
}

// ============================================================================
// UPDATE OPERATORS
// ============================================================================

/// Apply an update document to `doc`.
///
/// Operator form supports `$set`, `$unset`, and `$inc`. A document without
/// operators is a full replacement that keeps the original `_id`.
fn apply_update(doc: &Document, update: &Document) -> Result<Document> {
    let has_operators = update.keys().any(|k| k.starts_with('$'));
    if has_operators && !update.keys().all(|k| k.starts_with('$')) {
        return Err(MongoliteError::InvalidArgument(
            "cannot mix update operators and replacement fields".to_string(),
        ));
    }

    if !has_operators {
        // Replacement document; _id is immutable.
        if let (Some(old_id), Some(new_id)) = (doc.get("_id"), update.get("_id")) {
            if old_id != new_id {
                return Err(MongoliteError::InvalidArgument(
                    "replacement document must not change _id".to_string(),
                ));
            }
        }
        let mut replaced = Document::new();
        if let Some(id) = doc.get("_id") {
            replaced.insert("_id", id.clone());
        }
        for (key, value) in update.iter() {
            if key != "_id" {
                replaced.insert(key.clone(), value.clone());
            }
        }
        validate_document(&replaced)?;
        return Ok(replaced);
    }

    let mut updated = doc.clone();
    for (op, arg) in update.iter() {
        let fields = match arg {
            Bson::Document(fields) => fields,
            other => {
                return Err(MongoliteError::InvalidArgument(format!(
                    "'{}' takes a document, got {}",
                    op, other
                )))
            }
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields.iter() {
                    if path == "_id" {
                        return Err(MongoliteError::InvalidArgument(
                            "_id is immutable".to_string(),
                        ));
                    }
                    set_path(&mut updated, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in fields.iter() {
                    if path == "_id" {
                        return Err(MongoliteError::InvalidArgument(
                            "_id is immutable".to_string(),
                        ));
                    }
                    remove_path(&mut updated, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields.iter() {
                    let delta = as_f64(delta).ok_or_else(|| {
                        MongoliteError::InvalidArgument(format!(
                            "'$inc' on '{}' requires a numeric amount",
                            path
                        ))
                    })?;
                    let current = crate::value_utils::get_path(&updated, path).cloned();
                    let next = increment(current, delta)?;
                    set_path(&mut updated, path, next);
                }
            }
            unknown => {
                return Err(MongoliteError::InvalidArgument(format!(
                    "unknown update operator '{}'",
                    unknown
                )))
            }
        }
    }
    Ok(updated)
}

fn increment(current: Option<Bson>, delta: f64) -> Result<Bson> {
    match current {
        None => Ok(number_from_f64(delta)),
        Some(value) => match as_f64(&value) {
            Some(n) => Ok(number_from_f64(n + delta)),
            None => Err(MongoliteError::InvalidArgument(format!(
                "'$inc' target holds non-numeric value {}",
                value
            ))),
        },
    }
}

fn number_from_f64(n: f64) -> Bson {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Bson::Int64(n as i64)
    } else {
        Bson::Double(n)
    }
}

// ============================================================================
// PUBLIC DOCUMENT API
// ============================================================================

impl Database {
    /// Insert one document. Returns the identifier keying it.
    pub fn insert_one(&self, collection: &str, doc: Document) -> Result<ObjectId> {
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        let id = state
            .txns
            .with_write(&self.store, |txn| {
                insert_in_txn(txn, cache, collection, doc.clone())
            })?;
        state.changes += 1;
        state.last_insert_id = Some(id);
        Ok(id)
    }

    /// Insert a batch in one transaction; any failure aborts the whole batch
    /// and reports the offending element's index.
    pub fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertManyResult> {
        if docs.is_empty() {
            return Ok(InsertManyResult {
                inserted_ids: Vec::new(),
            });
        }
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        let result = state.txns.with_write(&self.store, |txn| {
            let mut inserted_ids = Vec::with_capacity(docs.len());
            for (i, doc) in docs.iter().enumerate() {
                let id = insert_in_txn(txn, cache, collection, doc.clone())
                    .map_err(|e| batch_error(e, i))?;
                inserted_ids.push(id);
            }
            Ok(InsertManyResult { inserted_ids })
        })?;
        state.changes += result.inserted_ids.len() as u64;
        state.last_insert_id = result.inserted_ids.last().copied();
        Ok(result)
    }

    /// Insert a document given as a JSON string.
    pub fn insert_one_text(&self, collection: &str, json: &str) -> Result<ObjectId> {
        self.insert_one(collection, parse_json_document(json)?)
    }

    /// Insert a batch of JSON strings in one transaction.
    pub fn insert_many_text(&self, collection: &str, jsons: &[&str]) -> Result<InsertManyResult> {
        let docs = jsons
            .iter()
            .map(|json| parse_json_document(json))
            .collect::<Result<Vec<_>>>()?;
        self.insert_many(collection, docs)
    }

    /// First document matching `filter`, optionally projected.
    pub fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Option<Document>> {
        if let Some(projection) = projection {
            crate::find_options::validate_projection(projection)?;
        }
        let matcher = Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            find_one_in(txn, &mut state.cache, collection, &matcher, projection)
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = find_one_in(&txn, &mut state.cache, collection, &matcher, projection);
            state.txns.release_read(txn);
            result
        }
    }

    /// `find_one` over JSON text: parse the filter, render the result as
    /// relaxed extended JSON.
    pub fn find_one_text(&self, collection: &str, filter_json: &str) -> Result<Option<String>> {
        let filter = parse_json_document(filter_json)?;
        Ok(self
            .find_one(collection, &filter, None)?
            .map(document_to_json))
    }

    /// Open a cursor over documents matching `filter`. The cursor owns its
    /// read snapshot; writes after `find` do not affect the iteration.
    ///
    /// The snapshot covers committed state only. Unlike `find_one`/`count`,
    /// a collection created inside a still-open explicit transaction is not
    /// visible here and fails with `NotFound` until the transaction commits.
    pub fn find(&self, collection: &str, filter: &Document) -> Result<FindCursor> {
        let matcher = Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        let (handle, indexes) = if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            let handle = state.cache.resolve(txn, collection)?;
            let indexes = state.cache.indexes(txn, collection)?;
            (handle, indexes)
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let handle = state.cache.resolve(&txn, collection);
            let indexes = match &handle {
                Ok(_) => state.cache.indexes(&txn, collection),
                Err(_) => Ok(Vec::new()),
            };
            state.txns.release_read(txn);
            (handle?, indexes?)
        };
        let plan = QueryPlanner::plan(filter, &indexes);
        let txn = self.store.begin_read()?;
        // The lookup above may have run against uncommitted state (explicit
        // transaction) or an older snapshot (another handle dropping the
        // collection in between). The cursor iterates this snapshot, so the
        // tree must exist here or the caller gets a clean NotFound now
        // instead of a backend error on the first next().
        if !txn.tree_exists(&handle.tree)? {
            return Err(MongoliteError::NotFound(format!(
                "collection '{}' not found",
                collection
            )));
        }
        Ok(FindCursor::new(txn, handle.tree, plan, matcher))
    }

    /// `find` with skip/limit/sort/projection preconfigured.
    pub fn find_with_options(
        &self,
        collection: &str,
        filter: &Document,
        options: crate::find_options::FindOptions,
    ) -> Result<FindCursor> {
        let mut cursor = self.find(collection, filter)?;
        if let Some(skip) = options.skip {
            cursor.set_skip(skip)?;
        }
        if let Some(limit) = options.limit {
            cursor.set_limit(limit)?;
        }
        if let Some(sort) = &options.sort {
            let mut spec = Document::new();
            for (field, direction) in sort {
                spec.insert(field.clone(), *direction);
            }
            cursor.set_sort(&spec)?;
        }
        if let Some(projection) = &options.projection {
            cursor.set_projection(projection)?;
        }
        Ok(cursor)
    }

    /// Describe the plan `find` would use for this filter without running it.
    pub fn explain(&self, collection: &str, filter: &Document) -> Result<Document> {
        Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        let indexes = if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            state.cache.resolve(txn, collection)?;
            state.cache.indexes(txn, collection)?
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = match state.cache.resolve(&txn, collection) {
                Ok(_) => state.cache.indexes(&txn, collection),
                Err(e) => Err(e),
            };
            state.txns.release_read(txn);
            result?
        };
        Ok(QueryPlanner::explain(filter, &indexes))
    }

    /// Number of documents matching `filter`; `None` or an empty filter
    /// reads the native tree cardinality.
    pub fn count(&self, collection: &str, filter: Option<&Document>) -> Result<u64> {
        let state = &mut *self.state.lock();
        if state.txns.in_transaction() {
            let txn = state.txns.explicit().expect("explicit txn present");
            count_in(txn, &mut state.cache, collection, filter)
        } else {
            let txn = state.txns.acquire_read(&self.store)?;
            let result = count_in(&txn, &mut state.cache, collection, filter);
            state.txns.release_read(txn);
            result
        }
    }

    /// Delete the first document matching `filter`. Returns 0 or 1.
    pub fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64> {
        let matcher = Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        let deleted = state.txns.with_write(&self.store, |txn| {
            let handle = cache.resolve(&*txn, collection)?;
            let indexes = cache.indexes(&*txn, collection)?;
            let victim = scan_matches(&*txn, &handle, &indexes, &matcher, Some(1))?.pop();
            match victim {
                None => Ok(0),
                Some((id, doc)) => {
                    delete_document_entries(txn, &handle.tree_name, &indexes, &doc, &id)?;
                    txn.delete(&handle.tree, &id.bytes())?;
                    refresh_catalog(txn, collection, &handle.tree)?;
                    Ok(1)
                }
            }
        })?;
        state.changes += deleted;
        Ok(deleted)
    }

    /// Delete every document matching `filter` in one transaction. Returns
    /// the number removed.
    pub fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64> {
        let matcher = Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        let deleted = state.txns.with_write(&self.store, |txn| {
            let handle = cache.resolve(&*txn, collection)?;
            let indexes = cache.indexes(&*txn, collection)?;
            // The scan borrows the transaction the deletions need, so the
            // victims are collected first and removed in a second pass.
            let victims = scan_matches(&*txn, &handle, &indexes, &matcher, None)?;
            if victims.is_empty() {
                return Ok(0);
            }
            let mut removed = 0u64;
            for (id, doc) in &victims {
                delete_document_entries(txn, &handle.tree_name, &indexes, doc, id)?;
                if txn.delete(&handle.tree, &id.bytes())? {
                    removed += 1;
                }
            }
            refresh_catalog(txn, collection, &handle.tree)?;
            Ok(removed)
        })?;
        state.changes += deleted;
        Ok(deleted)
    }

    /// Read-modify-write update of the first matching document with
    /// `$set`/`$unset`/`$inc` (or a replacement document). Returns 0 or 1.
    pub fn update_one(&self, collection: &str, filter: &Document, update: &Document) -> Result<u64> {
        let matcher = Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        let modified = state.txns.with_write(&self.store, |txn| {
            let handle = cache.resolve(&*txn, collection)?;
            let indexes = cache.indexes(&*txn, collection)?;
            let victim = scan_matches(&*txn, &handle, &indexes, &matcher, Some(1))?.pop();
            match victim {
                None => Ok(0),
                Some((id, old_doc)) => {
                    let new_doc = apply_update(&old_doc, update)?;
                    update_document_entries(
                        txn,
                        &handle.tree_name,
                        &indexes,
                        &old_doc,
                        &new_doc,
                        &id,
                    )?;
                    txn.put(&handle.tree, &id.bytes(), &bson::to_vec(&new_doc)?, true)?;
                    refresh_catalog(txn, collection, &handle.tree)?;
                    Ok(1)
                }
            }
        })?;
        state.changes += modified;
        Ok(modified)
    }

    /// Update every matching document in one transaction. Returns the number
    /// modified.
    pub fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<u64> {
        let matcher = Matcher::new(filter)?;
        let state = &mut *self.state.lock();
        let cache = &mut state.cache;
        let modified = state.txns.with_write(&self.store, |txn| {
            let handle = cache.resolve(&*txn, collection)?;
            let indexes = cache.indexes(&*txn, collection)?;
            let victims = scan_matches(&*txn, &handle, &indexes, &matcher, None)?;
            if victims.is_empty() {
                return Ok(0);
            }
            let mut touched = 0u64;
            for (id, old_doc) in &victims {
                let new_doc = apply_update(old_doc, update)?;
                update_document_entries(
                    txn,
                    &handle.tree_name,
                    &indexes,
                    old_doc,
                    &new_doc,
                    id,
                )?;
                txn.put(&handle.tree, &id.bytes(), &bson::to_vec(&new_doc)?, true)?;
                touched += 1;
            }
            refresh_catalog(txn, collection, &handle.tree)?;
            Ok(touched)
        })?;
        log_debug!("update_many touched {} documents in '{}'", modified, collection);
        state.changes += modified;
        Ok(modified)
    }

    /// Replace the first matching document wholesale, keeping its `_id`.
    pub fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: Document,
    ) -> Result<u64> {
        self.update_one(collection, filter, &replacement)
    }
}
