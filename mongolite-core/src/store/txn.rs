// mongolite-core/src/store/txn.rs
// Read and write transactions. Readers hold an immutable snapshot (meta +
// map); the single writer buffers copy-on-write pages in memory and publishes
// them on commit by flipping the meta page.

use super::iter::{iter_tree, TreeIter};
use super::node::{Node, ValueRepr};
use super::tree::{tree_contains, tree_delete, tree_get, tree_put, PutResult};
use super::{DirEntry, Meta, StoreInner, TreeId, NO_PAGE, PAGE_SIZE};
use crate::error::{StoreError, StoreResult};
use memmap2::Mmap;
use std::collections::HashMap;
use std::os::unix::fs::FileExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Access to pages of one transaction's view of the file.
pub trait PageSource {
    /// A full page. Dirty pages shadow committed ones in write transactions.
    fn page(&self, id: u64) -> StoreResult<&[u8]>;
}

fn map_page(map: &Mmap, id: u64) -> StoreResult<&[u8]> {
    if id == NO_PAGE || id == 1 {
        return Err(StoreError::Corrupt(format!(
            "page reference into meta area ({})",
            id
        )));
    }
    let start = (id as usize) * PAGE_SIZE;
    let end = start + PAGE_SIZE;
    if end > map.len() {
        return Err(StoreError::Corrupt(format!(
            "page {} beyond the mapped area",
            id
        )));
    }
    Ok(&map[start..end])
}

fn decode_dir_entry(bytes: &[u8]) -> StoreResult<DirEntry> {
    bincode::deserialize(bytes)
        .map_err(|e| StoreError::Corrupt(format!("directory entry decode failed: {}", e)))
}

fn encode_dir_entry(entry: &DirEntry) -> StoreResult<Vec<u8>> {
    bincode::serialize(entry)
        .map_err(|e| StoreError::Corrupt(format!("directory entry encode failed: {}", e)))
}

fn tree_name_of(tree: &TreeId) -> String {
    String::from_utf8_lossy(&tree.0).into_owned()
}

/// Shared read operations over either transaction kind.
pub trait StoreRead: PageSource {
    /// Root of the tree directory in this transaction's view.
    fn dir_root(&self) -> u64;

    fn dir_entry(&self, dir_key: &[u8]) -> StoreResult<Option<DirEntry>> {
        match tree_get(self, self.dir_root(), dir_key)? {
            Some(bytes) => Ok(Some(decode_dir_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    fn tree_exists(&self, tree: &TreeId) -> StoreResult<bool> {
        Ok(self.dir_entry(&tree.0)?.is_some())
    }

    /// Live entry count of a tree.
    fn count(&self, tree: &TreeId) -> StoreResult<u64> {
        match self.dir_entry(&tree.0)? {
            Some(entry) => Ok(entry.count),
            None => Err(StoreError::TreeNotFound(tree_name_of(tree))),
        }
    }

    fn get(&self, tree: &TreeId, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        match self.dir_entry(&tree.0)? {
            Some(entry) => tree_get(self, entry.root, key),
            None => Err(StoreError::TreeNotFound(tree_name_of(tree))),
        }
    }

    fn contains(&self, tree: &TreeId, key: &[u8]) -> StoreResult<bool> {
        match self.dir_entry(&tree.0)? {
            Some(entry) => tree_contains(self, entry.root, key),
            None => Err(StoreError::TreeNotFound(tree_name_of(tree))),
        }
    }

    /// Forward iterator from the first key.
    fn iter(&self, tree: &TreeId) -> StoreResult<TreeIter<'_, Self>>
    where
        Self: Sized,
    {
        self.iter_seek(tree, None)
    }

    /// Forward iterator from the first key at or above `probe`.
    fn iter_seek(&self, tree: &TreeId, probe: Option<&[u8]>) -> StoreResult<TreeIter<'_, Self>>
    where
        Self: Sized,
    {
        match self.dir_entry(&tree.0)? {
            Some(entry) => iter_tree(self, entry.root, probe),
            None => Err(StoreError::TreeNotFound(tree_name_of(tree))),
        }
    }

    /// Names and descriptor blobs of the index sub-trees persisted for a
    /// data tree.
    fn index_descriptors(&self, tree_name: &str) -> StoreResult<Vec<(String, Vec<u8>)>>
    where
        Self: Sized,
    {
        let mut prefix = Vec::with_capacity(3 + tree_name.len());
        prefix.extend_from_slice(b"i:");
        prefix.extend_from_slice(tree_name.as_bytes());
        prefix.push(0);

        let mut out = Vec::new();
        for item in iter_tree(self, self.dir_root(), Some(prefix.as_slice()))? {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let name = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|_| StoreError::Corrupt("non-UTF8 index name".to_string()))?;
            let entry = decode_dir_entry(&value)?;
            out.push((name, entry.desc));
        }
        Ok(out)
    }
}

// ============================================================================
// READ TRANSACTION
// ============================================================================

/// Snapshot-isolated read transaction. `reset` keeps the reader-table slot so
/// a later `renew` is cheap; `abort` (or drop) releases the slot.
pub struct ReadTxn {
    inner: Arc<StoreInner>,
    map: Arc<Mmap>,
    snapshot: Meta,
    slot: usize,
    active: bool,
}

impl ReadTxn {
    pub(crate) fn new(inner: Arc<StoreInner>, map: Arc<Mmap>, snapshot: Meta, slot: usize) -> Self {
        ReadTxn {
            inner,
            map,
            snapshot,
            slot,
            active: true,
        }
    }

    /// Transaction id of the snapshot this reader sees.
    pub fn id(&self) -> u64 {
        self.snapshot.txn_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Give up the snapshot but keep the reader-table slot.
    pub fn reset(&mut self) {
        self.active = false;
        self.inner.reader_snapshot(self.slot, None);
    }

    /// Re-acquire a snapshot of the latest committed state.
    pub fn renew(&mut self) -> StoreResult<()> {
        let meta = *self.inner.meta.lock();
        self.map = self.inner.map.read().clone();
        self.snapshot = meta;
        self.active = true;
        self.inner.reader_snapshot(self.slot, Some(meta.txn_id));
        Ok(())
    }

    /// Release the slot. Dropping has the same effect.
    pub fn abort(self) {}
}

impl PageSource for ReadTxn {
    fn page(&self, id: u64) -> StoreResult<&[u8]> {
        if !self.active {
            return Err(StoreError::Invalid(
                "read transaction is reset; renew it first".to_string(),
            ));
        }
        map_page(&self.map, id)
    }
}

impl StoreRead for ReadTxn {
    fn dir_root(&self) -> u64 {
        self.snapshot.dir_root
    }
}

impl Drop for ReadTxn {
    fn drop(&mut self) {
        self.inner.release_reader(self.slot);
    }
}

// ============================================================================
// WRITE TRANSACTION
// ============================================================================

/// The single write transaction. Dirty pages stay in memory until commit.
pub struct WriteTxn {
    inner: Arc<StoreInner>,
    map: Arc<Mmap>,
    base: Meta,
    next_page: u64,
    dir_root: u64,
    dirty: HashMap<u64, Vec<u8>>,
}

impl WriteTxn {
    pub(crate) fn new(inner: Arc<StoreInner>, map: Arc<Mmap>, base: Meta) -> Self {
        WriteTxn {
            inner,
            map,
            next_page: base.next_page,
            dir_root: base.dir_root,
            base,
            dirty: HashMap::new(),
        }
    }

    /// Id this transaction will commit as.
    pub fn id(&self) -> u64 {
        self.base.txn_id + 1
    }

    /// Bump-allocate `n` contiguous pages, failing with `MapFull` past the
    /// mapped size.
    pub(crate) fn alloc_pages(&mut self, n: u64) -> StoreResult<u64> {
        let map_bytes = self.inner.map_bytes.load(Ordering::Acquire);
        let end = self
            .next_page
            .checked_add(n)
            .ok_or(StoreError::MapFull)?
            .checked_mul(PAGE_SIZE as u64)
            .ok_or(StoreError::MapFull)?;
        if end > map_bytes {
            return Err(StoreError::MapFull);
        }
        let id = self.next_page;
        self.next_page += n;
        Ok(id)
    }

    /// Encode a node into a freshly allocated dirty page.
    pub(crate) fn write_node(&mut self, node: &Node) -> StoreResult<u64> {
        let id = self.alloc_pages(1)?;
        self.dirty.insert(id, node.encode()?);
        Ok(id)
    }

    /// Spill a large value into a contiguous overflow run.
    pub(crate) fn write_overflow(&mut self, value: &[u8]) -> StoreResult<ValueRepr> {
        let pages = ((value.len() + PAGE_SIZE - 1) / PAGE_SIZE) as u64;
        let first = self.alloc_pages(pages)?;
        for (i, chunk) in value.chunks(PAGE_SIZE).enumerate() {
            let mut page = vec![0u8; PAGE_SIZE];
            page[..chunk.len()].copy_from_slice(chunk);
            self.dirty.insert(first + i as u64, page);
        }
        Ok(ValueRepr::Overflow {
            page: first,
            len: value.len() as u64,
        })
    }

    fn dir_put(&mut self, dir_key: &[u8], entry: &DirEntry) -> StoreResult<()> {
        let bytes = encode_dir_entry(entry)?;
        let root = self.dir_root;
        let (new_root, _) = tree_put(self, root, dir_key, &bytes, true)?;
        self.dir_root = new_root;
        Ok(())
    }

    fn dir_delete(&mut self, dir_key: &[u8]) -> StoreResult<bool> {
        let root = self.dir_root;
        let (new_root, deleted) = tree_delete(self, root, dir_key)?;
        self.dir_root = new_root;
        Ok(deleted)
    }

    /// Open-or-create a named data tree.
    pub fn create_tree(&mut self, name: &str) -> StoreResult<()> {
        let id = TreeId::data(name);
        if self.dir_entry(&id.0)?.is_none() {
            self.dir_put(&id.0, &DirEntry::new())?;
        }
        Ok(())
    }

    /// Drop a data tree together with its index sub-trees. Returns whether
    /// the tree existed.
    pub fn drop_tree(&mut self, name: &str) -> StoreResult<bool> {
        let id = TreeId::data(name);
        if self.dir_entry(&id.0)?.is_none() {
            return Ok(false);
        }
        let index_names: Vec<String> = self
            .index_descriptors(name)?
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        for index in index_names {
            self.dir_delete(&TreeId::index(name, &index).0)?;
        }
        self.dir_delete(&id.0)?;
        Ok(true)
    }

    /// Insert or replace a key. With `overwrite == false`, an existing key
    /// fails with `KeyExists` and nothing is written.
    pub fn put(
        &mut self,
        tree: &TreeId,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> StoreResult<PutOutcome> {
        let mut entry = self
            .dir_entry(&tree.0)?
            .ok_or_else(|| StoreError::TreeNotFound(tree_name_of(tree)))?;
        let (new_root, result) = tree_put(self, entry.root, key, value, overwrite)?;
        entry.root = new_root;
        let outcome = match result {
            PutResult::Inserted => {
                entry.count += 1;
                PutOutcome::Inserted
            }
            PutResult::Replaced => PutOutcome::Replaced,
        };
        self.dir_put(&tree.0, &entry)?;
        Ok(outcome)
    }

    /// Delete a key. Returns whether it was present.
    pub fn delete(&mut self, tree: &TreeId, key: &[u8]) -> StoreResult<bool> {
        let mut entry = self
            .dir_entry(&tree.0)?
            .ok_or_else(|| StoreError::TreeNotFound(tree_name_of(tree)))?;
        let (new_root, deleted) = tree_delete(self, entry.root, key)?;
        if deleted {
            entry.root = new_root;
            entry.count = entry.count.saturating_sub(1);
            self.dir_put(&tree.0, &entry)?;
        }
        Ok(deleted)
    }

    /// Persist an index sub-tree with its opaque descriptor. The data tree
    /// must exist; a same-named index fails with `KeyExists`.
    pub fn index_create(
        &mut self,
        tree_name: &str,
        index_name: &str,
        descriptor: &[u8],
    ) -> StoreResult<()> {
        if self.dir_entry(&TreeId::data(tree_name).0)?.is_none() {
            return Err(StoreError::TreeNotFound(tree_name.to_string()));
        }
        let id = TreeId::index(tree_name, index_name);
        if self.dir_entry(&id.0)?.is_some() {
            return Err(StoreError::KeyExists);
        }
        let mut entry = DirEntry::new();
        entry.desc = descriptor.to_vec();
        self.dir_put(&id.0, &entry)
    }

    /// Remove a persisted index sub-tree. Returns whether it existed.
    pub fn index_drop(&mut self, tree_name: &str, index_name: &str) -> StoreResult<bool> {
        self.dir_delete(&TreeId::index(tree_name, index_name).0)
    }

    /// Write dirty pages, fsync, and flip the meta page. A transaction with
    /// no changes commits as a no-op without bumping the txn id.
    pub fn commit(mut self) -> StoreResult<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<u64> = self.dirty.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let page = &self.dirty[&id];
            self.inner
                .file
                .write_all_at(page, id * PAGE_SIZE as u64)?;
        }
        if !self.inner.no_sync {
            self.inner.file.sync_data()?;
        }
        let meta = Meta {
            txn_id: self.base.txn_id + 1,
            next_page: self.next_page,
            dir_root: self.dir_root,
        };
        self.inner.publish_meta(meta)?;
        self.dirty.clear();
        Ok(())
    }

    /// Discard all buffered changes. Dropping has the same effect.
    pub fn abort(self) {}
}

/// Outcome of [`WriteTxn::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Replaced,
}

impl PageSource for WriteTxn {
    fn page(&self, id: u64) -> StoreResult<&[u8]> {
        if let Some(page) = self.dirty.get(&id) {
            return Ok(page.as_slice());
        }
        map_page(&self.map, id)
    }
}

impl StoreRead for WriteTxn {
    fn dir_root(&self) -> u64 {
        self.dir_root
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        self.inner.writer_active.store(false, Ordering::Release);
    }
}
