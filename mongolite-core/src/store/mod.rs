// mongolite-core/src/store/mod.rs
//! Single-writer, copy-on-write B+tree store over a memory-mapped file.
//!
//! The file is a sequence of 4 KiB pages. Pages 0 and 1 are alternating meta
//! pages; recovery picks the valid one with the highest transaction id. All
//! other pages hold bincode-encoded tree nodes or raw overflow bytes. A write
//! transaction never touches committed pages: it allocates fresh pages from a
//! bump allocator and publishes them by flipping the meta page on commit, so
//! read snapshots stay valid for as long as the reader holds them.
//!
//! Named trees live in a reserved directory tree mapping a directory key to
//! `{root, count, flags, descriptor}`. Data trees use `t:<name>`; secondary
//! index sub-trees are owned by their data tree under `i:<name>\0<index>` and
//! carry an opaque descriptor blob for the layer above.

mod iter;
mod node;
mod tree;
mod txn;

pub use iter::TreeIter;
pub use txn::{PageSource, ReadTxn, StoreRead, WriteTxn};

use crate::error::{StoreError, StoreResult};
use crate::log_debug;
use lazy_static::lazy_static;
use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

lazy_static! {
    /// Open stores by canonical path. Handles opened on the same file share
    /// one inner store, so the single-writer rule holds across handles.
    static ref OPEN_STORES: Mutex<HashMap<PathBuf, Weak<StoreInner>>> =
        Mutex::new(HashMap::new());
}

/// Size of one page. Nodes are encoded to fit; larger values spill to
/// overflow page runs.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel page id meaning "no page" (page 0 is always a meta page).
pub const NO_PAGE: u64 = 0;

const META_MAGIC: u32 = 0x4D47_4C54; // "MGLT"
const META_VERSION: u32 = 1;
const META_LEN: usize = 36; // 32 bytes of fields + crc32

/// Default initial map size: 1 GiB.
pub const DEFAULT_MAP_BYTES: u64 = 1 << 30;

/// Store open options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Initial mapping size. The data file is created sparse at this length.
    pub map_bytes: u64,
    /// Skip the per-commit fsync. Durability is then only guaranteed after an
    /// explicit [`Store::sync`].
    pub no_sync: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            map_bytes: DEFAULT_MAP_BYTES,
            no_sync: false,
        }
    }
}

/// Opaque address of a tree inside the store: the directory key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Vec<u8>);

impl TreeId {
    /// Address of a named data tree.
    pub fn data(name: &str) -> TreeId {
        let mut key = Vec::with_capacity(2 + name.len());
        key.extend_from_slice(b"t:");
        key.extend_from_slice(name.as_bytes());
        TreeId(key)
    }

    /// Address of an index sub-tree owned by a data tree. Tree names never
    /// contain NUL, so the separator is unambiguous.
    pub fn index(tree_name: &str, index_name: &str) -> TreeId {
        let mut key = Vec::with_capacity(2 + tree_name.len() + 1 + index_name.len());
        key.extend_from_slice(b"i:");
        key.extend_from_slice(tree_name.as_bytes());
        key.push(0);
        key.extend_from_slice(index_name.as_bytes());
        TreeId(key)
    }
}

/// Directory entry for a tree: root page, live entry count, flags, and an
/// opaque descriptor (used by index sub-trees, empty for data trees).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct DirEntry {
    pub root: u64,
    pub count: u64,
    pub flags: u32,
    pub desc: Vec<u8>,
}

impl DirEntry {
    pub(crate) fn new() -> Self {
        DirEntry {
            root: NO_PAGE,
            count: 0,
            flags: 0,
            desc: Vec::new(),
        }
    }
}

/// One committed state of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Meta {
    pub txn_id: u64,
    pub next_page: u64,
    pub dir_root: u64,
}

impl Meta {
    fn encode(&self) -> [u8; META_LEN] {
        let mut buf = [0u8; META_LEN];
        buf[0..4].copy_from_slice(&META_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&META_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.txn_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.next_page.to_le_bytes());
        buf[24..32].copy_from_slice(&self.dir_root.to_le_bytes());
        let crc = crc32fast::hash(&buf[0..32]);
        buf[32..36].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Meta> {
        if buf.len() < META_LEN {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let version = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let crc = u32::from_le_bytes(buf[32..36].try_into().ok()?);
        if magic != META_MAGIC || version != META_VERSION || crc != crc32fast::hash(&buf[0..32]) {
            return None;
        }
        Some(Meta {
            txn_id: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            next_page: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            dir_root: u64::from_le_bytes(buf[24..32].try_into().ok()?),
        })
    }
}

/// Reader-table slot. A reset transaction stays registered (owns its slot)
/// but carries no snapshot until renewed.
#[derive(Debug, Clone, Copy)]
struct ReaderSlot {
    in_use: bool,
    snapshot_txn: Option<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct ReaderTable {
    slots: Vec<ReaderSlot>,
}

impl ReaderTable {
    /// Register a new reader. Scans for a free slot, which is why callers
    /// pool and renew read transactions instead of beginning fresh ones.
    fn register(&mut self, txn_id: u64) -> usize {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.in_use {
                slot.in_use = true;
                slot.snapshot_txn = Some(txn_id);
                return i;
            }
        }
        self.slots.push(ReaderSlot {
            in_use: true,
            snapshot_txn: Some(txn_id),
        });
        self.slots.len() - 1
    }

    fn set_snapshot(&mut self, slot: usize, txn_id: Option<u64>) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.snapshot_txn = txn_id;
        }
    }

    fn release(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.in_use = false;
            s.snapshot_txn = None;
        }
    }

    #[cfg(test)]
    fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }
}

pub(crate) struct StoreInner {
    pub(crate) file: File,
    path: PathBuf,
    pub(crate) map: RwLock<Arc<Mmap>>,
    pub(crate) meta: Mutex<Meta>,
    pub(crate) readers: Mutex<ReaderTable>,
    pub(crate) writer_active: AtomicBool,
    pub(crate) map_bytes: AtomicU64,
    pub(crate) no_sync: bool,
}

/// Handle to one store file. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> StoreResult<Store> {
        if options.map_bytes < (PAGE_SIZE as u64) * 4 {
            return Err(StoreError::Invalid(format!(
                "map size {} is below the minimum of four pages",
                options.map_bytes
            )));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let canonical = path.canonicalize()?;

        // One inner store per file within this process; the registry lock
        // also serializes racing opens of the same path.
        let mut registry = OPEN_STORES.lock();
        registry.retain(|_, weak| weak.strong_count() > 0);
        if let Some(inner) = registry.get(&canonical).and_then(Weak::upgrade) {
            let store = Store { inner };
            if options.map_bytes > store.map_size() {
                store.resize(options.map_bytes)?;
            }
            return Ok(store);
        }

        let existing_len = file.metadata()?.len();
        let meta = if existing_len == 0 {
            // Fresh file: size it sparse and write both meta pages.
            file.set_len(options.map_bytes)?;
            let meta = Meta {
                txn_id: 0,
                next_page: 2,
                dir_root: NO_PAGE,
            };
            let buf = meta.encode();
            file.write_all_at(&buf, 0)?;
            file.write_all_at(&buf, PAGE_SIZE as u64)?;
            file.sync_data()?;
            meta
        } else {
            if options.map_bytes > existing_len {
                file.set_len(options.map_bytes)?;
            }
            Self::load_meta(&file)?
        };

        let map_bytes = file.metadata()?.len();
        let map = unsafe { Mmap::map(&file)? };
        log_debug!(
            "opened store {} (txn {}, {} pages in use)",
            path.display(),
            meta.txn_id,
            meta.next_page
        );

        let inner = Arc::new(StoreInner {
            file,
            path,
            map: RwLock::new(Arc::new(map)),
            meta: Mutex::new(meta),
            readers: Mutex::new(ReaderTable::default()),
            writer_active: AtomicBool::new(false),
            map_bytes: AtomicU64::new(map_bytes),
            no_sync: options.no_sync,
        });
        registry.insert(canonical, Arc::downgrade(&inner));
        Ok(Store { inner })
    }

    /// Read both meta pages through the file (not the map; meta pages get
    /// rewritten in place) and pick the valid one with the highest txn id.
    fn load_meta(file: &File) -> StoreResult<Meta> {
        let mut buf0 = [0u8; META_LEN];
        let mut buf1 = [0u8; META_LEN];
        file.read_exact_at(&mut buf0, 0)?;
        file.read_exact_at(&mut buf1, PAGE_SIZE as u64)?;
        match (Meta::decode(&buf0), Meta::decode(&buf1)) {
            (Some(a), Some(b)) => Ok(if a.txn_id >= b.txn_id { a } else { b }),
            (Some(a), None) => Ok(a),
            (None, Some(b)) => Ok(b),
            (None, None) => Err(StoreError::Corrupt(
                "both meta pages failed checksum validation".to_string(),
            )),
        }
    }

    /// Begin a read transaction: register in the reader table and capture the
    /// current committed snapshot.
    pub fn begin_read(&self) -> StoreResult<ReadTxn> {
        let meta = *self.inner.meta.lock();
        let slot = self.inner.readers.lock().register(meta.txn_id);
        let map = self.inner.map.read().clone();
        Ok(ReadTxn::new(self.inner.clone(), map, meta, slot))
    }

    /// Begin the write transaction. Only one may exist at a time.
    pub fn begin_write(&self) -> StoreResult<WriteTxn> {
        if self
            .inner
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StoreError::Busy);
        }
        let meta = *self.inner.meta.lock();
        let map = self.inner.map.read().clone();
        Ok(WriteTxn::new(self.inner.clone(), map, meta))
    }

    /// Flush file contents. With `force`, fsync even when the store was
    /// opened with `no_sync`.
    pub fn sync(&self, force: bool) -> StoreResult<()> {
        if force || !self.inner.no_sync {
            self.inner.file.sync_data()?;
        }
        Ok(())
    }

    /// Grow the mapping to `new_bytes` and swap in a fresh map. Existing read
    /// snapshots keep their old (smaller, still valid) map.
    pub fn resize(&self, new_bytes: u64) -> StoreResult<()> {
        let current = self.inner.map_bytes.load(Ordering::Acquire);
        if new_bytes <= current {
            return Ok(());
        }
        if self.inner.writer_active.load(Ordering::Acquire) {
            return Err(StoreError::Busy);
        }
        self.inner.file.set_len(new_bytes)?;
        let map = unsafe { Mmap::map(&self.inner.file)? };
        *self.inner.map.write() = Arc::new(map);
        self.inner.map_bytes.store(new_bytes, Ordering::Release);
        log_debug!(
            "resized store {} to {} bytes",
            self.inner.path.display(),
            new_bytes
        );
        Ok(())
    }

    /// Current mapping size in bytes.
    pub fn map_size(&self) -> u64 {
        self.inner.map_bytes.load(Ordering::Acquire)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Transaction id of the last committed write.
    pub fn last_txn_id(&self) -> u64 {
        self.inner.meta.lock().txn_id
    }
}

impl StoreInner {
    /// Publish a committed meta: write to the alternating slot, then cache.
    pub(crate) fn publish_meta(&self, meta: Meta) -> StoreResult<()> {
        let buf = meta.encode();
        let slot = (meta.txn_id % 2) as u64;
        self.file.write_all_at(&buf, slot * PAGE_SIZE as u64)?;
        if !self.no_sync {
            self.file.sync_data()?;
        }
        *self.meta.lock() = meta;
        Ok(())
    }

    pub(crate) fn release_reader(&self, slot: usize) {
        self.readers.lock().release(slot);
    }

    pub(crate) fn reader_snapshot(&self, slot: usize, txn_id: Option<u64>) {
        self.readers.lock().set_snapshot(slot, txn_id);
    }
}
