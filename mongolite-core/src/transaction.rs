// mongolite-core/src/transaction.rs
// Transaction runtime: read-transaction pooling, explicit transaction state,
// auto-commit, and map-full recovery.
//
// The runtime lives inside the database handle's mutex, so there is never
// more than one caller in here at a time. Beginning a fresh read transaction
// registers a reader-table slot; the pool keeps one reset transaction around
// and renews it on demand instead.

use crate::error::{MongoliteError, Result, StoreError};
use crate::log_debug;
use crate::store::{ReadTxn, Store, WriteTxn};

pub struct TxnRuntime {
    /// One reset read transaction kept per handle, renewed on demand.
    pooled_read: Option<ReadTxn>,
    /// The user's explicit transaction, when one is open.
    explicit: Option<WriteTxn>,
}

impl TxnRuntime {
    pub fn new() -> TxnRuntime {
        TxnRuntime {
            pooled_read: None,
            explicit: None,
        }
    }

    /// Is an explicit transaction active?
    pub fn in_transaction(&self) -> bool {
        self.explicit.is_some()
    }

    /// The active explicit transaction, for operations that must observe its
    /// uncommitted writes.
    pub fn explicit(&self) -> Option<&WriteTxn> {
        self.explicit.as_ref()
    }

    /// Borrow a read transaction: renew the pooled one when possible, begin a
    /// fresh one otherwise. Pair with [`TxnRuntime::release_read`].
    pub fn acquire_read(&mut self, store: &Store) -> Result<ReadTxn> {
        if let Some(mut txn) = self.pooled_read.take() {
            if txn.renew().is_ok() {
                return Ok(txn);
            }
            // A failed renew leaves the handle unusable; fall through to a
            // fresh begin after dropping it.
            txn.abort();
        }
        Ok(store.begin_read()?)
    }

    /// Reset a read transaction back into the pool instead of aborting, so
    /// the next acquire can renew it without a reader-table scan.
    pub fn release_read(&mut self, mut txn: ReadTxn) {
        txn.reset();
        self.pooled_read = Some(txn);
    }

    /// Abort the pooled read transaction. Every write acquisition path calls
    /// this first: even reset, the pooled reader owns a reader-table slot.
    pub fn drop_pooled_read(&mut self) {
        if let Some(txn) = self.pooled_read.take() {
            txn.abort();
        }
    }

    /// Start an explicit transaction.
    pub fn begin_explicit(&mut self, store: &Store) -> Result<()> {
        if self.explicit.is_some() {
            return Err(MongoliteError::Transaction(
                "a transaction is already active".to_string(),
            ));
        }
        self.drop_pooled_read();
        let txn = begin_write_blocking(store)?;
        self.explicit = Some(txn);
        Ok(())
    }

    /// Commit the explicit transaction.
    pub fn commit_explicit(&mut self) -> Result<()> {
        let txn = self.explicit.take().ok_or_else(|| {
            MongoliteError::Transaction("no active transaction to commit".to_string())
        })?;
        txn.commit()?;
        Ok(())
    }

    /// Roll the explicit transaction back.
    pub fn rollback_explicit(&mut self) -> Result<()> {
        let txn = self.explicit.take().ok_or_else(|| {
            MongoliteError::Transaction("no active transaction to roll back".to_string())
        })?;
        txn.abort();
        Ok(())
    }

    /// Abort whatever is in flight (database close).
    pub fn shutdown(&mut self) {
        if let Some(txn) = self.explicit.take() {
            txn.abort();
        }
        self.drop_pooled_read();
    }

    /// Run a mutation under the write transaction.
    ///
    /// With an explicit transaction active the operation joins it and commit
    /// is suppressed; an error aborts the explicit transaction, since its
    /// buffered writes may be half applied.
    ///
    /// Otherwise an auto-commit transaction wraps the operation: commit on
    /// success, abort on failure, and a `MapFull` failure doubles the map and
    /// retries the operation exactly once.
    pub fn with_write<R, F>(&mut self, store: &Store, mut op: F) -> Result<R>
    where
        F: FnMut(&mut WriteTxn) -> Result<R>,
    {
        if let Some(txn) = self.explicit.as_mut() {
            return match op(txn) {
                Ok(value) => Ok(value),
                Err(e) => {
                    // The transaction's buffered state is unreliable now.
                    if let Some(broken) = self.explicit.take() {
                        broken.abort();
                    }
                    crate::logging::report(&e);
                    Err(e)
                }
            };
        }

        self.drop_pooled_read();
        let mut resized = false;
        loop {
            let mut txn = begin_write_blocking(store)?;
            match op(&mut txn) {
                Ok(value) => {
                    txn.commit()?;
                    return Ok(value);
                }
                Err(e) if is_map_full(&e) && !resized => {
                    txn.abort();
                    let new_size = store.map_size().saturating_mul(2);
                    log_debug!("map full, resizing to {} bytes and retrying", new_size);
                    store.resize(new_size)?;
                    resized = true;
                }
                Err(e) => {
                    txn.abort();
                    crate::logging::report(&e);
                    return Err(e);
                }
            }
        }
    }
}

impl Default for TxnRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn is_map_full(e: &MongoliteError) -> bool {
    matches!(e, MongoliteError::Backend(StoreError::MapFull))
}

/// Writes across handles to the same store serialize rather than fail: wait
/// for the other writer to finish. The per-handle mutex means a handle can
/// never be waiting on itself here.
fn begin_write_blocking(store: &Store) -> Result<WriteTxn> {
    loop {
        match store.begin_write() {
            Ok(txn) => return Ok(txn),
            Err(StoreError::Busy) => {
                std::thread::sleep(std::time::Duration::from_micros(100));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
