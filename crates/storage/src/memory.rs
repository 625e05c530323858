//! MemoryStore: ordered in-memory store with atomic transactions
//!
//! This module implements the Store trait using:
//! - `BTreeMap<OrderedKey, Vec<u8>>` for ordered key storage
//! - `parking_lot::RwLock` for single-writer / many-reader access
//! - `AtomicU64` counting committed transactions
//!
//! # Design Notes
//!
//! - **Single writer**: a transaction holds the write lock for the whole body,
//!   so two transactions never interleave
//! - **Buffered writes**: the body writes into an overlay; the base map is only
//!   touched after the body returns `Ok`
//! - **No poisoning**: a panicking body drops its overlay and releases the lock

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};

use postmirror_core::{Entry, OrderedKey, ReadView, Result, Store, Transaction};

use crate::transaction::{merged_range, MemoryTransaction, WriteSet};

/// In-memory ordered store
///
/// Thread-safe through `parking_lot::RwLock`. Readers outside a transaction
/// see only committed state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Committed data, ordered by the key comparator
    data: RwLock<BTreeMap<OrderedKey, Vec<u8>>>,
    /// Number of committed transactions
    commits: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when the store holds no records
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of transactions committed so far
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Copy of every committed entry in key order
    pub fn dump(&self) -> Vec<Entry> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn apply(data: &mut BTreeMap<OrderedKey, Vec<u8>>, writes: WriteSet) {
        for (key, staged) in writes {
            match staged {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
    }
}

impl ReadView for MemoryStore {
    fn get(&self, key: &OrderedKey) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn range(
        &self,
        from: &OrderedKey,
        to: &OrderedKey,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<Entry>> {
        let data = self.data.read();
        Ok(merged_range(&data, &WriteSet::new(), from, to, limit, reverse))
    }
}

impl Store for MemoryStore {
    fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>,
    {
        let mut data = self.data.write();

        let (result, writes) = {
            let mut txn = MemoryTransaction::new(&data);
            let result = body(&mut txn);
            (result, txn.into_writes())
        };

        match result {
            Ok(value) => {
                let count = writes.len();
                Self::apply(&mut data, writes);
                let commit = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(target: "postmirror::store", commit, writes = count, "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                trace!(target: "postmirror::store", error = %e, discarded = writes.len(), "Transaction rolled back");
                Err(e)
            }
        }
    }
}
