//! Core traits for storage abstraction
//!
//! This module defines the Store, ReadView and Transaction traits that the
//! hole registry and the backfill engine are written against. Any ordered
//! byte-key store whose native ordering matches [`crate::key::compare_keys`]
//! can sit behind them.

use crate::error::Result;
use crate::key::OrderedKey;

/// A stored key/value pair
pub type Entry = (OrderedKey, Vec<u8>);

/// Ordered read access
pub trait ReadView {
    /// Get the value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(&self, key: &OrderedKey) -> Result<Option<Vec<u8>>>;

    /// Scan the half-open interval `[from, to)` in key order
    ///
    /// With `reverse` the same interval is returned in descending order,
    /// starting just below `to`. At most `limit` entries are returned when a
    /// limit is given. An empty interval (`from >= to`) yields nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn range(
        &self,
        from: &OrderedKey,
        to: &OrderedKey,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<Entry>>;
}

/// Exclusive write access inside one atomic transaction
///
/// Reads observe the transaction's own writes.
pub trait Transaction: ReadView {
    /// Insert or overwrite `key`
    fn put(&mut self, key: OrderedKey, value: Vec<u8>);

    /// Remove `key` if present
    fn delete(&mut self, key: &OrderedKey);
}

/// Ordered byte-key store with atomic multi-key transactions
///
/// Thread safety: implementations must be safe to share between threads.
pub trait Store: ReadView + Send + Sync {
    /// Run `body` with exclusive write access
    ///
    /// All writes made by `body` become visible together when it returns
    /// `Ok`. If it returns `Err` (or panics) none of them are applied.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `body`, or a storage error.
    fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T>;
}
