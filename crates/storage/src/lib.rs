//! Storage layer for postmirror
//!
//! This crate implements the reference ordered store:
//! - MemoryStore: BTreeMap-based storage behind a `parking_lot::RwLock`
//! - MemoryTransaction: buffered writes with read-your-writes, applied
//!   atomically on commit
//!
//! Ordering is the `OrderedKey` comparator, so range scans behave exactly like
//! the on-disk engine the mirror is designed for.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod transaction;

pub use memory::MemoryStore;
pub use transaction::MemoryTransaction;
