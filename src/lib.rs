//! postmirror - local mirror of a remote, append-mostly message log
//!
//! postmirror keeps a partial copy of a remote log (per-conversation message
//! history plus a global conversation list) in an ordered key-value store,
//! records which key ranges are known to be missing ("holes"), and closes
//! them page by page from a remote source.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use postmirror::{BackfillConfig, BackfillEngine, FillDirection, HoleScope, MemoryStore};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = BackfillEngine::new(Arc::new(MemoryStore::new()), remote, BackfillConfig::default())?;
//! engine.materialize_history(peer_id, 0)?;
//!
//! let scope = HoleScope::History { peer_id, namespace: 0 };
//! while let Some(hole) = engine.holes(&scope, None)?.pop() {
//!     engine.fill_history_hole(&hole, FillDirection::UpperToLower, &CancellationToken::new()).await?;
//! }
//! ```
//!
//! # Architecture
//!
//! - `postmirror-core`: ordered keys, key layout, hole model, store traits
//! - `postmirror-storage`: the in-memory reference store
//! - `postmirror-engine`: hole registry, remote contract, backfill engine

pub use postmirror_core::keyspace;
pub use postmirror_core::{
    compare_keys, key_hash, Entry, Error, FillDirection, FillResult, Hole, HoleScope, HoleUpdate,
    KeyBuilder, MessageId, MessageIndex, MessageTags, OrderedKey, PeerId, ReadView, Result, Store,
    Transaction, MESSAGE_NAMESPACE_CLOUD, PEER_NAMESPACE_CLOUD_CHANNEL, PEER_NAMESPACE_CLOUD_GROUP,
    PEER_NAMESPACE_CLOUD_USER, PEER_NAMESPACE_EMPTY,
};
pub use postmirror_engine::*;
pub use postmirror_storage::{MemoryStore, MemoryTransaction};
