//! Core types and traits for postmirror
//!
//! This crate defines the foundational types used throughout the system:
//! - OrderedKey / KeyBuilder: ordered binary keys and their codec
//! - keyspace: the persisted key layout of every table
//! - PeerId, MessageId, MessageIndex, MessageTags: domain identifiers
//! - Hole, HoleScope, FillDirection, FillResult: the hole model
//! - Error: Error type hierarchy
//! - Traits: Store, ReadView and Transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hole;
pub mod key;
pub mod keyspace;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use hole::{FillDirection, FillResult, Hole, HoleScope, HoleUpdate};
pub use key::{compare_keys, key_hash, KeyBuilder, OrderedKey};
pub use traits::{Entry, ReadView, Store, Transaction};
pub use types::{
    MessageId, MessageIndex, MessageTags, PeerId, MESSAGE_NAMESPACE_CLOUD,
    PEER_NAMESPACE_CLOUD_CHANNEL, PEER_NAMESPACE_CLOUD_GROUP, PEER_NAMESPACE_CLOUD_USER,
    PEER_NAMESPACE_EMPTY,
};
