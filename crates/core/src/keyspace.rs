//! Persisted key layout
//!
//! Every key written to the store is built here on top of [`OrderedKey`].
//! The first byte selects a table; the table tags are part of the on-disk
//! format and MUST NOT change:
//!
//! | table | tag | layout after the tag |
//! |---|---|---|
//! | messages | 0x01 | peer(i64) namespace(i32) id(i32) |
//! | tag index | 0x02 | peer(i64) namespace(i32) tag(u32) id(i32) |
//! | peers | 0x03 | peer(i64) |
//! | read states | 0x04 | peer(i64) namespace(i32) |
//! | chat states | 0x05 | peer(i64) |
//! | chat list | 0x06 | timestamp(i32) peer(i64) namespace(i32) id(i32) |
//! | chat list position | 0x07 | peer(i64) |
//! | history marker | 0x08 | peer(i64) namespace(i32) |
//! | chat list marker | 0x08 | (nothing) |
//! | holes | 0x10 | scope tag(u32) max-key |
//!
//! Hole records live in their own sub-space so a hole scan can never see an
//! entity and vice versa.

use crate::hole::HoleScope;
use crate::key::{KeyBuilder, OrderedKey};
use crate::types::{MessageId, MessageIndex, MessageTags, PeerId};

/// Table tag: messages
pub const TABLE_MESSAGES: u8 = 0x01;
/// Table tag: per-tag message index
pub const TABLE_TAG_INDEX: u8 = 0x02;
/// Table tag: peers
pub const TABLE_PEERS: u8 = 0x03;
/// Table tag: read states
pub const TABLE_READ_STATES: u8 = 0x04;
/// Table tag: per-peer chat states
pub const TABLE_CHAT_STATES: u8 = 0x05;
/// Table tag: global conversation list
pub const TABLE_CHAT_LIST: u8 = 0x06;
/// Table tag: current conversation-list index of a peer
pub const TABLE_CHAT_LIST_POSITION: u8 = 0x07;
/// Table tag: history materialization markers
pub const TABLE_HISTORY_MARKERS: u8 = 0x08;
/// Table tag: hole records
pub const TABLE_HOLES: u8 = 0x10;

const SCOPE_HISTORY: u8 = 0x00;
const SCOPE_CHAT_LIST: u8 = 0x01;

/// Length of a message key
pub const MESSAGE_KEY_LEN: usize = 1 + 8 + 4 + 4;
/// Length of a conversation-list key
pub const CHAT_LIST_KEY_LEN: usize = 1 + 4 + 8 + 4 + 4;

fn table(tag: u8) -> KeyBuilder {
    OrderedKey::builder().u8(tag)
}

// ============================================================================
// Messages
// ============================================================================

/// Prefix of every message key in one peer namespace
pub fn history_prefix(peer_id: PeerId, namespace: i32) -> OrderedKey {
    table(TABLE_MESSAGES)
        .i64(peer_id.to_i64())
        .i32(namespace)
        .finish()
}

/// Key of one stored message
pub fn message_key(id: MessageId) -> OrderedKey {
    table(TABLE_MESSAGES)
        .i64(id.peer_id.to_i64())
        .i32(id.namespace)
        .i32(id.id)
        .finish()
}

/// Decode a key produced by [`message_key`]
pub fn message_id_from_key(key: &OrderedKey) -> Option<MessageId> {
    if key.len() != MESSAGE_KEY_LEN || key.read_u8(0)? != TABLE_MESSAGES {
        return None;
    }
    Some(MessageId::new(
        PeerId::from_i64(key.read_i64(1)?),
        key.read_i32(9)?,
        key.read_i32(13)?,
    ))
}

/// Prefix of the tag index for one tag in one peer namespace
pub fn tag_index_prefix(peer_id: PeerId, namespace: i32, tag: MessageTags) -> OrderedKey {
    table(TABLE_TAG_INDEX)
        .i64(peer_id.to_i64())
        .i32(namespace)
        .u32(tag.bits())
        .finish()
}

/// Tag index entry for one message
pub fn tag_index_key(id: MessageId, tag: MessageTags) -> OrderedKey {
    OrderedKey::builder()
        .key(&tag_index_prefix(id.peer_id, id.namespace, tag))
        .i32(id.id)
        .finish()
}

// ============================================================================
// Auxiliary records
// ============================================================================

/// Key of a peer record
pub fn peer_key(peer_id: PeerId) -> OrderedKey {
    table(TABLE_PEERS).i64(peer_id.to_i64()).finish()
}

/// Key of a peer namespace's read state
pub fn read_state_key(peer_id: PeerId, namespace: i32) -> OrderedKey {
    table(TABLE_READ_STATES)
        .i64(peer_id.to_i64())
        .i32(namespace)
        .finish()
}

/// Key of a peer's chat state
pub fn chat_state_key(peer_id: PeerId) -> OrderedKey {
    table(TABLE_CHAT_STATES).i64(peer_id.to_i64()).finish()
}

/// Marker recording that a peer namespace's holes exist
pub fn history_marker_key(peer_id: PeerId, namespace: i32) -> OrderedKey {
    table(TABLE_HISTORY_MARKERS)
        .i64(peer_id.to_i64())
        .i32(namespace)
        .finish()
}

/// Marks the conversation list as materialized
pub fn chat_list_marker_key() -> OrderedKey {
    table(TABLE_HISTORY_MARKERS).finish()
}

// ============================================================================
// Conversation list
// ============================================================================

/// Prefix of every conversation-list key
pub fn chat_list_prefix() -> OrderedKey {
    table(TABLE_CHAT_LIST).finish()
}

/// Conversation-list entry; sorts by timestamp, then message id
pub fn chat_list_key(index: MessageIndex) -> OrderedKey {
    table(TABLE_CHAT_LIST)
        .i32(index.timestamp)
        .i64(index.id.peer_id.to_i64())
        .i32(index.id.namespace)
        .i32(index.id.id)
        .finish()
}

/// Decode a key produced by [`chat_list_key`]
pub fn chat_list_index_from_key(key: &OrderedKey) -> Option<MessageIndex> {
    if key.len() != CHAT_LIST_KEY_LEN || key.read_u8(0)? != TABLE_CHAT_LIST {
        return None;
    }
    let timestamp = key.read_i32(1)?;
    let peer_id = PeerId::from_i64(key.read_i64(5)?);
    let id = MessageId::new(peer_id, key.read_i32(13)?, key.read_i32(17)?);
    Some(MessageIndex::new(id, timestamp))
}

/// Current list position of one peer
pub fn chat_list_position_key(peer_id: PeerId) -> OrderedKey {
    table(TABLE_CHAT_LIST_POSITION)
        .i64(peer_id.to_i64())
        .finish()
}

// ============================================================================
// Holes
// ============================================================================

/// Prefix of every hole record for `(scope, tag)`
///
/// Untagged holes use tag bits `0`.
pub fn hole_prefix(scope: &HoleScope, tag: Option<MessageTags>) -> OrderedKey {
    let builder = match scope {
        HoleScope::History {
            peer_id,
            namespace,
        } => table(TABLE_HOLES)
            .u8(SCOPE_HISTORY)
            .i64(peer_id.to_i64())
            .i32(*namespace),
        HoleScope::ChatList => table(TABLE_HOLES).u8(SCOPE_CHAT_LIST),
    };
    builder
        .u32(tag.map(MessageTags::bits).unwrap_or(0))
        .finish()
}

/// Hole record key: the `(scope, tag)` prefix followed by the hole's max key
///
/// Keying holes by their upper bound lets a forward scan starting at a point
/// find the only hole that can contain it.
pub fn hole_key(scope: &HoleScope, tag: Option<MessageTags>, max: &OrderedKey) -> OrderedKey {
    OrderedKey::builder()
        .key(&hole_prefix(scope, tag))
        .key(max)
        .finish()
}

/// Strip the `(scope, tag)` prefix from a hole record key
pub fn hole_max_from_key(prefix: &OrderedKey, key: &OrderedKey) -> Option<OrderedKey> {
    if !prefix.is_prefix_of(key) {
        return None;
    }
    Some(OrderedKey::from_slice(&key.as_bytes()[prefix.len()..]))
}
