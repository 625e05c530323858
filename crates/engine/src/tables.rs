//! Typed tables over the ordered store
//!
//! Each table is a zero-sized accessor translating between entities and the
//! raw keys of [`postmirror_core::keyspace`]. Readers accept any
//! [`ReadView`] (a store or an open transaction); writers need a
//! [`Transaction`].
//!
//! Values are MessagePack via `rmp-serde`. A value that fails to decode is
//! reported as `Corruption` at its key.

use serde::de::DeserializeOwned;
use serde::Serialize;

use postmirror_core::keyspace;
use postmirror_core::{
    Error, MessageId, MessageIndex, MessageTags, OrderedKey, PeerId, ReadView, Result, Transaction,
};

use crate::entities::{Peer, PeerChatState, PeerReadState, StoreMessage};

pub(crate) fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub(crate) fn decode_record<T: DeserializeOwned>(key: &OrderedKey, bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::corruption(key, e.to_string()))
}

fn get_record<T, V>(view: &V, key: &OrderedKey) -> Result<Option<T>>
where
    T: DeserializeOwned,
    V: ReadView + ?Sized,
{
    match view.get(key)? {
        Some(bytes) => decode_record(key, &bytes).map(Some),
        None => Ok(None),
    }
}

/// Exclusive end for a scan that includes `key`
fn end_after(key: &OrderedKey) -> Result<OrderedKey> {
    key.successor().ok_or_else(|| {
        Error::InvariantViolation(format!("key {} has no successor", key))
    })
}

/// Exclusive end for a scan over every key under `prefix`
fn end_of_prefix(prefix: &OrderedKey) -> Result<OrderedKey> {
    prefix.prefix_end().ok_or_else(|| {
        Error::InvariantViolation(format!("prefix {} has no upper bound", prefix))
    })
}

// ============================================================================
// Messages
// ============================================================================

/// Messages keyed by `(peer, namespace, id)`, plus their tag index
pub struct MessageTable;

impl MessageTable {
    /// Message by id
    pub fn get<V: ReadView + ?Sized>(view: &V, id: MessageId) -> Result<Option<StoreMessage>> {
        get_record(view, &keyspace::message_key(id))
    }

    /// Messages with ids in `[lower_id, upper_id]` of one peer namespace
    pub fn range<V: ReadView + ?Sized>(
        view: &V,
        peer_id: PeerId,
        namespace: i32,
        lower_id: i32,
        upper_id: i32,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<StoreMessage>> {
        let base = MessageId::new(peer_id, namespace, 0);
        let from = keyspace::message_key(base.with_id(lower_id));
        let to = end_after(&keyspace::message_key(base.with_id(upper_id)))?;
        view.range(&from, &to, limit, reverse)?
            .into_iter()
            .map(|(key, bytes)| decode_record(&key, &bytes))
            .collect()
    }

    /// Insert or overwrite a message, keeping the tag index in step
    pub fn upsert<T: Transaction + ?Sized>(txn: &mut T, message: &StoreMessage) -> Result<()> {
        let key = keyspace::message_key(message.id);
        if let Some(previous) = get_record::<StoreMessage, _>(&*txn, &key)? {
            for tag in previous.tags.iter() {
                txn.delete(&keyspace::tag_index_key(message.id, tag));
            }
        }
        txn.put(key, encode_record(message)?);
        for tag in message.tags.iter() {
            txn.put(keyspace::tag_index_key(message.id, tag), Vec::new());
        }
        Ok(())
    }
}

/// Message ids carrying a given tag
pub struct TagIndex;

impl TagIndex {
    /// Ids of tagged messages in one peer namespace, ascending
    pub fn ids<V: ReadView + ?Sized>(
        view: &V,
        peer_id: PeerId,
        namespace: i32,
        tag: MessageTags,
        limit: Option<usize>,
    ) -> Result<Vec<MessageId>> {
        let prefix = keyspace::tag_index_prefix(peer_id, namespace, tag);
        let end = end_of_prefix(&prefix)?;
        view.range(&prefix, &end, limit, false)?
            .into_iter()
            .map(|(key, _)| {
                key.read_i32(prefix.len())
                    .map(|id| MessageId::new(peer_id, namespace, id))
                    .ok_or_else(|| Error::corruption(&key, "truncated tag index key"))
            })
            .collect()
    }
}

// ============================================================================
// Peers and per-peer state
// ============================================================================

/// Peer records keyed by peer id
pub struct PeerTable;

impl PeerTable {
    /// Peer by id
    pub fn get<V: ReadView + ?Sized>(view: &V, peer_id: PeerId) -> Result<Option<Peer>> {
        get_record(view, &keyspace::peer_key(peer_id))
    }

    /// Insert or overwrite a peer
    pub fn put<T: Transaction + ?Sized>(txn: &mut T, peer: &Peer) -> Result<()> {
        txn.put(keyspace::peer_key(peer.id), encode_record(peer)?);
        Ok(())
    }
}

/// Read state per peer namespace
pub struct ReadStateTable;

impl ReadStateTable {
    /// Read state of one peer namespace
    pub fn get<V: ReadView + ?Sized>(
        view: &V,
        peer_id: PeerId,
        namespace: i32,
    ) -> Result<Option<PeerReadState>> {
        get_record(view, &keyspace::read_state_key(peer_id, namespace))
    }

    /// Insert or overwrite a read state
    pub fn put<T: Transaction + ?Sized>(
        txn: &mut T,
        peer_id: PeerId,
        namespace: i32,
        state: &PeerReadState,
    ) -> Result<()> {
        txn.put(
            keyspace::read_state_key(peer_id, namespace),
            encode_record(state)?,
        );
        Ok(())
    }
}

/// Sync state per peer
pub struct ChatStateTable;

impl ChatStateTable {
    /// Chat state of one peer
    pub fn get<V: ReadView + ?Sized>(view: &V, peer_id: PeerId) -> Result<Option<PeerChatState>> {
        get_record(view, &keyspace::chat_state_key(peer_id))
    }

    /// Insert or overwrite a chat state
    pub fn put<T: Transaction + ?Sized>(
        txn: &mut T,
        peer_id: PeerId,
        state: &PeerChatState,
    ) -> Result<()> {
        txn.put(keyspace::chat_state_key(peer_id), encode_record(state)?);
        Ok(())
    }
}

// ============================================================================
// Conversation list
// ============================================================================

/// Global conversation list ordered by top-message index
///
/// Each peer appears at most once; its current index is tracked in the
/// position table so a newer top message moves the entry instead of
/// duplicating it.
pub struct ChatListTable;

impl ChatListTable {
    /// Newest entries first
    pub fn entries<V: ReadView + ?Sized>(view: &V, limit: Option<usize>) -> Result<Vec<MessageIndex>> {
        let prefix = keyspace::chat_list_prefix();
        let end = end_of_prefix(&prefix)?;
        view.range(&prefix, &end, limit, true)?
            .into_iter()
            .map(|(key, _)| {
                keyspace::chat_list_index_from_key(&key)
                    .ok_or_else(|| Error::corruption(&key, "malformed chat list key"))
            })
            .collect()
    }

    /// Current list position of a peer
    pub fn position<V: ReadView + ?Sized>(view: &V, peer_id: PeerId) -> Result<Option<MessageIndex>> {
        get_record(view, &keyspace::chat_list_position_key(peer_id))
    }

    /// Place a peer at `index` unless it already sits at a newer one
    ///
    /// Returns whether the list changed.
    pub fn update_position<T: Transaction + ?Sized>(txn: &mut T, index: MessageIndex) -> Result<bool> {
        let peer_id = index.id.peer_id;
        if let Some(current) = Self::position(&*txn, peer_id)? {
            if current >= index {
                return Ok(false);
            }
            txn.delete(&keyspace::chat_list_key(current));
        }
        txn.put(keyspace::chat_list_key(index), Vec::new());
        txn.put(
            keyspace::chat_list_position_key(peer_id),
            encode_record(&index)?,
        );
        Ok(true)
    }
}

/// Records which peer namespaces (and whether the conversation list) have
/// been materialized
pub struct HistoryMarkers;

impl HistoryMarkers {
    /// True once the namespace's holes were created
    pub fn is_materialized<V: ReadView + ?Sized>(view: &V, peer_id: PeerId, namespace: i32) -> Result<bool> {
        Ok(view
            .get(&keyspace::history_marker_key(peer_id, namespace))?
            .is_some())
    }

    /// Record that the namespace's holes exist
    pub fn mark<T: Transaction + ?Sized>(txn: &mut T, peer_id: PeerId, namespace: i32) {
        txn.put(keyspace::history_marker_key(peer_id, namespace), Vec::new());
    }

    /// True once the conversation-list hole was created
    pub fn is_chat_list_materialized<V: ReadView + ?Sized>(view: &V) -> Result<bool> {
        Ok(view.get(&keyspace::chat_list_marker_key())?.is_some())
    }

    /// Record that the conversation-list hole exists
    pub fn mark_chat_list<T: Transaction + ?Sized>(txn: &mut T) {
        txn.put(keyspace::chat_list_marker_key(), Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{MediaKind, PeerKind};
    use postmirror_core::{Store, MESSAGE_NAMESPACE_CLOUD, PEER_NAMESPACE_CLOUD_USER};
    use postmirror_storage::MemoryStore;

    fn peer(id: i32) -> PeerId {
        PeerId::new(PEER_NAMESPACE_CLOUD_USER, id)
    }

    fn message(peer_id: PeerId, id: i32, media: Option<MediaKind>) -> StoreMessage {
        StoreMessage {
            id: MessageId::new(peer_id, MESSAGE_NAMESPACE_CLOUD, id),
            timestamp: id * 10,
            author_id: None,
            text: format!("m{}", id),
            media,
            tags: media.map(MediaKind::tags).unwrap_or_default(),
        }
    }

    #[test]
    fn test_message_upsert_and_range() {
        let store = MemoryStore::new();
        store
            .transaction(|txn| {
                for id in 1..=10 {
                    MessageTable::upsert(txn, &message(peer(1), id, None))?;
                }
                MessageTable::upsert(txn, &message(peer(2), 5, None))
            })
            .unwrap();

        let got = MessageTable::get(&store, MessageId::new(peer(1), 0, 4))
            .unwrap()
            .unwrap();
        assert_eq!(got.text, "m4");

        let ids: Vec<i32> = MessageTable::range(&store, peer(1), 0, 3, 6, None, false)
            .unwrap()
            .iter()
            .map(|m| m.id.id)
            .collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);

        let newest = MessageTable::range(&store, peer(1), 0, 1, MessageId::MAX_ID, Some(2), true)
            .unwrap();
        assert_eq!(newest.iter().map(|m| m.id.id).collect::<Vec<_>>(), vec![10, 9]);
    }

    #[test]
    fn test_tag_index_follows_upserts() {
        let store = MemoryStore::new();
        store
            .transaction(|txn| {
                MessageTable::upsert(txn, &message(peer(1), 1, Some(MediaKind::Photo)))?;
                MessageTable::upsert(txn, &message(peer(1), 2, Some(MediaKind::Voice)))?;
                MessageTable::upsert(txn, &message(peer(1), 3, Some(MediaKind::Photo)))
            })
            .unwrap();
        let photos = TagIndex::ids(&store, peer(1), 0, MessageTags::PHOTO_OR_VIDEO, None).unwrap();
        assert_eq!(photos.iter().map(|id| id.id).collect::<Vec<_>>(), vec![1, 3]);

        // Re-tagging moves the index entry
        store
            .transaction(|txn| MessageTable::upsert(txn, &message(peer(1), 3, Some(MediaKind::File))))
            .unwrap();
        let photos = TagIndex::ids(&store, peer(1), 0, MessageTags::PHOTO_OR_VIDEO, None).unwrap();
        assert_eq!(photos.len(), 1);
        let files = TagIndex::ids(&store, peer(1), 0, MessageTags::FILE, None).unwrap();
        assert_eq!(files, vec![MessageId::new(peer(1), 0, 3)]);
    }

    #[test]
    fn test_peer_and_state_tables() {
        let store = MemoryStore::new();
        let alice = Peer {
            id: peer(7),
            kind: PeerKind::User {
                first_name: "Alice".into(),
                last_name: String::new(),
                username: None,
            },
            version: 1,
        };
        let read = PeerReadState {
            max_incoming_read_id: 5,
            max_outgoing_read_id: 4,
            max_known_id: 9,
            unread_count: 4,
        };
        store
            .transaction(|txn| {
                PeerTable::put(txn, &alice)?;
                ReadStateTable::put(txn, alice.id, 0, &read)?;
                ChatStateTable::put(txn, alice.id, &PeerChatState::Channel { pts: 42 })
            })
            .unwrap();
        assert_eq!(PeerTable::get(&store, alice.id).unwrap(), Some(alice.clone()));
        assert_eq!(ReadStateTable::get(&store, alice.id, 0).unwrap(), Some(read));
        assert_eq!(
            ChatStateTable::get(&store, alice.id).unwrap(),
            Some(PeerChatState::Channel { pts: 42 })
        );
        assert_eq!(PeerTable::get(&store, peer(8)).unwrap(), None);
    }

    #[test]
    fn test_chat_list_position_moves_forward_only() {
        let store = MemoryStore::new();
        let older = message(peer(1), 3, None).index();
        let newer = message(peer(1), 8, None).index();
        let other = message(peer(2), 5, None).index();
        store
            .transaction(|txn| {
                assert!(ChatListTable::update_position(txn, older)?);
                assert!(ChatListTable::update_position(txn, other)?);
                assert!(ChatListTable::update_position(txn, newer)?);
                assert!(!ChatListTable::update_position(txn, older)?);
                Ok(())
            })
            .unwrap();
        assert_eq!(ChatListTable::entries(&store, None).unwrap(), vec![newer, other]);
        assert_eq!(ChatListTable::position(&store, peer(1)).unwrap(), Some(newer));
    }

    #[test]
    fn test_corrupt_record_reports_key() {
        let store = MemoryStore::new();
        let key = keyspace::peer_key(peer(1));
        store
            .transaction(|txn| {
                txn.put(key.clone(), vec![0xC1]);
                Ok(())
            })
            .unwrap();
        match PeerTable::get(&store, peer(1)) {
            Err(Error::Corruption { key: at, .. }) => assert_eq!(at, key),
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_history_markers() {
        let store = MemoryStore::new();
        assert!(!HistoryMarkers::is_materialized(&store, peer(1), 0).unwrap());
        store
            .transaction(|txn| {
                HistoryMarkers::mark(txn, peer(1), 0);
                Ok(())
            })
            .unwrap();
        assert!(HistoryMarkers::is_materialized(&store, peer(1), 0).unwrap());
        assert!(!HistoryMarkers::is_materialized(&store, peer(1), 1).unwrap());
        assert!(!HistoryMarkers::is_chat_list_materialized(&store).unwrap());
    }
}
