//! Domain identifiers for the mirrored log
//!
//! This module defines the identifiers every table is keyed by:
//! - PeerId: a conversation partner (user, group, channel)
//! - MessageId: a message inside one peer's history namespace
//! - MessageIndex: a message position in the global conversation list
//! - MessageTags: filter bits used to scope tagged holes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Peer namespace for cloud users
pub const PEER_NAMESPACE_CLOUD_USER: i32 = 0;
/// Peer namespace for cloud groups
pub const PEER_NAMESPACE_CLOUD_GROUP: i32 = 1;
/// Peer namespace for cloud channels
pub const PEER_NAMESPACE_CLOUD_CHANNEL: i32 = 2;
/// Placeholder namespace marking "no peer"
pub const PEER_NAMESPACE_EMPTY: i32 = i32::MAX;

/// Message namespace for messages that live on the remote
pub const MESSAGE_NAMESPACE_CLOUD: i32 = 0;

/// Identifier of a conversation partner
///
/// Packs into an `i64` as `namespace << 32 | id`; ordering follows the packed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    /// Peer namespace (user, group, channel, empty)
    pub namespace: i32,
    /// Identifier within the namespace
    pub id: i32,
}

impl PeerId {
    /// Peer in `namespace` with identifier `id`
    pub fn new(namespace: i32, id: i32) -> Self {
        Self { namespace, id }
    }

    /// The "no peer" placeholder
    pub fn empty() -> Self {
        Self::new(PEER_NAMESPACE_EMPTY, 0)
    }

    /// True for the "no peer" placeholder
    pub fn is_empty(&self) -> bool {
        self.namespace == PEER_NAMESPACE_EMPTY
    }

    /// Packed `namespace << 32 | id` form
    pub fn to_i64(self) -> i64 {
        ((self.namespace as i64) << 32) | (self.id as u32 as i64)
    }

    /// Inverse of [`to_i64`](Self::to_i64)
    pub fn from_i64(value: i64) -> Self {
        Self {
            namespace: (value >> 32) as i32,
            id: value as i32,
        }
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_i64().cmp(&other.to_i64())
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// Identifier of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    /// Conversation partner
    pub peer_id: PeerId,
    /// Message namespace within the conversation
    pub namespace: i32,
    /// Remote-assigned id, increasing within a namespace
    pub id: i32,
}

impl MessageId {
    /// Lowest id the remote ever assigns
    pub const MIN_ID: i32 = 1;
    /// Highest representable id; used as the open upper end of a history
    pub const MAX_ID: i32 = i32::MAX;

    /// Message `id` of `peer_id` in `namespace`
    pub fn new(peer_id: PeerId, namespace: i32, id: i32) -> Self {
        Self {
            peer_id,
            namespace,
            id,
        }
    }

    /// Same peer and namespace, different id
    pub fn with_id(self, id: i32) -> Self {
        Self { id, ..self }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.peer_id, self.namespace, self.id)
    }
}

/// Position of a message in the conversation list
///
/// Ordered by timestamp first, then by message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIndex {
    /// Message the index points at
    pub id: MessageId,
    /// Send time, in remote seconds
    pub timestamp: i32,
}

impl MessageIndex {
    /// Index of `id` sent at `timestamp`
    pub fn new(id: MessageId, timestamp: i32) -> Self {
        Self { id, timestamp }
    }

    /// Smallest representable index
    pub fn lower_bound() -> Self {
        Self {
            id: MessageId::new(PeerId::new(i32::MIN, 0), i32::MIN, i32::MIN),
            timestamp: i32::MIN,
        }
    }

    /// Largest index, in the empty peer namespace
    ///
    /// The initial conversation-list hole is bounded here; requests derived
    /// from it start at the top of the remote list.
    pub fn upper_bound() -> Self {
        Self {
            id: MessageId::new(PeerId::new(PEER_NAMESPACE_EMPTY, i32::MAX), i32::MAX, i32::MAX),
            timestamp: i32::MAX,
        }
    }
}

impl Ord for MessageIndex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.id.peer_id.cmp(&other.id.peer_id))
            .then(self.id.namespace.cmp(&other.id.namespace))
            .then(self.id.id.cmp(&other.id.id))
    }
}

impl PartialOrd for MessageIndex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Message filter bits
///
/// A tagged hole tracks a range that is incomplete only for messages carrying
/// the tag. The zero value means "untagged" and never names a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MessageTags(u32);

impl MessageTags {
    /// No tag; marks untagged holes and plain messages
    pub const NONE: MessageTags = MessageTags(0);
    /// Photos and videos
    pub const PHOTO_OR_VIDEO: MessageTags = MessageTags(1 << 0);
    /// Documents
    pub const FILE: MessageTags = MessageTags(1 << 1);
    /// Audio tracks
    pub const MUSIC: MessageTags = MessageTags(1 << 2);
    /// Messages with a link preview
    pub const WEB_PAGE: MessageTags = MessageTags(1 << 3);
    /// Voice notes
    pub const VOICE: MessageTags = MessageTags(1 << 4);

    /// Every defined single-bit tag
    pub const ALL: [MessageTags; 5] = [
        Self::PHOTO_OR_VIDEO,
        Self::FILE,
        Self::MUSIC,
        Self::WEB_PAGE,
        Self::VOICE,
    ];

    /// Tags from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when no tag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set
    pub const fn contains(self, other: MessageTags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Single-bit tags set in this mask
    pub fn iter(self) -> impl Iterator<Item = MessageTags> {
        Self::ALL.into_iter().filter(move |tag| self.contains(*tag))
    }
}

impl std::ops::BitOr for MessageTags {
    type Output = MessageTags;

    fn bitor(self, rhs: Self) -> Self::Output {
        MessageTags(self.0 | rhs.0)
    }
}
