//! Typed local entities
//!
//! These are the records the mirror persists. Wire records arriving from the
//! remote ([`crate::remote::RemoteMessage`]) are decoded into them; decoding may
//! fail for individual records, which are then dropped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use postmirror_core::{MessageId, MessageIndex, MessageTags, PeerId, MESSAGE_NAMESPACE_CLOUD};

use crate::remote::RemoteMessage;

/// Kind of media attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// Photo
    Photo,
    /// Video
    Video,
    /// Generic document
    File,
    /// Audio track
    Audio,
    /// Voice note
    Voice,
    /// Link preview
    WebPage,
}

impl MediaKind {
    /// Filter tags implied by this media kind
    pub fn tags(self) -> MessageTags {
        match self {
            MediaKind::Photo | MediaKind::Video => MessageTags::PHOTO_OR_VIDEO,
            MediaKind::File => MessageTags::FILE,
            MediaKind::Audio => MessageTags::MUSIC,
            MediaKind::Voice => MessageTags::VOICE,
            MediaKind::WebPage => MessageTags::WEB_PAGE,
        }
    }
}

/// A message as stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMessage {
    /// Message identity
    pub id: MessageId,
    /// Send time, in remote seconds
    pub timestamp: i32,
    /// Sender, when known
    pub author_id: Option<PeerId>,
    /// Body text, or the action text of a service message
    pub text: String,
    /// Attached media
    pub media: Option<MediaKind>,
    /// Tags derived from `media`
    pub tags: MessageTags,
}

impl StoreMessage {
    /// Position of this message in the conversation list ordering
    pub fn index(&self) -> MessageIndex {
        MessageIndex::new(self.id, self.timestamp)
    }
}

/// Why a wire message could not be decoded
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Placeholder for a deleted or inaccessible message
    #[error("message {0} is empty")]
    EmptyMessage(i32),

    /// The message does not belong to a real peer
    #[error("message {id} has no peer")]
    MissingPeer {
        /// Wire id of the message
        id: i32,
    },

    /// Id outside the range the remote assigns
    #[error("message id {0} is out of range")]
    InvalidId(i32),
}

fn cloud_id(peer_id: PeerId, id: i32) -> Result<MessageId, DecodeError> {
    if peer_id.is_empty() {
        return Err(DecodeError::MissingPeer { id });
    }
    if id < MessageId::MIN_ID {
        return Err(DecodeError::InvalidId(id));
    }
    Ok(MessageId::new(peer_id, MESSAGE_NAMESPACE_CLOUD, id))
}

impl TryFrom<RemoteMessage> for StoreMessage {
    type Error = DecodeError;

    fn try_from(message: RemoteMessage) -> Result<Self, Self::Error> {
        match message {
            RemoteMessage::Empty { id } => Err(DecodeError::EmptyMessage(id)),
            RemoteMessage::Regular {
                id,
                peer_id,
                author_id,
                timestamp,
                text,
                media,
            } => Ok(StoreMessage {
                id: cloud_id(peer_id, id)?,
                timestamp,
                author_id,
                text,
                media,
                tags: media.map(MediaKind::tags).unwrap_or_default(),
            }),
            RemoteMessage::Service {
                id,
                peer_id,
                author_id,
                timestamp,
                action,
            } => Ok(StoreMessage {
                id: cloud_id(peer_id, id)?,
                timestamp,
                author_id,
                text: action,
                media: None,
                tags: MessageTags::NONE,
            }),
        }
    }
}

/// Kind-specific peer data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerKind {
    /// One-to-one conversation partner
    User {
        /// Given name
        first_name: String,
        /// Family name, possibly empty
        last_name: String,
        /// Public handle
        username: Option<String>,
    },
    /// Small group
    Group {
        /// Group title
        title: String,
        /// Member count at last sync
        participant_count: i32,
    },
    /// Broadcast channel
    Channel {
        /// Channel title
        title: String,
        /// Public handle
        username: Option<String>,
    },
}

/// A conversation partner record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Peer identity
    pub id: PeerId,
    /// Kind and kind-specific attributes
    pub kind: PeerKind,
    /// Remote revision of this record; higher is newer
    pub version: i32,
}

/// Read position of one peer namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerReadState {
    /// Highest incoming message id the local user has read
    pub max_incoming_read_id: i32,
    /// Highest outgoing message id the partner has read
    pub max_outgoing_read_id: i32,
    /// Highest message id known to exist
    pub max_known_id: i32,
    /// Unread incoming messages
    pub unread_count: i32,
}

/// Per-peer synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerChatState {
    /// Channel update sequence position
    Channel { pts: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmirror_core::PEER_NAMESPACE_CLOUD_USER;

    fn peer() -> PeerId {
        PeerId::new(PEER_NAMESPACE_CLOUD_USER, 3)
    }

    #[test]
    fn test_regular_message_decodes_with_tags() {
        let message = StoreMessage::try_from(RemoteMessage::Regular {
            id: 10,
            peer_id: peer(),
            author_id: Some(peer()),
            timestamp: 1000,
            text: "hi".to_string(),
            media: Some(MediaKind::Video),
        })
        .unwrap();
        assert_eq!(message.id, MessageId::new(peer(), MESSAGE_NAMESPACE_CLOUD, 10));
        assert_eq!(message.tags, MessageTags::PHOTO_OR_VIDEO);
        assert_eq!(message.index().timestamp, 1000);
    }

    #[test]
    fn test_service_message_decodes_untagged() {
        let message = StoreMessage::try_from(RemoteMessage::Service {
            id: 2,
            peer_id: peer(),
            author_id: None,
            timestamp: 5,
            action: "joined".to_string(),
        })
        .unwrap();
        assert_eq!(message.text, "joined");
        assert!(message.tags.is_empty());
    }

    #[test]
    fn test_empty_message_fails() {
        let err = StoreMessage::try_from(RemoteMessage::Empty { id: 4 }).unwrap_err();
        assert_eq!(err, DecodeError::EmptyMessage(4));
    }

    #[test]
    fn test_message_without_peer_fails() {
        let err = StoreMessage::try_from(RemoteMessage::Regular {
            id: 4,
            peer_id: PeerId::empty(),
            author_id: None,
            timestamp: 0,
            text: String::new(),
            media: None,
        })
        .unwrap_err();
        assert_eq!(err, DecodeError::MissingPeer { id: 4 });
    }

    #[test]
    fn test_non_positive_id_fails() {
        let err = StoreMessage::try_from(RemoteMessage::Regular {
            id: 0,
            peer_id: peer(),
            author_id: None,
            timestamp: 0,
            text: String::new(),
            media: None,
        })
        .unwrap_err();
        assert_eq!(err, DecodeError::InvalidId(0));
    }
}
