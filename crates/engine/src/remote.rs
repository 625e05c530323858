//! Remote collaborator contract
//!
//! The engine never talks to the network itself. A [`RemoteSource`] serves
//! paginated history and conversation-list pages; the engine only derives the
//! requests and merges the responses.
//!
//! ## Paging contract
//!
//! A history request asks for up to `page_size` messages of one peer
//! namespace. The remote walks its log downward from `offset_id` (exclusive),
//! first skipping `add_offset` positions; a negative `add_offset` moves the
//! window upward past the offset. `lower`/`upper` bound the window
//! (inclusive) and are advisory: the engine clips the response regardless.

use async_trait::async_trait;
use thiserror::Error;

use postmirror_core::{FillDirection, MessageId, MessageIndex, MessageTags, PeerId};

use crate::entities::{MediaKind, Peer};

/// A message as the remote sends it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMessage {
    /// Deleted or inaccessible message
    Empty {
        /// Wire id
        id: i32,
    },
    /// Plain message
    Regular {
        /// Wire id
        id: i32,
        /// Conversation the message belongs to
        peer_id: PeerId,
        /// Sender, when known
        author_id: Option<PeerId>,
        /// Send time, in remote seconds
        timestamp: i32,
        /// Body text
        text: String,
        /// Attached media
        media: Option<MediaKind>,
    },
    /// Service message, such as a pin or a title change
    Service {
        /// Wire id
        id: i32,
        /// Conversation the message belongs to
        peer_id: PeerId,
        /// Initiator, when known
        author_id: Option<PeerId>,
        /// Send time, in remote seconds
        timestamp: i32,
        /// Human-readable action
        action: String,
    },
}

/// One page request against a peer's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Conversation partner
    pub peer_id: PeerId,
    /// Message namespace within the conversation
    pub namespace: i32,
    /// Direction of the fill step that built this request
    pub direction: FillDirection,
    /// Paging anchor id; the remote returns ids below it after applying `add_offset`
    pub offset_id: i32,
    /// Positions to skip past `offset_id`; negative moves the window upward
    pub add_offset: i32,
    /// Maximum number of messages to return
    pub page_size: usize,
    /// Lowest id of interest
    pub lower: MessageId,
    /// Highest id of interest
    pub upper: MessageId,
    /// Restrict to messages carrying this tag
    pub tag: Option<MessageTags>,
}

/// Response to a [`HistoryRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    /// Messages, newest first
    pub messages: Vec<RemoteMessage>,
    /// Peers referenced by the messages
    pub peers: Vec<Peer>,
}

/// One page request against the conversation list
///
/// The remote returns conversations whose top message ranks strictly below
/// the offset, newest first. A zero offset with no peer starts at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatListRequest {
    /// Timestamp of the offset conversation's top message
    pub offset_timestamp: i32,
    /// Id of the offset conversation's top message
    pub offset_id: i32,
    /// Offset conversation; `None` starts at the top of the list
    pub offset_peer: Option<PeerId>,
    /// Maximum number of conversations to return
    pub page_size: usize,
}

/// One conversation in a list page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDialog {
    /// Conversation partner
    pub peer_id: PeerId,
    /// Id of the newest message in the conversation
    pub top_message: i32,
    /// Highest incoming id read locally
    pub read_inbox_max_id: i32,
    /// Highest outgoing id read by the partner
    pub read_outbox_max_id: i32,
    /// Unread incoming messages
    pub unread_count: i32,
    /// Update sequence position, for channels only
    pub channel_pts: Option<i32>,
}

/// Response to a [`ChatListRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatListPage {
    /// Conversations, newest first
    pub dialogs: Vec<RemoteDialog>,
    /// Top messages of the dialogs (and possibly others)
    pub messages: Vec<RemoteMessage>,
    /// Peers referenced by dialogs and messages
    pub peers: Vec<Peer>,
    /// Where the remote suggests the next page should start
    pub next_offset_hint: Option<MessageIndex>,
}

/// Failure reported by a remote source
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection-level failure; worth retrying
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote asked us to slow down
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Minimum wait the remote asked for
        retry_after_ms: u64,
    },

    /// The remote refused the request; retrying will not help
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Retries were exhausted
    #[error("gave up after {attempts} attempts: {last}")]
    GaveUp {
        /// Calls made, including the first
        attempts: u32,
        /// Rendering of the last transient error
        last: String,
    },
}

impl RemoteError {
    /// Whether the same request may succeed if repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Transport(_) | RemoteError::RateLimited { .. }
        )
    }
}

/// Paginated access to the remote log
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch one page of a peer's history
    async fn fetch_history(&self, request: &HistoryRequest) -> Result<HistoryPage, RemoteError>;

    /// Fetch one page of the conversation list
    async fn fetch_list_page(&self, request: &ChatListRequest)
        -> Result<ChatListPage, RemoteError>;
}

#[async_trait]
impl<R: RemoteSource + ?Sized> RemoteSource for std::sync::Arc<R> {
    async fn fetch_history(&self, request: &HistoryRequest) -> Result<HistoryPage, RemoteError> {
        (**self).fetch_history(request).await
    }

    async fn fetch_list_page(
        &self,
        request: &ChatListRequest,
    ) -> Result<ChatListPage, RemoteError> {
        (**self).fetch_list_page(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Transport("reset".into()).is_transient());
        assert!(RemoteError::RateLimited { retry_after_ms: 5 }.is_transient());
        assert!(!RemoteError::Rejected("bad peer".into()).is_transient());
        assert!(!RemoteError::GaveUp {
            attempts: 3,
            last: "reset".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = RemoteError::GaveUp {
            attempts: 4,
            last: "transport error: reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "gave up after 4 attempts: transport error: reset"
        );
    }
}
