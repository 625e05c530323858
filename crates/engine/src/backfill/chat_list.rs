//! Conversation-list fills
//!
//! A list page returns the next batch of conversations below the hole's
//! upper index. The hole is replaced, not shrunk: the replacement tops out
//! just below the lowest conversation the page returned. Without such a
//! bound (an exhaustive page, or no usable top message and no hint) the hole
//! is deleted, so a step never repeats the request it just made.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use postmirror_core::keyspace::{chat_list_index_from_key, chat_list_key};
use postmirror_core::{
    Error, Hole, HoleScope, HoleUpdate, MessageId, MessageIndex, Result, Store,
    MESSAGE_NAMESPACE_CLOUD,
};

use super::{BackfillEngine, FillOutcome, FillReport};
use crate::entities::{PeerChatState, PeerReadState, StoreMessage};
use crate::remote::{ChatListPage, ChatListRequest, RemoteSource};
use crate::tables::{ChatListTable, ChatStateTable, MessageTable, ReadStateTable};

/// Whether `candidate` should replace `current` as the replacement bound
///
/// The oldest timestamp wins; among equal timestamps the larger key wins.
fn prefer(candidate: &MessageIndex, current: &MessageIndex) -> bool {
    candidate.timestamp < current.timestamp
        || (candidate.timestamp == current.timestamp
            && chat_list_key(*candidate) > chat_list_key(*current))
}

impl<S, R> BackfillEngine<S, R>
where
    S: Store,
    R: RemoteSource,
{
    /// Build the remote request for one step into a conversation-list hole
    ///
    /// An upper index in the empty peer namespace (the initial hole) yields a
    /// zero offset, which asks for the top of the list.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedDirection` for a history hole and `Corruption` if
    /// the hole's upper bound is not a conversation-list key.
    pub fn chat_list_request(&self, hole: &Hole) -> Result<ChatListRequest> {
        if hole.scope() != &HoleScope::ChatList {
            return Err(Error::UnsupportedDirection(format!(
                "{} is not a conversation-list hole",
                hole
            )));
        }
        let upper = hole
            .upper_index()
            .ok_or_else(|| Error::corruption(hole.max(), "chat list hole bound is not a list key"))?;
        let page_size = self.config.list_page_size;
        Ok(if upper.id.peer_id.is_empty() {
            ChatListRequest {
                offset_timestamp: 0,
                offset_id: 0,
                offset_peer: None,
                page_size,
            }
        } else {
            ChatListRequest {
                offset_timestamp: upper.timestamp,
                offset_id: upper.id.id.saturating_add(1),
                offset_peer: Some(upper.id.peer_id),
                page_size,
            }
        })
    }

    /// Run one fill step against the conversation-list hole
    pub async fn fill_chat_list_hole(
        &self,
        hole: &Hole,
        cancel: &CancellationToken,
    ) -> Result<FillOutcome> {
        let request = self.chat_list_request(hole)?;
        debug!(
            target: "postmirror::backfill",
            hole = %hole,
            offset_timestamp = request.offset_timestamp,
            offset_id = request.offset_id,
            "Fetching conversation-list page"
        );
        match self
            .fetch_or_cancel("chat_list", cancel, self.remote.fetch_list_page(&request))
            .await
        {
            Ok(Some(page)) => self
                .commit_chat_list_page(hole, &request, page)
                .map(FillOutcome::Committed),
            Ok(None) => Ok(FillOutcome::Cancelled),
            Err(err) => Ok(FillOutcome::NoProgress(err)),
        }
    }

    /// Merge a fetched conversation-list page into the store
    ///
    /// Peers, messages, list positions, per-conversation history holes, read
    /// and chat states, and the hole replacement all commit atomically. Read
    /// and chat states from the page overwrite local ones.
    pub fn commit_chat_list_page(
        &self,
        hole: &Hole,
        request: &ChatListRequest,
        page: ChatListPage,
    ) -> Result<FillReport> {
        let mut decode_failures = 0;
        let mut messages: HashMap<MessageId, StoreMessage> = HashMap::new();
        for raw in page.messages {
            match StoreMessage::try_from(raw) {
                Ok(message) => {
                    messages.insert(message.id, message);
                }
                Err(err) => {
                    decode_failures += 1;
                    debug!(target: "postmirror::backfill", error = %err, "Dropping undecodable message");
                }
            }
        }

        let exhaustive = page.dialogs.len() < request.page_size;
        let upper = hole.upper_index();
        let mut top_indices = Vec::with_capacity(page.dialogs.len());
        let mut clipped = 0;
        let mut candidate: Option<MessageIndex> = None;
        for dialog in &page.dialogs {
            let top_id = MessageId::new(dialog.peer_id, MESSAGE_NAMESPACE_CLOUD, dialog.top_message);
            let Some(top) = messages.get(&top_id) else {
                continue;
            };
            let index = top.index();
            top_indices.push(index);
            if upper.map_or(false, |upper| index > upper) {
                clipped += 1;
                continue;
            }
            let below = chat_list_key(index).predecessor();
            if let Some(bound) = chat_list_index_from_key(&below) {
                if candidate.map_or(true, |current| prefer(&bound, &current)) {
                    candidate = Some(bound);
                }
            }
        }

        let hint = page
            .next_offset_hint
            .filter(|hint| upper.map_or(true, |upper| *hint < upper));
        let bound = if exhaustive { None } else { candidate.or(hint) };
        if !exhaustive && bound.is_none() {
            debug!(target: "postmirror::backfill", hole = %hole, "No replacement bound in a full page; closing hole");
        }
        let replacement_hole = match bound.map(Hole::chat_list) {
            Some(Ok(new_hole)) => Some(new_hole),
            Some(Err(err)) => {
                debug!(target: "postmirror::backfill", error = %err, "Replacement bound below the list; closing hole");
                None
            }
            None => None,
        };

        let dialogs = page.dialogs;
        let peers = page.peers;
        let committed = self.store.transaction(|txn| {
            let peers_merged = self.merge_peers(txn, peers)?;
            for message in messages.values() {
                MessageTable::upsert(txn, message)?;
            }
            for index in &top_indices {
                ChatListTable::update_position(txn, *index)?;
                self.materialize_history_in(txn, index.id.peer_id, index.id.namespace)?;
            }
            for dialog in &dialogs {
                ReadStateTable::put(
                    txn,
                    dialog.peer_id,
                    MESSAGE_NAMESPACE_CLOUD,
                    &PeerReadState {
                        max_incoming_read_id: dialog.read_inbox_max_id,
                        max_outgoing_read_id: dialog.read_outbox_max_id,
                        max_known_id: dialog.top_message,
                        unread_count: dialog.unread_count,
                    },
                )?;
                if let Some(pts) = dialog.channel_pts {
                    ChatStateTable::put(txn, dialog.peer_id, &PeerChatState::Channel { pts })?;
                }
            }

            let update = if self.registry.current(&*txn, hole)?.as_ref() != Some(hole) {
                HoleUpdate::Stale
            } else {
                match replacement_hole.as_ref() {
                    Some(new_hole) if new_hole == hole => HoleUpdate::Unchanged,
                    Some(new_hole) => {
                        self.registry.replace(txn, hole, Some(new_hole))?;
                        HoleUpdate::Shrunk(vec![new_hole.clone()])
                    }
                    None => {
                        self.registry.replace(txn, hole, None)?;
                        HoleUpdate::Removed
                    }
                }
            };
            Ok((update, peers_merged))
        });
        let (hole_update, peers_merged) = match committed {
            Ok(done) => done,
            Err(err) => {
                error!(target: "postmirror::backfill", hole = %hole, error = %err, "Conversation-list commit failed");
                return Err(err);
            }
        };

        let report = FillReport {
            hole_update,
            complete: exhaustive,
            stored: top_indices.len(),
            decode_failures,
            clipped,
            peers_merged,
        };
        self.record_commit(&report);
        info!(
            target: "postmirror::backfill",
            hole = %hole,
            conversations = dialogs.len(),
            stored = report.stored,
            dropped = decode_failures,
            complete = exhaustive,
            update = ?report.hole_update,
            "Conversation-list page committed"
        );
        Ok(report)
    }
}
