//! History fills
//!
//! Pages one peer namespace's history into a history hole.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use postmirror_core::keyspace::message_key;
use postmirror_core::{
    Error, FillDirection, FillResult, Hole, HoleScope, HoleUpdate, MessageTags, OrderedKey, Result,
    Store,
};

use super::{BackfillEngine, FillOutcome, FillReport};
use crate::entities::StoreMessage;
use crate::holes::HoleRegistry;
use crate::remote::{HistoryPage, HistoryRequest, RemoteSource};
use crate::tables::MessageTable;

impl<S, R> BackfillEngine<S, R>
where
    S: Store,
    R: RemoteSource,
{
    /// Build the remote request for one step of `direction` into `hole`
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedDirection` for a conversation-list hole, for
    /// `AroundIndex` on a tagged hole, and for an `AroundIndex` point outside
    /// the hole. Returns `Corruption` if the hole bounds are not message keys.
    pub fn history_request(&self, hole: &Hole, direction: FillDirection) -> Result<HistoryRequest> {
        let (peer_id, namespace) = match hole.scope() {
            HoleScope::History {
                peer_id,
                namespace,
            } => (*peer_id, *namespace),
            HoleScope::ChatList => {
                return Err(Error::UnsupportedDirection(format!(
                    "{} is not a history hole",
                    hole
                )))
            }
        };
        let lower = hole
            .min_message_id()
            .ok_or_else(|| Error::corruption(hole.min(), "history hole bound is not a message key"))?;
        let upper = hole
            .max_message_id()
            .ok_or_else(|| Error::corruption(hole.max(), "history hole bound is not a message key"))?;

        let page_size = self.config.history_page_size;
        let limit = i32::try_from(page_size).unwrap_or(i32::MAX);
        let (offset_id, add_offset) = match direction {
            FillDirection::UpperToLower => {
                let offset = if upper.id == i32::MAX {
                    upper.id
                } else {
                    upper.id + 1
                };
                (offset, 0)
            }
            FillDirection::LowerToUpper => {
                let offset = if lower.id <= 1 { 1 } else { lower.id - 1 };
                (offset, -limit)
            }
            FillDirection::AroundIndex(point) => {
                if hole.tag().is_some() {
                    return Err(Error::UnsupportedDirection(format!(
                        "{} cannot be filled around an index",
                        hole
                    )));
                }
                if !hole.contains(&message_key(point)) {
                    return Err(Error::UnsupportedDirection(format!(
                        "{} lies outside {}",
                        point, hole
                    )));
                }
                (point.id, -limit / 2)
            }
        };

        Ok(HistoryRequest {
            peer_id,
            namespace,
            direction,
            offset_id,
            add_offset,
            page_size,
            lower,
            upper,
            tag: hole.tag(),
        })
    }

    /// Run one fill step against a history hole
    ///
    /// Remote failures surface as [`FillOutcome::NoProgress`]; only request
    /// derivation and store failures are errors.
    pub async fn fill_history_hole(
        &self,
        hole: &Hole,
        direction: FillDirection,
        cancel: &CancellationToken,
    ) -> Result<FillOutcome> {
        let request = self.history_request(hole, direction)?;
        debug!(
            target: "postmirror::backfill",
            hole = %hole,
            direction = %direction,
            offset_id = request.offset_id,
            add_offset = request.add_offset,
            "Fetching history page"
        );
        match self
            .fetch_or_cancel("history", cancel, self.remote.fetch_history(&request))
            .await
        {
            Ok(Some(page)) => self
                .commit_history_page(hole, &request, page)
                .map(FillOutcome::Committed),
            Ok(None) => Ok(FillOutcome::Cancelled),
            Err(err) => Ok(FillOutcome::NoProgress(err)),
        }
    }

    /// Merge a fetched history page into the store
    ///
    /// Undecodable messages and messages outside `hole` are dropped and
    /// counted. Messages, the hole update and peers commit atomically.
    pub fn commit_history_page(
        &self,
        hole: &Hole,
        request: &HistoryRequest,
        page: HistoryPage,
    ) -> Result<FillReport> {
        let raw_count = page.messages.len();
        let mut decode_failures = 0;
        let mut clipped = 0;
        let mut messages = Vec::with_capacity(raw_count);
        for raw in page.messages {
            match StoreMessage::try_from(raw) {
                Ok(message) if hole.contains(&message_key(message.id)) => messages.push(message),
                Ok(message) => {
                    clipped += 1;
                    debug!(target: "postmirror::backfill", id = %message.id, hole = %hole, "Clipped message outside hole");
                }
                Err(err) => {
                    decode_failures += 1;
                    debug!(target: "postmirror::backfill", error = %err, "Dropping undecodable message");
                }
            }
        }

        let fill = FillResult {
            direction: request.direction,
            complete: raw_count < request.page_size,
            entries: messages,
        };
        let filled = filled_bounds(&fill.entries);
        let peers = page.peers;

        let committed = self.store.transaction(|txn| {
            for message in &fill.entries {
                MessageTable::upsert(txn, message)?;
            }
            let filled = filled.as_ref().map(|(lo, hi)| (lo, hi));
            let update =
                self.registry
                    .fill_range(txn, hole, filled, fill.direction, fill.complete)?;
            if hole.tag().is_none() && update != HoleUpdate::Stale {
                // An untagged page holds every message in its range, so the
                // tagged holes of the scope shrink with it
                if let Some((lo, hi)) =
                    HoleRegistry::covered_by_fill(hole, filled, fill.direction, fill.complete)
                {
                    for tag in MessageTags::ALL {
                        self.registry
                            .clear_range(txn, hole.scope(), Some(tag), &lo, &hi)?;
                    }
                }
            }
            let peers_merged = self.merge_peers(txn, peers)?;
            Ok((update, peers_merged))
        });
        let (hole_update, peers_merged) = match committed {
            Ok(done) => done,
            Err(err) => {
                error!(target: "postmirror::backfill", hole = %hole, error = %err, "History commit failed");
                return Err(err);
            }
        };

        let report = FillReport {
            hole_update,
            complete: fill.complete,
            stored: fill.entries.len(),
            decode_failures,
            clipped,
            peers_merged,
        };
        self.record_commit(&report);
        info!(
            target: "postmirror::backfill",
            hole = %hole,
            direction = %fill.direction,
            stored = report.stored,
            dropped = decode_failures + clipped,
            complete = report.complete,
            update = ?report.hole_update,
            "History page committed"
        );
        Ok(report)
    }
}

/// Inclusive key interval spanned by `messages`
fn filled_bounds(messages: &[StoreMessage]) -> Option<(OrderedKey, OrderedKey)> {
    let mut keys = messages.iter().map(|m| message_key(m.id));
    let first = keys.next()?;
    Some(keys.fold((first.clone(), first), |(lo, hi), key| {
        if key < lo {
            (key, hi)
        } else if key > hi {
            (lo, key)
        } else {
            (lo, hi)
        }
    }))
}
