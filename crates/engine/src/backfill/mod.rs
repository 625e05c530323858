//! Backfill engine
//!
//! Closes holes one step at a time. Each step:
//! 1. derives a remote request from the hole
//! 2. fetches one page outside any transaction, racing a cancellation token
//! 3. commits everything the page contributed, plus the hole update, in a
//!    single store transaction
//!
//! There is no background work: the embedder decides which hole to fill
//! next and must not run two fills for the same hole concurrently.
//!
//! # Design Notes
//!
//! - **Atomic commit**: entity writes and hole updates land together or not
//!   at all, so a hole never claims data that was not stored
//! - **Stale holes**: a fill against a hole that changed since it was read
//!   stores its entities but leaves the registry alone
//! - **Cancellation**: checked after the fetch and before the commit; a
//!   cancelled step writes nothing

mod chat_list;
mod history;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use postmirror_core::{
    Hole, HoleScope, HoleUpdate, MessageIndex, MessageTags, OrderedKey, PeerId, Result, Store,
    Transaction,
};

use crate::config::BackfillConfig;
use crate::entities::Peer;
use crate::holes::HoleRegistry;
use crate::merge::{IncomingWins, PeerMerge};
use crate::metrics::{BackfillMetrics, MetricsSnapshot};
use crate::remote::{RemoteError, RemoteSource};
use crate::retry::Retrying;
use crate::tables::{HistoryMarkers, PeerTable};

/// What one fill step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillReport {
    /// What happened to the filled hole
    pub hole_update: HoleUpdate,
    /// The remote signalled there is nothing beyond this page
    pub complete: bool,
    /// Entities written (messages for history, conversations for the list)
    pub stored: usize,
    /// Wire records that could not be decoded
    pub decode_failures: usize,
    /// Decoded records that fell outside the hole
    pub clipped: usize,
    /// Peer records merged from the page
    pub peers_merged: usize,
}

/// Result of a fill step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// A page was merged
    Committed(FillReport),
    /// The remote could not serve the page; nothing changed
    NoProgress(RemoteError),
    /// The token fired before the commit; nothing changed
    Cancelled,
}

impl FillOutcome {
    /// True if a page was merged
    pub fn is_committed(&self) -> bool {
        matches!(self, FillOutcome::Committed(_))
    }

    /// Report of a committed step
    pub fn report(&self) -> Option<&FillReport> {
        match self {
            FillOutcome::Committed(report) => Some(report),
            _ => None,
        }
    }
}

/// Drives hole fills against a store and a remote source
pub struct BackfillEngine<S, R> {
    store: Arc<S>,
    remote: R,
    config: BackfillConfig,
    registry: HoleRegistry,
    peer_merge: Arc<dyn PeerMerge>,
    metrics: BackfillMetrics,
}

impl<S, R> BackfillEngine<S, R>
where
    S: Store,
    R: RemoteSource,
{
    /// Create an engine; peers merge with [`IncomingWins`] by default
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` does not validate.
    pub fn new(store: Arc<S>, remote: R, config: BackfillConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            remote,
            config,
            registry: HoleRegistry::new(),
            peer_merge: Arc::new(IncomingWins),
            metrics: BackfillMetrics::new(),
        })
    }

    /// Use `merge` to combine incoming peer records with stored ones
    pub fn with_peer_merge(mut self, merge: impl PeerMerge + 'static) -> Self {
        self.peer_merge = Arc::new(merge);
        self
    }

    /// The backing store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The remote source
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Active configuration
    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// The hole registry the engine writes through
    pub fn registry(&self) -> HoleRegistry {
        self.registry
    }

    /// Counter snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Committed hole containing `point`, if any
    pub fn hole_covering(
        &self,
        scope: &HoleScope,
        tag: Option<MessageTags>,
        point: &OrderedKey,
    ) -> Result<Option<Hole>> {
        self.registry
            .hole_covering(self.store.as_ref(), scope, tag, point)
    }

    /// Committed holes of `(scope, tag)`, ascending
    pub fn holes(&self, scope: &HoleScope, tag: Option<MessageTags>) -> Result<Vec<Hole>> {
        self.registry.holes(self.store.as_ref(), scope, tag)
    }

    /// Create the default holes for a peer namespace the first time it is seen
    ///
    /// One untagged hole plus one per message tag, each spanning every id
    /// the remote can assign. Returns `false` if the namespace was already
    /// materialized.
    pub fn materialize_history(&self, peer_id: PeerId, namespace: i32) -> Result<bool> {
        let created = self
            .store
            .transaction(|txn| self.materialize_history_in(txn, peer_id, namespace))?;
        if created {
            info!(target: "postmirror::backfill", peer = %peer_id, namespace, "History materialized");
        }
        Ok(created)
    }

    /// Create the initial conversation-list hole if the list has never been
    /// materialized. Returns `false` if it already was.
    pub fn materialize_chat_list(&self) -> Result<bool> {
        let created = self.store.transaction(|txn| {
            if HistoryMarkers::is_chat_list_materialized(&*txn)? {
                return Ok(false);
            }
            HistoryMarkers::mark_chat_list(txn);
            self.registry
                .insert(txn, &Hole::chat_list(MessageIndex::upper_bound())?)?;
            Ok(true)
        })?;
        if created {
            info!(target: "postmirror::backfill", "Conversation list materialized");
        }
        Ok(created)
    }

    pub(crate) fn materialize_history_in(
        &self,
        txn: &mut dyn Transaction,
        peer_id: PeerId,
        namespace: i32,
    ) -> Result<bool> {
        if HistoryMarkers::is_materialized(&*txn, peer_id, namespace)? {
            return Ok(false);
        }
        HistoryMarkers::mark(txn, peer_id, namespace);
        self.registry
            .insert(txn, &Hole::full_history(peer_id, namespace, None)?)?;
        for tag in MessageTags::ALL {
            self.registry
                .insert(txn, &Hole::full_history(peer_id, namespace, Some(tag))?)?;
        }
        Ok(true)
    }

    pub(crate) fn merge_peers(&self, txn: &mut dyn Transaction, peers: Vec<Peer>) -> Result<usize> {
        let count = peers.len();
        for incoming in peers {
            let local = PeerTable::get(&*txn, incoming.id)?;
            let merged = self.peer_merge.merge(local.as_ref(), incoming);
            PeerTable::put(txn, &merged)?;
        }
        Ok(count)
    }

    /// Await `fetch` unless `cancel` fires first
    ///
    /// `Ok(None)` means cancelled; `Err` is a remote failure already counted
    /// as no progress.
    pub(crate) async fn fetch_or_cancel<T, Fut>(
        &self,
        what: &'static str,
        cancel: &CancellationToken,
        fetch: Fut,
    ) -> std::result::Result<Option<T>, RemoteError>
    where
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        self.metrics.fill_started();
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = fetch => Some(result),
        };
        match fetched {
            None => {
                self.metrics.fill_cancelled();
                debug!(target: "postmirror::backfill", what, "Fill cancelled during fetch");
                Ok(None)
            }
            Some(Err(err)) => {
                self.metrics.fill_no_progress();
                warn!(target: "postmirror::backfill", what, error = %err, "Remote fetch failed");
                Err(err)
            }
            Some(Ok(_)) if cancel.is_cancelled() => {
                self.metrics.fill_cancelled();
                debug!(target: "postmirror::backfill", what, "Fill cancelled before commit");
                Ok(None)
            }
            Some(Ok(page)) => Ok(Some(page)),
        }
    }

    pub(crate) fn record_commit(&self, report: &FillReport) {
        self.metrics.fill_committed(
            report.stored,
            report.decode_failures,
            report.clipped,
            report.hole_update == HoleUpdate::Removed,
        );
    }
}

impl<S, R> BackfillEngine<S, Retrying<R>>
where
    S: Store,
    R: RemoteSource,
{
    /// Create an engine whose remote retries transient failures with the
    /// `[backoff]` settings of `config`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` does not validate.
    pub fn with_retries(store: Arc<S>, remote: R, config: BackfillConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.backoff_policy();
        Self::new(store, Retrying::new(remote, policy), config)
    }
}
