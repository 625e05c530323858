//! Backfill engine for postmirror
//!
//! This crate orchestrates the lower layers:
//! - entities: typed records persisted by the mirror
//! - tables: typed accessors over the ordered key layout
//! - holes: the hole registry
//! - remote: the remote-source contract, plus a retrying decorator
//! - backfill: the engine that closes holes page by page
//! - config / metrics: `postmirror.toml` and fill counters
//!
//! The engine is the only component that knows about:
//! - Request derivation from holes
//! - Atomic merge of a page with its hole update
//! - Conversation-list hole replacement

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backfill;
pub mod config;
pub mod entities;
pub mod holes;
pub mod merge;
pub mod metrics;
pub mod remote;
pub mod retry;
pub mod tables;

pub use backfill::{BackfillEngine, FillOutcome, FillReport};
pub use config::{BackfillConfig, BackoffConfig, CONFIG_FILE_NAME};
pub use entities::{DecodeError, MediaKind, Peer, PeerChatState, PeerKind, PeerReadState, StoreMessage};
pub use holes::HoleRegistry;
pub use merge::{IncomingWins, NewerVersionWins, PeerMerge};
pub use metrics::{BackfillMetrics, MetricsSnapshot};
pub use remote::{
    ChatListPage, ChatListRequest, HistoryPage, HistoryRequest, RemoteDialog, RemoteError,
    RemoteMessage, RemoteSource,
};
pub use retry::{BackoffPolicy, Retrying};
pub use tables::{
    ChatListTable, ChatStateTable, HistoryMarkers, MessageTable, PeerTable, ReadStateTable,
    TagIndex,
};
