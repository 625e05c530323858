//! Peer merge policies
//!
//! Pages carry peer records alongside messages. How an incoming record
//! combines with the stored one is up to the embedder; the two common
//! policies ship here, and any `Fn(Option<&Peer>, Peer) -> Peer` works too.

use crate::entities::Peer;

/// Combine a stored peer record with an incoming one
pub trait PeerMerge: Send + Sync {
    /// Combine the stored record `local` with `incoming` from a page
    fn merge(&self, local: Option<&Peer>, incoming: Peer) -> Peer;
}

/// The incoming record always replaces the stored one
#[derive(Debug, Default, Clone, Copy)]
pub struct IncomingWins;

impl PeerMerge for IncomingWins {
    fn merge(&self, _local: Option<&Peer>, incoming: Peer) -> Peer {
        incoming
    }
}

/// Keep whichever record has the higher version; ties go to the incoming one
#[derive(Debug, Default, Clone, Copy)]
pub struct NewerVersionWins;

impl PeerMerge for NewerVersionWins {
    fn merge(&self, local: Option<&Peer>, incoming: Peer) -> Peer {
        match local {
            Some(local) if local.version > incoming.version => local.clone(),
            _ => incoming,
        }
    }
}

impl<F> PeerMerge for F
where
    F: Fn(Option<&Peer>, Peer) -> Peer + Send + Sync,
{
    fn merge(&self, local: Option<&Peer>, incoming: Peer) -> Peer {
        self(local, incoming)
    }
}
