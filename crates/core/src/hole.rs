//! Hole model
//!
//! A hole marks a contiguous key interval `[min, max]` that is known to be
//! incomplete locally. Two flavors exist:
//! - history holes, scoped to one peer's message namespace
//! - chat-list holes, scoped to the global conversation list
//!
//! ## Invariants
//!
//! - `min <= max` for every hole that exists
//! - within one `(scope, tag)`, holes never overlap
//! - a closed hole is removed, never stored empty

use std::fmt;

use crate::error::{Error, Result};
use crate::key::OrderedKey;
use crate::keyspace;
use crate::types::{MessageId, MessageIndex, MessageTags, PeerId};

/// Namespace a hole belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoleScope {
    /// One peer's message history in one message namespace
    History {
        /// Conversation partner
        peer_id: PeerId,
        /// Message namespace within the conversation
        namespace: i32,
    },
    /// The global conversation list
    ChatList,
}

impl fmt::Display for HoleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoleScope::History {
                peer_id,
                namespace,
            } => write!(f, "history({}/{})", peer_id, namespace),
            HoleScope::ChatList => write!(f, "chat-list"),
        }
    }
}

/// A known-incomplete key interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hole {
    scope: HoleScope,
    tag: Option<MessageTags>,
    min: OrderedKey,
    max: OrderedKey,
}

impl Hole {
    /// Create a hole over `[min, max]`
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if `min > max` or the tag is the empty mask.
    pub fn new(
        scope: HoleScope,
        tag: Option<MessageTags>,
        min: OrderedKey,
        max: OrderedKey,
    ) -> Result<Self> {
        if min > max {
            return Err(Error::InvariantViolation(format!(
                "hole in {} has min {} > max {}",
                scope, min, max
            )));
        }
        if tag.map_or(false, MessageTags::is_empty) {
            return Err(Error::InvariantViolation(format!(
                "hole in {} uses the empty tag mask",
                scope
            )));
        }
        Ok(Self {
            scope,
            tag,
            min,
            max,
        })
    }

    /// History hole over message ids `[min_id, max_id]`
    pub fn history(
        peer_id: PeerId,
        namespace: i32,
        tag: Option<MessageTags>,
        min_id: i32,
        max_id: i32,
    ) -> Result<Self> {
        let base = MessageId::new(peer_id, namespace, 0);
        Self::new(
            HoleScope::History {
                peer_id,
                namespace,
            },
            tag,
            keyspace::message_key(base.with_id(min_id)),
            keyspace::message_key(base.with_id(max_id)),
        )
    }

    /// History hole covering every id the remote can assign
    pub fn full_history(peer_id: PeerId, namespace: i32, tag: Option<MessageTags>) -> Result<Self> {
        Self::history(peer_id, namespace, tag, MessageId::MIN_ID, MessageId::MAX_ID)
    }

    /// Conversation-list hole covering everything at or below `upper`
    pub fn chat_list(upper: MessageIndex) -> Result<Self> {
        Self::new(
            HoleScope::ChatList,
            None,
            keyspace::chat_list_key(MessageIndex::lower_bound()),
            keyspace::chat_list_key(upper),
        )
    }

    /// Scope the hole belongs to
    pub fn scope(&self) -> &HoleScope {
        &self.scope
    }

    /// Tag the hole tracks, `None` for untagged
    pub fn tag(&self) -> Option<MessageTags> {
        self.tag
    }

    /// Lowest missing key, inclusive
    pub fn min(&self) -> &OrderedKey {
        &self.min
    }

    /// Highest missing key, inclusive
    pub fn max(&self) -> &OrderedKey {
        &self.max
    }

    /// Whether `point` lies inside `[min, max]`
    pub fn contains(&self, point: &OrderedKey) -> bool {
        &self.min <= point && point <= &self.max
    }

    /// Lowest message id of a history hole
    pub fn min_message_id(&self) -> Option<MessageId> {
        keyspace::message_id_from_key(&self.min)
    }

    /// Highest message id of a history hole
    pub fn max_message_id(&self) -> Option<MessageId> {
        keyspace::message_id_from_key(&self.max)
    }

    /// Upper index of a conversation-list hole
    pub fn upper_index(&self) -> Option<MessageIndex> {
        keyspace::chat_list_index_from_key(&self.max)
    }

    /// Same scope and tag, new bounds
    pub fn with_bounds(&self, min: OrderedKey, max: OrderedKey) -> Result<Self> {
        Self::new(self.scope, self.tag, min, max)
    }
}

impl fmt::Display for Hole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..={}]", self.scope, self.min, self.max)?;
        if let Some(tag) = self.tag {
            write!(f, " tag={:#x}", tag.bits())?;
        }
        Ok(())
    }
}

/// Direction a fill step pages in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDirection {
    /// Page downward from the hole's upper bound
    UpperToLower,
    /// Page upward from the hole's lower bound
    LowerToUpper,
    /// Fetch a symmetric window around an interior message
    AroundIndex(MessageId),
}

impl fmt::Display for FillDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillDirection::UpperToLower => write!(f, "upper-to-lower"),
            FillDirection::LowerToUpper => write!(f, "lower-to-upper"),
            FillDirection::AroundIndex(id) => write!(f, "around({})", id),
        }
    }
}

/// Result of one remote page
#[derive(Debug, Clone, PartialEq)]
pub struct FillResult<T> {
    /// Direction the page was fetched in
    pub direction: FillDirection,
    /// The remote returned fewer entries than requested: nothing lies beyond
    pub complete: bool,
    /// Decoded entries inside the hole
    pub entries: Vec<T>,
}

impl<T> FillResult<T> {
    /// Build a result, deriving `complete` from the raw entry count
    pub fn from_page(direction: FillDirection, entries: Vec<T>, page_size: usize) -> Self {
        let complete = entries.len() < page_size;
        Self {
            direction,
            complete,
            entries,
        }
    }
}

/// What a fill did to the hole it targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoleUpdate {
    /// The hole was closed and removed
    Removed,
    /// The hole shrank (or split) into the listed holes
    Shrunk(Vec<Hole>),
    /// Nothing was filled; the hole is unchanged
    Unchanged,
    /// The hole no longer exists as read; nothing was touched
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PEER_NAMESPACE_CLOUD_USER;

    fn peer() -> PeerId {
        PeerId::new(PEER_NAMESPACE_CLOUD_USER, 9)
    }

    #[test]
    fn test_inverted_hole_rejected() {
        let err = Hole::history(peer(), 0, None, 10, 5).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_empty_tag_rejected() {
        let err = Hole::history(peer(), 0, Some(MessageTags::NONE), 1, 5).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_single_point_hole_allowed() {
        let hole = Hole::history(peer(), 0, None, 7, 7).unwrap();
        assert_eq!(hole.min(), hole.max());
    }

    #[test]
    fn test_contains() {
        let hole = Hole::history(peer(), 0, None, 5, 10).unwrap();
        let at = |id| keyspace::message_key(MessageId::new(peer(), 0, id));
        assert!(hole.contains(&at(5)));
        assert!(hole.contains(&at(10)));
        assert!(!hole.contains(&at(4)));
        assert!(!hole.contains(&at(11)));
    }

    #[test]
    fn test_history_bounds_decode() {
        let hole = Hole::full_history(peer(), 0, None).unwrap();
        assert_eq!(hole.min_message_id().unwrap().id, MessageId::MIN_ID);
        assert_eq!(hole.max_message_id().unwrap().id, MessageId::MAX_ID);
        assert_eq!(hole.upper_index(), None);
    }

    #[test]
    fn test_chat_list_hole_upper_index() {
        let upper = MessageIndex::upper_bound();
        let hole = Hole::chat_list(upper).unwrap();
        assert_eq!(hole.upper_index(), Some(upper));
        assert_eq!(hole.scope(), &HoleScope::ChatList);
    }

    #[test]
    fn test_fill_result_complete_when_short() {
        let short = FillResult::from_page(FillDirection::UpperToLower, vec![1, 2], 3);
        assert!(short.complete);
        let full = FillResult::from_page(FillDirection::UpperToLower, vec![1, 2, 3], 3);
        assert!(!full.complete);
    }
}
