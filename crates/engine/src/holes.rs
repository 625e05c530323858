//! Hole registry
//!
//! Persists holes as records in the reserved hole sub-space and answers
//! "which hole contains this key" with a single bounded scan.
//!
//! ## Record layout
//!
//! key = `hole_prefix(scope, tag) ++ max`, value = raw `min` bytes. Because
//! holes in one `(scope, tag)` never overlap, the first record at or after
//! `hole_prefix ++ point` is the only hole that can contain `point`.
//!
//! ## Contract
//!
//! - Every mutation runs inside the caller's transaction
//! - A fill against a record that no longer matches does nothing
//!   ([`HoleUpdate::Stale`]); a closed hole is never resurrected
//! - Inserting an inverted or overlapping hole fails with
//!   `InvariantViolation`, aborting the transaction

use tracing::{debug, error, trace};

use postmirror_core::keyspace::{hole_key, hole_max_from_key, hole_prefix};
use postmirror_core::{
    Error, FillDirection, Hole, HoleScope, HoleUpdate, MessageTags, OrderedKey, ReadView, Result,
    Transaction,
};

/// Stateless handle over the hole records of a store
#[derive(Debug, Default, Clone, Copy)]
pub struct HoleRegistry;

impl HoleRegistry {
    /// Empty registry handle
    pub fn new() -> Self {
        Self
    }

    /// The hole in `(scope, tag)` containing `point`, if any
    pub fn hole_covering<V: ReadView + ?Sized>(
        &self,
        view: &V,
        scope: &HoleScope,
        tag: Option<MessageTags>,
        point: &OrderedKey,
    ) -> Result<Option<Hole>> {
        let prefix = hole_prefix(scope, tag);
        let from = hole_key(scope, tag, point);
        let to = scope_end(&prefix)?;
        let found = view.range(&from, &to, Some(1), false)?;
        match found.into_iter().next() {
            Some((key, value)) => {
                let hole = decode_hole(scope, tag, &prefix, &key, &value)?;
                Ok(if hole.min() <= point { Some(hole) } else { None })
            }
            None => Ok(None),
        }
    }

    /// Every hole in `(scope, tag)`, ascending
    pub fn holes<V: ReadView + ?Sized>(
        &self,
        view: &V,
        scope: &HoleScope,
        tag: Option<MessageTags>,
    ) -> Result<Vec<Hole>> {
        let prefix = hole_prefix(scope, tag);
        let to = scope_end(&prefix)?;
        view.range(&prefix, &to, None, false)?
            .into_iter()
            .map(|(key, value)| decode_hole(scope, tag, &prefix, &key, &value))
            .collect()
    }

    /// The stored record for `hole`'s key, which may differ from `hole`
    pub fn current<V: ReadView + ?Sized>(&self, view: &V, hole: &Hole) -> Result<Option<Hole>> {
        let prefix = hole_prefix(hole.scope(), hole.tag());
        let key = hole_key(hole.scope(), hole.tag(), hole.max());
        match view.get(&key)? {
            Some(value) => decode_hole(hole.scope(), hole.tag(), &prefix, &key, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Record a new hole
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the hole overlaps an existing one.
    pub fn insert<T: Transaction + ?Sized>(&self, txn: &mut T, hole: &Hole) -> Result<()> {
        if let Some(existing) = self.first_ending_at_or_after(&*txn, hole)? {
            if existing.min() <= hole.max() {
                error!(target: "postmirror::holes", new = %hole, existing = %existing, "Refusing overlapping hole");
                return Err(Error::InvariantViolation(format!(
                    "hole {} overlaps {}",
                    hole, existing
                )));
            }
        }
        trace!(target: "postmirror::holes", hole = %hole, "Hole inserted");
        txn.put(
            hole_key(hole.scope(), hole.tag(), hole.max()),
            hole.min().to_vec(),
        );
        Ok(())
    }

    /// Delete the record for `hole`, if present
    pub fn remove<T: Transaction + ?Sized>(&self, txn: &mut T, hole: &Hole) {
        trace!(target: "postmirror::holes", hole = %hole, "Hole removed");
        txn.delete(&hole_key(hole.scope(), hole.tag(), hole.max()));
    }

    /// Remove `old` and, if given, insert `new` in the same transaction
    pub fn replace<T: Transaction + ?Sized>(
        &self,
        txn: &mut T,
        old: &Hole,
        new: Option<&Hole>,
    ) -> Result<()> {
        self.remove(txn, old);
        if let Some(new) = new {
            self.insert(txn, new)?;
        }
        debug!(target: "postmirror::holes", old = %old, new = ?new.map(ToString::to_string), "Hole replaced");
        Ok(())
    }

    /// Shrink, split or remove `hole` after `filled` was populated
    ///
    /// `filled` is the inclusive key interval actually stored, `None` when
    /// the page contributed nothing inside the hole. A `complete` page closes
    /// the hole whatever was filled.
    pub fn fill_range<T: Transaction + ?Sized>(
        &self,
        txn: &mut T,
        hole: &Hole,
        filled: Option<(&OrderedKey, &OrderedKey)>,
        direction: FillDirection,
        complete: bool,
    ) -> Result<HoleUpdate> {
        if self.current(&*txn, hole)?.as_ref() != Some(hole) {
            debug!(target: "postmirror::holes", hole = %hole, "Hole changed since it was read; fill ignored");
            return Ok(HoleUpdate::Stale);
        }

        if complete {
            self.remove(txn, hole);
            return Ok(HoleUpdate::Removed);
        }

        let (lo, hi) = match filled {
            Some(bounds) => bounds,
            None => return Ok(HoleUpdate::Unchanged),
        };
        if lo > hi {
            error!(target: "postmirror::holes", hole = %hole, lo = %lo, hi = %hi, "Inverted fill interval");
            return Err(Error::InvariantViolation(format!(
                "filled interval [{}, {}] is inverted",
                lo, hi
            )));
        }

        let remaining: Vec<Hole> = match direction {
            FillDirection::UpperToLower => below(hole, lo)?.into_iter().collect(),
            FillDirection::LowerToUpper => above(hole, hi)?.into_iter().collect(),
            FillDirection::AroundIndex(_) => below(hole, lo)?
                .into_iter()
                .chain(above(hole, hi)?)
                .collect(),
        };

        self.remove(txn, hole);
        for part in &remaining {
            self.insert(txn, part)?;
        }
        debug!(
            target: "postmirror::holes",
            hole = %hole,
            direction = %direction,
            remaining = remaining.len(),
            "Hole shrunk"
        );
        Ok(if remaining.is_empty() {
            HoleUpdate::Removed
        } else {
            HoleUpdate::Shrunk(remaining)
        })
    }

    /// Subtract `[lo, hi]` from every hole of `(scope, tag)` it overlaps
    ///
    /// Holes are trimmed or split around the interval; holes entirely inside
    /// it are removed. Returns how many holes were touched.
    pub fn clear_range<T: Transaction + ?Sized>(
        &self,
        txn: &mut T,
        scope: &HoleScope,
        tag: Option<MessageTags>,
        lo: &OrderedKey,
        hi: &OrderedKey,
    ) -> Result<usize> {
        if lo > hi {
            return Err(Error::InvariantViolation(format!(
                "cleared interval [{}, {}] is inverted",
                lo, hi
            )));
        }
        let prefix = hole_prefix(scope, tag);
        let from = hole_key(scope, tag, lo);
        let to = scope_end(&prefix)?;
        let mut overlapping = Vec::new();
        for (key, value) in txn.range(&from, &to, None, false)? {
            let hole = decode_hole(scope, tag, &prefix, &key, &value)?;
            if hole.min() > hi {
                break;
            }
            overlapping.push(hole);
        }

        for hole in &overlapping {
            self.remove(txn, hole);
            for part in below(hole, lo)?.into_iter().chain(above(hole, hi)?) {
                self.insert(txn, &part)?;
            }
        }
        if !overlapping.is_empty() {
            debug!(
                target: "postmirror::holes",
                scope = %scope,
                tag = ?tag,
                touched = overlapping.len(),
                "Range cleared"
            );
        }
        Ok(overlapping.len())
    }

    /// Key interval of `hole` known to be fetched after a fill
    ///
    /// Mirrors [`fill_range`](Self::fill_range): a complete page covers the
    /// whole hole, a directional page covers from the filled edge to the
    /// hole bound it walked from, and `AroundIndex` covers only what came
    /// back.
    pub fn covered_by_fill(
        hole: &Hole,
        filled: Option<(&OrderedKey, &OrderedKey)>,
        direction: FillDirection,
        complete: bool,
    ) -> Option<(OrderedKey, OrderedKey)> {
        if complete {
            return Some((hole.min().clone(), hole.max().clone()));
        }
        let (lo, hi) = filled?;
        Some(match direction {
            FillDirection::UpperToLower => (lo.clone(), hole.max().clone()),
            FillDirection::LowerToUpper => (hole.min().clone(), hi.clone()),
            FillDirection::AroundIndex(_) => (lo.clone(), hi.clone()),
        })
    }

    fn first_ending_at_or_after<V: ReadView + ?Sized>(
        &self,
        view: &V,
        hole: &Hole,
    ) -> Result<Option<Hole>> {
        let prefix = hole_prefix(hole.scope(), hole.tag());
        let from = hole_key(hole.scope(), hole.tag(), hole.min());
        let to = scope_end(&prefix)?;
        match view.range(&from, &to, Some(1), false)?.into_iter().next() {
            Some((key, value)) => {
                decode_hole(hole.scope(), hole.tag(), &prefix, &key, &value).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// Part of `hole` strictly below `lo`
fn below(hole: &Hole, lo: &OrderedKey) -> Result<Option<Hole>> {
    if lo <= hole.min() {
        return Ok(None);
    }
    let max = std::cmp::min(lo.predecessor(), hole.max().clone());
    if &max < hole.min() {
        return Ok(None);
    }
    hole.with_bounds(hole.min().clone(), max).map(Some)
}

/// Part of `hole` strictly above `hi`
fn above(hole: &Hole, hi: &OrderedKey) -> Result<Option<Hole>> {
    let min = match hi.successor() {
        Some(next) => std::cmp::max(next, hole.min().clone()),
        None => return Ok(None),
    };
    if &min > hole.max() {
        return Ok(None);
    }
    hole.with_bounds(min, hole.max().clone()).map(Some)
}

fn scope_end(prefix: &OrderedKey) -> Result<OrderedKey> {
    prefix.prefix_end().ok_or_else(|| {
        Error::InvariantViolation(format!("hole prefix {} has no upper bound", prefix))
    })
}

fn decode_hole(
    scope: &HoleScope,
    tag: Option<MessageTags>,
    prefix: &OrderedKey,
    key: &OrderedKey,
    value: &[u8],
) -> Result<Hole> {
    let max = hole_max_from_key(prefix, key)
        .ok_or_else(|| Error::corruption(key, "hole key outside its scope"))?;
    Hole::new(*scope, tag, OrderedKey::from_slice(value), max)
        .map_err(|e| Error::corruption(key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmirror_core::keyspace::message_key;
    use postmirror_core::{MessageId, PeerId, Store, PEER_NAMESPACE_CLOUD_USER};
    use postmirror_storage::MemoryStore;

    fn peer() -> PeerId {
        PeerId::new(PEER_NAMESPACE_CLOUD_USER, 11)
    }

    fn scope() -> HoleScope {
        HoleScope::History {
            peer_id: peer(),
            namespace: 0,
        }
    }

    fn at(id: i32) -> OrderedKey {
        message_key(MessageId::new(peer(), 0, id))
    }

    fn hole(min: i32, max: i32) -> Hole {
        Hole::history(peer(), 0, None, min, max).unwrap()
    }

    fn store_with(holes: &[Hole]) -> MemoryStore {
        let store = MemoryStore::new();
        let registry = HoleRegistry::new();
        store
            .transaction(|txn| {
                for h in holes {
                    registry.insert(txn, h)?;
                }
                Ok(())
            })
            .unwrap();
        store
    }

    fn fill(
        store: &MemoryStore,
        target: &Hole,
        filled: Option<(i32, i32)>,
        direction: FillDirection,
        complete: bool,
    ) -> Result<HoleUpdate> {
        let registry = HoleRegistry::new();
        store.transaction(|txn| {
            let bounds = filled.map(|(lo, hi)| (at(lo), at(hi)));
            registry.fill_range(
                txn,
                target,
                bounds.as_ref().map(|(lo, hi)| (lo, hi)),
                direction,
                complete,
            )
        })
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[test]
    fn test_hole_covering_finds_containing_hole() {
        let store = store_with(&[hole(1, 4), hole(10, 20)]);
        let registry = HoleRegistry::new();
        assert_eq!(
            registry.hole_covering(&store, &scope(), None, &at(15)).unwrap(),
            Some(hole(10, 20))
        );
        assert_eq!(
            registry.hole_covering(&store, &scope(), None, &at(4)).unwrap(),
            Some(hole(1, 4))
        );
        assert_eq!(registry.hole_covering(&store, &scope(), None, &at(7)).unwrap(), None);
        assert_eq!(registry.hole_covering(&store, &scope(), None, &at(21)).unwrap(), None);
    }

    #[test]
    fn test_hole_covering_respects_tag_and_scope() {
        let store = store_with(&[hole(1, 100)]);
        let registry = HoleRegistry::new();
        assert_eq!(
            registry
                .hole_covering(&store, &scope(), Some(MessageTags::VOICE), &at(50))
                .unwrap(),
            None
        );
        let other = HoleScope::History {
            peer_id: PeerId::new(PEER_NAMESPACE_CLOUD_USER, 12),
            namespace: 0,
        };
        assert_eq!(registry.hole_covering(&store, &other, None, &at(50)).unwrap(), None);
    }

    #[test]
    fn test_holes_lists_in_order() {
        let store = store_with(&[hole(10, 20), hole(1, 4)]);
        let holes = HoleRegistry::new().holes(&store, &scope(), None).unwrap();
        assert_eq!(holes, vec![hole(1, 4), hole(10, 20)]);
    }

    #[test]
    fn test_overlapping_insert_rejected() {
        let store = store_with(&[hole(10, 20)]);
        let registry = HoleRegistry::new();
        for overlapping in [hole(5, 10), hole(20, 30), hole(12, 13), hole(1, 100)] {
            let err = store
                .transaction(|txn| registry.insert(txn, &overlapping))
                .unwrap_err();
            assert!(err.is_invariant_violation());
        }
        store
            .transaction(|txn| registry.insert(txn, &hole(21, 30)))
            .unwrap();
    }

    // ========================================================================
    // Fills
    // ========================================================================

    #[test]
    fn test_upper_to_lower_partial_fill_shrinks_max() {
        let store = store_with(&[hole(5, 10)]);
        let update = fill(&store, &hole(5, 10), Some((8, 10)), FillDirection::UpperToLower, false)
            .unwrap();
        assert_eq!(update, HoleUpdate::Shrunk(vec![hole(5, 7)]));
        assert_eq!(HoleRegistry::new().holes(&store, &scope(), None).unwrap(), vec![hole(5, 7)]);
    }

    #[test]
    fn test_lower_to_upper_partial_fill_raises_min() {
        let store = store_with(&[hole(5, 10)]);
        let update = fill(&store, &hole(5, 10), Some((5, 6)), FillDirection::LowerToUpper, false)
            .unwrap();
        assert_eq!(update, HoleUpdate::Shrunk(vec![hole(7, 10)]));
    }

    #[test]
    fn test_around_index_splits() {
        let store = store_with(&[hole(1, 100)]);
        let point = MessageId::new(peer(), 0, 50);
        let update =
            fill(&store, &hole(1, 100), Some((40, 60)), FillDirection::AroundIndex(point), false)
                .unwrap();
        assert_eq!(update, HoleUpdate::Shrunk(vec![hole(1, 39), hole(61, 100)]));
    }

    #[test]
    fn test_complete_fill_removes_hole() {
        let store = store_with(&[hole(5, 10)]);
        let update =
            fill(&store, &hole(5, 10), Some((9, 10)), FillDirection::UpperToLower, true).unwrap();
        assert_eq!(update, HoleUpdate::Removed);
        assert!(HoleRegistry::new().holes(&store, &scope(), None).unwrap().is_empty());
    }

    #[test]
    fn test_fill_reaching_the_far_bound_removes_hole() {
        let store = store_with(&[hole(5, 10)]);
        let update =
            fill(&store, &hole(5, 10), Some((5, 10)), FillDirection::UpperToLower, false).unwrap();
        assert_eq!(update, HoleUpdate::Removed);
    }

    #[test]
    fn test_empty_incomplete_fill_is_noop() {
        let store = store_with(&[hole(5, 10)]);
        let update = fill(&store, &hole(5, 10), None, FillDirection::UpperToLower, false).unwrap();
        assert_eq!(update, HoleUpdate::Unchanged);
        assert_eq!(HoleRegistry::new().holes(&store, &scope(), None).unwrap(), vec![hole(5, 10)]);
    }

    #[test]
    fn test_stale_fill_does_not_resurrect() {
        let store = store_with(&[hole(5, 10)]);
        fill(&store, &hole(5, 10), Some((9, 10)), FillDirection::UpperToLower, true).unwrap();
        let update =
            fill(&store, &hole(5, 10), Some((7, 10)), FillDirection::UpperToLower, false).unwrap();
        assert_eq!(update, HoleUpdate::Stale);
        assert!(HoleRegistry::new().holes(&store, &scope(), None).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_fill_is_idempotent() {
        let store = store_with(&[hole(5, 10)]);
        fill(&store, &hole(5, 10), Some((8, 10)), FillDirection::UpperToLower, false).unwrap();
        let before = store.dump();
        let update =
            fill(&store, &hole(5, 10), Some((8, 10)), FillDirection::UpperToLower, false).unwrap();
        assert_eq!(update, HoleUpdate::Stale);
        assert_eq!(store.dump(), before);
    }

    #[test]
    fn test_inverted_fill_aborts_transaction() {
        let store = store_with(&[hole(5, 10)]);
        let err = fill(&store, &hole(5, 10), Some((9, 6)), FillDirection::UpperToLower, false)
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(HoleRegistry::new().holes(&store, &scope(), None).unwrap(), vec![hole(5, 10)]);
    }

    #[test]
    fn test_replace_swaps_atomically() {
        let store = store_with(&[hole(5, 10)]);
        let registry = HoleRegistry::new();
        store
            .transaction(|txn| registry.replace(txn, &hole(5, 10), Some(&hole(5, 8))))
            .unwrap();
        assert_eq!(registry.holes(&store, &scope(), None).unwrap(), vec![hole(5, 8)]);
        store
            .transaction(|txn| registry.replace(txn, &hole(5, 8), None))
            .unwrap();
        assert!(registry.holes(&store, &scope(), None).unwrap().is_empty());
    }

    // ========================================================================
    // Range clearing
    // ========================================================================

    #[test]
    fn test_clear_range_trims_splits_and_removes() {
        let store = store_with(&[hole(1, 4), hole(6, 8), hole(10, 20), hole(30, 40)]);
        let registry = HoleRegistry::new();
        let touched = store
            .transaction(|txn| registry.clear_range(txn, &scope(), None, &at(3), &at(15)))
            .unwrap();
        assert_eq!(touched, 3);
        assert_eq!(
            registry.holes(&store, &scope(), None).unwrap(),
            vec![hole(1, 2), hole(16, 20), hole(30, 40)]
        );

        let touched = store
            .transaction(|txn| registry.clear_range(txn, &scope(), None, &at(33), &at(35)))
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(
            registry.holes(&store, &scope(), None).unwrap(),
            vec![hole(1, 2), hole(16, 20), hole(30, 32), hole(36, 40)]
        );
    }

    #[test]
    fn test_clear_range_ignores_other_tags_and_gaps() {
        let tagged = Hole::history(peer(), 0, Some(MessageTags::VOICE), 1, 50).unwrap();
        let store = store_with(&[hole(1, 4), tagged.clone()]);
        let registry = HoleRegistry::new();
        let touched = store
            .transaction(|txn| registry.clear_range(txn, &scope(), None, &at(5), &at(9)))
            .unwrap();
        assert_eq!(touched, 0);
        assert_eq!(registry.holes(&store, &scope(), None).unwrap(), vec![hole(1, 4)]);
        assert_eq!(
            registry
                .holes(&store, &scope(), Some(MessageTags::VOICE))
                .unwrap(),
            vec![tagged]
        );
    }

    #[test]
    fn test_clear_range_rejects_inverted_interval() {
        let store = store_with(&[hole(1, 4)]);
        let registry = HoleRegistry::new();
        let result = store.transaction(|txn| registry.clear_range(txn, &scope(), None, &at(4), &at(2)));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_covered_by_fill_follows_direction() {
        let target = hole(5, 50);
        let (lo, hi) = (at(10), at(20));
        let covered = |direction, complete, filled| {
            HoleRegistry::covered_by_fill(&target, filled, direction, complete)
        };
        assert_eq!(
            covered(FillDirection::UpperToLower, false, Some((&lo, &hi))),
            Some((at(10), at(50)))
        );
        assert_eq!(
            covered(FillDirection::LowerToUpper, false, Some((&lo, &hi))),
            Some((at(5), at(20)))
        );
        assert_eq!(
            covered(
                FillDirection::AroundIndex(MessageId::new(peer(), 0, 15)),
                false,
                Some((&lo, &hi))
            ),
            Some((at(10), at(20)))
        );
        assert_eq!(covered(FillDirection::UpperToLower, true, None), Some((at(5), at(50))));
        assert_eq!(covered(FillDirection::LowerToUpper, false, None), None);
    }
}
