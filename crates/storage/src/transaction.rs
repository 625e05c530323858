//! Buffered transaction over a MemoryStore
//!
//! Writes are staged in an overlay map and only reach the base map when the
//! owning [`crate::MemoryStore`] commits. Reads merge the overlay over the base
//! so a transaction always sees its own writes.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::Bound;

use postmirror_core::{Entry, OrderedKey, ReadView, Result, Transaction};

/// Staged write: `Some(value)` for a put, `None` for a delete
pub(crate) type WriteSet = BTreeMap<OrderedKey, Option<Vec<u8>>>;

/// Transaction handed to the body of `MemoryStore::transaction`
///
/// Borrows the base map for the duration of the body; the store holds the
/// write lock meanwhile, so no other writer can interleave.
pub struct MemoryTransaction<'a> {
    base: &'a BTreeMap<OrderedKey, Vec<u8>>,
    writes: WriteSet,
}

impl<'a> MemoryTransaction<'a> {
    pub(crate) fn new(base: &'a BTreeMap<OrderedKey, Vec<u8>>) -> Self {
        Self {
            base,
            writes: WriteSet::new(),
        }
    }

    /// Number of staged puts and deletes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn into_writes(self) -> WriteSet {
        self.writes
    }
}

impl ReadView for MemoryTransaction<'_> {
    fn get(&self, key: &OrderedKey) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.base.get(key).cloned()),
        }
    }

    fn range(
        &self,
        from: &OrderedKey,
        to: &OrderedKey,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<Entry>> {
        Ok(merged_range(self.base, &self.writes, from, to, limit, reverse))
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn put(&mut self, key: OrderedKey, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: &OrderedKey) {
        self.writes.insert(key.clone(), None);
    }
}

type Iter<'a, V> = Box<dyn Iterator<Item = (&'a OrderedKey, &'a V)> + 'a>;

fn directed<'a, V>(
    map: &'a BTreeMap<OrderedKey, V>,
    from: &'a OrderedKey,
    to: &'a OrderedKey,
    reverse: bool,
) -> Peekable<Iter<'a, V>> {
    let bounds = (Bound::Included(from), Bound::Excluded(to));
    let iter: Iter<'a, V> = if reverse {
        Box::new(map.range::<OrderedKey, _>(bounds).rev())
    } else {
        Box::new(map.range::<OrderedKey, _>(bounds))
    };
    iter.peekable()
}

/// Scan `[from, to)` of the base map with `writes` laid over it
///
/// Staged puts shadow base entries with the same key; staged deletes hide them.
pub(crate) fn merged_range(
    base: &BTreeMap<OrderedKey, Vec<u8>>,
    writes: &WriteSet,
    from: &OrderedKey,
    to: &OrderedKey,
    limit: Option<usize>,
    reverse: bool,
) -> Vec<Entry> {
    let mut out = Vec::new();
    if from >= to {
        return out;
    }
    let limit = limit.unwrap_or(usize::MAX);
    let mut base_iter = directed(base, from, to, reverse);
    let mut write_iter = directed(writes, from, to, reverse);

    while out.len() < limit {
        let take_write = match (base_iter.peek(), write_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some((base_key, _)), Some((write_key, _))) => {
                let order = if reverse {
                    write_key.cmp(base_key)
                } else {
                    base_key.cmp(write_key)
                };
                match order {
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => {
                        // Shadowed by the staged write.
                        base_iter.next();
                        true
                    }
                }
            }
        };

        if take_write {
            if let Some((key, staged)) = write_iter.next() {
                if let Some(value) = staged {
                    out.push((key.clone(), value.clone()));
                }
            }
        } else if let Some((key, value)) = base_iter.next() {
            out.push((key.clone(), value.clone()));
        }
    }
    out
}
