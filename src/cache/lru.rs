//! Insertion Order Module
//!
//! Tracks entries by insertion sequence for LRU-style eviction and sweeps.
//!
//! Reads never promote an entry: since entries are immutable, the order in
//! which they were written stands in for recency of use.

use std::collections::BTreeMap;

// == Insertion Order ==
/// Orders resource ids by their insertion sequence number.
///
/// The smallest sequence is the oldest entry.
#[derive(Debug, Default)]
pub struct InsertionOrder {
    /// Sequence number -> resource id
    order: BTreeMap<u64, String>,
}

impl InsertionOrder {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
        }
    }

    // == Insert ==
    /// Records `resource_id` at position `sequence`.
    pub fn insert(&mut self, sequence: u64, resource_id: &str) {
        self.order.insert(sequence, resource_id.to_string());
    }

    // == Remove ==
    /// Forgets the entry at `sequence`, returning its resource id.
    pub fn remove(&mut self, sequence: u64) -> Option<String> {
        self.order.remove(&sequence)
    }

    // == Oldest ==
    /// Returns the oldest entry without removing it.
    ///
    /// Callers that delete as they go re-query this after each removal, which
    /// makes the traversal restartable at any point.
    pub fn oldest(&self) -> Option<(u64, &str)> {
        self.order
            .first_key_value()
            .map(|(seq, id)| (*seq, id.as_str()))
    }

    // == Oldest First ==
    /// Iterates entries from oldest to newest.
    pub fn oldest_first(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.order.iter().map(|(seq, id)| (*seq, id.as_str()))
    }

    // == Length ==
    /// Returns the number of tracked entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
