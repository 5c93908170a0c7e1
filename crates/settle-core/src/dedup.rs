//! At-most-once emission tracking.
//!
//! Identities are recorded for the life of the process and never evicted.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct DedupSet<K> {
    seen: HashSet<K>,
}

impl<K: Eq + Hash> DedupSet<K> {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }

    /// Returns `true` if `key` had not been seen, recording it in the same step.
    pub fn check_and_record(&mut self, key: K) -> bool {
        self.seen.insert(key)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<K: Eq + Hash> Default for DedupSet<K> {
    fn default() -> Self {
        Self::new()
    }
}
