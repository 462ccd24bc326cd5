//! Fingerprint-keyed memoization of relationship fetches.
//!
//! Entries are computed once and replaced wholesale; the whole cache is
//! dropped when its relationship mapper is discarded on flush.

use crate::iterator::Grouping;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Number of related entities per parent key.
pub type Counts = HashMap<String, usize>;

/// Cache of groupings and counts for one relationship mapper.
#[derive(Debug)]
pub struct FetchCache {
    enabled: bool,
    groupings: RefCell<HashMap<String, Rc<Grouping>>>,
    counts: RefCell<HashMap<String, Rc<Counts>>>,
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FetchCache {
    /// Create a cache; a disabled cache never returns a hit.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            groupings: RefCell::new(HashMap::new()),
            counts: RefCell::new(HashMap::new()),
        }
    }

    /// Cached grouping for a fingerprint.
    pub fn grouping(&self, key: &str) -> Option<Rc<Grouping>> {
        let hit = self.groupings.borrow().get(key).cloned();
        tracing::debug!(key, hit = hit.is_some(), "Fetch cache lookup");
        hit
    }

    /// Store a freshly computed grouping.
    pub fn store_grouping(&self, key: String, grouping: Grouping) -> Rc<Grouping> {
        let grouping = Rc::new(grouping);
        if self.enabled {
            self.groupings.borrow_mut().insert(key, Rc::clone(&grouping));
        }
        grouping
    }

    /// Cached counts for a fingerprint.
    pub fn counts(&self, key: &str) -> Option<Rc<Counts>> {
        let hit = self.counts.borrow().get(key).cloned();
        tracing::debug!(key, hit = hit.is_some(), "Count cache lookup");
        hit
    }

    /// Store freshly computed counts.
    pub fn store_counts(&self, key: String, counts: Counts) -> Rc<Counts> {
        let counts = Rc::new(counts);
        if self.enabled {
            self.counts.borrow_mut().insert(key, Rc::clone(&counts));
        }
        counts
    }

    /// Number of cached entries, groupings and counts together.
    pub fn len(&self) -> usize {
        self.groupings.borrow().len() + self.counts.borrow().len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.groupings.borrow_mut().clear();
        self.counts.borrow_mut().clear();
    }
}
