use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;

/// Unordered thread-safe set
///
/// Used for foreign-key buckets and by storage adapters for pending-change
/// buffers. Iteration returns a snapshot; concurrent writers never block a
/// reader for longer than one shard.
pub struct ConcurrentList<T: Eq + Hash> {
    items: DashMap<T, ()>,
}

impl<T: Eq + Hash + Clone> ConcurrentList<T> {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// Returns false if the item was already present
    pub fn add(&self, item: T) -> bool {
        self.items.insert(item, ()).is_none()
    }

    /// Returns false if the item was absent
    pub fn remove(&self, item: &T) -> bool {
        self.items.remove(item).is_some()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove and return an arbitrary item
    pub fn try_take(&self) -> Option<T> {
        loop {
            let candidate = self.items.iter().next().map(|entry| entry.key().clone())?;
            if self.items.remove(&candidate).is_some() {
                return Some(candidate);
            }
        }
    }

    /// Remove and return up to `limit` arbitrary items
    pub fn take_batch(&self, limit: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(limit.min(self.len()));
        while batch.len() < limit {
            match self.try_take() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.items.clear();
    }
}

impl<T: Eq + Hash + Clone> Default for ConcurrentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for ConcurrentList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let list = Self::new();
        for item in iter {
            list.add(item);
        }
        list
    }
}

impl<T: Eq + Hash + Clone + fmt::Debug> fmt::Debug for ConcurrentList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.to_vec()).finish()
    }
}
