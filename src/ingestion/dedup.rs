use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Insertion-ordered set that forgets its oldest entries once it grows past `max`,
/// keeping the newest `keep`.
pub struct BoundedDedup<K> {
    order: VecDeque<K>,
    seen: HashSet<K>,
    max: usize,
    keep: usize,
}

impl<K: Eq + Hash + Clone> BoundedDedup<K> {
    pub fn new(max: usize, keep: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(max + 1),
            seen: HashSet::with_capacity(max + 1),
            max,
            keep: keep.min(max),
        }
    }

    /// `true` the first time `key` is seen.
    pub fn insert(&mut self, key: K) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);

        if self.order.len() > self.max {
            while self.order.len() > self.keep {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for BoundedDedup<K> {
    fn default() -> Self {
        Self::new(10_000, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_rejected() {
        let mut d = BoundedDedup::new(10, 5);
        assert!(d.insert(("tx", 1)));
        assert!(!d.insert(("tx", 1)));
        assert!(d.insert(("tx", 2)));
    }

    #[test]
    fn test_trims_to_newest_when_over_capacity() {
        let mut d = BoundedDedup::new(10, 5);
        for i in 0..10 {
            d.insert(i);
        }
        assert_eq!(d.len(), 10);

        d.insert(10);
        assert_eq!(d.len(), 5);
        assert!(!d.contains(&5));
        assert!(d.contains(&6));
        assert!(d.contains(&10));

        // forgotten keys are accepted again
        assert!(d.insert(0));
    }
}
