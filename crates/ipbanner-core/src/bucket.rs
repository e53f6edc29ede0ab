//! A single time slice of the sliding window.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;

/// Per-address failure counts for one slice of the find-time window.
///
/// `change_number` is bumped *before* the counts are cleared on recycle, so a
/// reader that reads a count and then sees an unchanged change number knows
/// the count predates any recycle.
pub struct Bucket {
    change_number: AtomicU64,
    counts: DashMap<String, u32>,
    /// In-place clears since the map storage was last released.
    recycle_count: AtomicU32,
}

impl Bucket {
    pub(crate) fn new(change_number: u64) -> Self {
        Self {
            change_number: AtomicU64::new(change_number),
            counts: DashMap::new(),
            recycle_count: AtomicU32::new(0),
        }
    }

    /// Version stamp; strictly increases every time the counts are cleared.
    pub fn change_number(&self) -> u64 {
        self.change_number.load(Ordering::Acquire)
    }

    /// Increments and returns the failure count for `address` in this slice.
    pub fn increment_and_get(&self, address: &str) -> u32 {
        if let Some(mut count) = self.counts.get_mut(address) {
            *count = count.saturating_add(1);
            return *count;
        }
        let mut count = self.counts.entry(address.to_owned()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Current failure count for `address`, 0 if absent.
    pub fn get(&self, address: &str) -> u32 {
        self.counts.get(address).map_or(0, |count| *count)
    }

    /// Number of distinct addresses recorded in this slice.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Clears the bucket for reuse under a fresh `change_number`.
    ///
    /// The map is cleared in place; once it has been cleared more than
    /// `max_recycle_count` times its storage is released as well.
    pub(crate) fn recycle(&self, change_number: u64, max_recycle_count: u32) {
        self.change_number.store(change_number, Ordering::Release);
        self.counts.clear();

        let recycled = self.recycle_count.fetch_add(1, Ordering::Relaxed) + 1;
        if recycled > max_recycle_count {
            self.counts.shrink_to_fit();
            self.recycle_count.store(0, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("change_number", &self.change_number())
            .field("addresses", &self.counts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_starts_from_zero() {
        let bucket = Bucket::new(1);
        assert_eq!(bucket.get("10.0.0.1"), 0);
        assert_eq!(bucket.increment_and_get("10.0.0.1"), 1);
        assert_eq!(bucket.increment_and_get("10.0.0.1"), 2);
        assert_eq!(bucket.get("10.0.0.1"), 2);
        assert_eq!(bucket.get("10.0.0.2"), 0);
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn get_has_no_side_effect() {
        let bucket = Bucket::new(1);
        bucket.get("10.0.0.1");
        assert!(bucket.is_empty());
    }

    #[test]
    fn recycle_clears_and_restamps() {
        let bucket = Bucket::new(1);
        bucket.increment_and_get("10.0.0.1");
        bucket.recycle(7, 10);
        assert_eq!(bucket.change_number(), 7);
        assert_eq!(bucket.get("10.0.0.1"), 0);
        assert!(bucket.is_empty());
    }

    #[test]
    fn recycle_budget_resets_after_release() {
        let bucket = Bucket::new(1);
        for n in 2..=4 {
            bucket.increment_and_get("10.0.0.1");
            bucket.recycle(n, 2);
        }
        // Third recycle exceeded the budget of two and released storage.
        assert_eq!(bucket.recycle_count.load(Ordering::Relaxed), 0);
        bucket.recycle(5, 2);
        assert_eq!(bucket.recycle_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn zero_budget_releases_every_time() {
        let bucket = Bucket::new(1);
        bucket.increment_and_get("10.0.0.1");
        bucket.recycle(2, 0);
        assert_eq!(bucket.recycle_count.load(Ordering::Relaxed), 0);
        assert!(bucket.is_empty());
    }
}
