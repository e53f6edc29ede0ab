//! Fixed-capacity ring of buckets forming the sliding window.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::bucket::Bucket;

/// A bucket together with the change number it carried when observed.
pub(crate) type Observed = (Arc<Bucket>, u64);

/// Ordered buckets, oldest at the front and newest at the back.
///
/// The lock only guards the deque itself and is held for a push, a pop or a
/// snapshot. Bucket contents are read and written without it; readers use
/// [`Bucket::change_number`] to notice a bucket that was recycled while they
/// were looking at it.
pub struct BucketRing {
    buckets: RwLock<VecDeque<Arc<Bucket>>>,
    capacity: usize,
    max_recycle_count: u32,
    last_change_number: AtomicU64,
}

impl BucketRing {
    /// Creates a ring holding one bucket, or `capacity` buckets if `prefill`.
    pub fn new(capacity: usize, max_recycle_count: u32, prefill: bool) -> Self {
        let capacity = capacity.max(1);
        let ring = Self {
            buckets: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            max_recycle_count,
            last_change_number: AtomicU64::new(0),
        };
        let initial = if prefill { capacity } else { 1 };
        {
            let mut buckets = ring.buckets.write();
            for _ in 0..initial {
                buckets.push_back(Arc::new(Bucket::new(ring.next_change_number())));
            }
        }
        ring
    }

    fn next_change_number(&self) -> u64 {
        self.last_change_number.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Advances the window by one bucket.
    ///
    /// At capacity the oldest bucket is evicted, recycled and reinserted as
    /// the newest; below capacity a fresh bucket is appended. Returns `true`
    /// when a bucket was recycled.
    ///
    /// The whole step runs under the write lock, so concurrent rotations
    /// never grow the ring past its capacity and readers never see it short.
    pub fn rotate(&self) -> bool {
        let mut buckets = self.buckets.write();
        if buckets.len() < self.capacity {
            buckets.push_back(Arc::new(Bucket::new(self.next_change_number())));
            return false;
        }
        let Some(oldest) = buckets.pop_front() else {
            return false;
        };
        tracing::debug!(bucket = ?oldest, "Remove oldest bucket");

        oldest.recycle(self.next_change_number(), self.max_recycle_count);
        buckets.push_back(oldest);
        true
    }

    /// The bucket currently receiving failures.
    pub fn current(&self) -> Option<Arc<Bucket>> {
        self.buckets.read().back().cloned()
    }

    /// Buckets with their change numbers, newest first.
    pub(crate) fn snapshot(&self) -> Vec<Observed> {
        self.buckets
            .read()
            .iter()
            .rev()
            .map(|bucket| (Arc::clone(bucket), bucket.change_number()))
            .collect()
    }

    /// Number of buckets currently in the ring.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Distinct addresses summed over all buckets (an address present in
    /// several buckets is counted once per bucket).
    pub fn tracked_entries(&self) -> usize {
        self.buckets.read().iter().map(|bucket| bucket.len()).sum()
    }
}
