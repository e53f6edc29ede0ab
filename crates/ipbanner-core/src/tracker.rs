//! Increment-and-evaluate over the bucket ring.
//!
//! The window is approximate: its precision is one bucket
//! (`find_time / bucket_count`). Failures recorded just before a rotation
//! may leave the window up to one bucket early or late.

use std::sync::Arc;

use crate::registry::BanRegistry;
use crate::ring::BucketRing;

/// Outcome of evaluating one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Still under the threshold; carries the aggregated count seen.
    Tolerated(u32),
    /// The threshold was exceeded and the address banned.
    Banned(u32),
}

impl Verdict {
    pub fn is_banned(self) -> bool {
        matches!(self, Self::Banned(_))
    }
}

/// Records failures in the newest bucket and bans on threshold crossing.
pub struct FailureTracker {
    ring: BucketRing,
    registry: Arc<BanRegistry>,
}

impl FailureTracker {
    pub fn new(ring: BucketRing, registry: Arc<BanRegistry>) -> Self {
        Self { ring, registry }
    }

    pub fn ring(&self) -> &BucketRing {
        &self.ring
    }

    /// Records one failure for `address` and bans it once the aggregated
    /// count over the window exceeds `max_retry`.
    ///
    /// Older buckets are summed newest first. The walk stops at the first
    /// bucket whose change number moved since the snapshot: it was recycled
    /// by a concurrent rotation, so it and every older bucket have left the
    /// window and must not contribute.
    pub fn record_and_evaluate(&self, address: &str, max_retry: u32) -> Verdict {
        let snapshot = self.ring.snapshot();
        let Some(((current, _), older)) = snapshot.split_first() else {
            return Verdict::Tolerated(0);
        };

        let mut total = current.increment_and_get(address);
        if total > max_retry {
            self.registry.ban(address);
            return Verdict::Banned(total);
        }

        for (bucket, observed) in older {
            let count = bucket.get(address);
            if bucket.change_number() != *observed {
                break;
            }
            total = total.saturating_add(count);
            if total > max_retry {
                self.registry.ban(address);
                return Verdict::Banned(total);
            }
        }

        tracing::trace!(address, total, "Evaluate aggregated failures");
        Verdict::Tolerated(total)
    }

    /// Advances the window by one bucket. See [`BucketRing::rotate`].
    pub fn rotate(&self) -> bool {
        self.ring.rotate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use std::time::Duration;

    const ADDR: &str = "9.0.0.1";

    fn tracker(bucket_count: usize) -> (FailureTracker, Arc<BanRegistry>) {
        let registry = Arc::new(BanRegistry::new(
            Duration::from_secs(4),
            Arc::new(Metrics::new()),
        ));
        let tracker = FailureTracker::new(
            BucketRing::new(bucket_count, 10, false),
            Arc::clone(&registry),
        );
        (tracker, registry)
    }

    #[test]
    fn ban_with_all_failures_in_the_sole_bucket() {
        let max_retry = 11;
        let (tracker, registry) = tracker(6);

        for i in 0..max_retry {
            let verdict = tracker.record_and_evaluate(ADDR, max_retry);
            assert_eq!(verdict, Verdict::Tolerated(i + 1));
            assert!(
                !registry.is_banned(ADDR),
                "must not be banned after {} failures",
                i + 1
            );
        }
        assert!(tracker.record_and_evaluate(ADDR, max_retry).is_banned());
        assert!(registry.is_banned(ADDR));
    }

    #[test]
    fn ban_with_one_failure_per_bucket() {
        let max_retry = 5;
        let (tracker, registry) = tracker(6);

        for i in 0..max_retry {
            tracker.record_and_evaluate(ADDR, max_retry);
            assert!(
                !registry.is_banned(ADDR),
                "must not be banned after {} failures",
                i + 1
            );
            tracker.rotate();
        }
        assert_eq!(
            tracker.record_and_evaluate(ADDR, max_retry),
            Verdict::Banned(6)
        );
        assert!(registry.is_banned(ADDR));
    }

    #[test]
    fn ban_with_one_failure_every_two_buckets() {
        let max_retry = 5;
        let (tracker, registry) = tracker(12);

        for i in 0..max_retry {
            tracker.record_and_evaluate(ADDR, max_retry);
            assert!(
                !registry.is_banned(ADDR),
                "must not be banned after {} failures",
                i + 1
            );
            tracker.rotate();
            tracker.rotate();
        }
        assert!(tracker.record_and_evaluate(ADDR, max_retry).is_banned());
        assert!(registry.is_banned(ADDR));
    }

    #[test]
    fn failures_rotated_out_are_forgotten() {
        let max_retry = 2;
        let (tracker, registry) = tracker(3);

        tracker.record_and_evaluate(ADDR, max_retry);
        tracker.record_and_evaluate(ADDR, max_retry);
        // Three rotations evict the bucket holding both failures.
        for _ in 0..3 {
            tracker.rotate();
        }
        assert_eq!(
            tracker.record_and_evaluate(ADDR, max_retry),
            Verdict::Tolerated(1)
        );
        assert_eq!(
            tracker.record_and_evaluate(ADDR, max_retry),
            Verdict::Tolerated(2)
        );
        assert!(!registry.is_banned(ADDR));
    }

    #[test]
    fn failures_spread_wider_than_window_never_ban() {
        let max_retry = 3;
        let (tracker, registry) = tracker(3);

        // One failure per bucket forever: at most 3 in the window at once.
        for _ in 0..20 {
            assert!(!tracker.record_and_evaluate(ADDR, max_retry).is_banned());
            tracker.rotate();
        }
        assert!(!registry.is_banned(ADDR));
    }

    #[test]
    fn addresses_are_counted_independently() {
        let (tracker, registry) = tracker(6);
        for _ in 0..3 {
            tracker.record_and_evaluate("10.0.0.1", 2);
        }
        tracker.record_and_evaluate("10.0.0.2", 2);
        assert!(registry.is_banned("10.0.0.1"));
        assert!(!registry.is_banned("10.0.0.2"));
    }

    #[test]
    fn zero_max_retry_bans_on_first_failure() {
        let (tracker, registry) = tracker(6);
        assert_eq!(tracker.record_and_evaluate(ADDR, 0), Verdict::Banned(1));
        assert!(registry.is_banned(ADDR));
    }

    #[test]
    fn bucket_recycled_mid_walk_is_excluded() {
        let (tracker, _registry) = tracker(3);
        tracker.record_and_evaluate(ADDR, 100);
        tracker.rotate();
        tracker.record_and_evaluate(ADDR, 100);
        tracker.rotate();

        // Snapshot as an in-flight evaluation would, then let a rotation
        // recycle the oldest bucket before the walk reaches it.
        let snapshot = tracker.ring().snapshot();
        tracker.rotate();
        let (oldest, observed) = snapshot.last().unwrap();
        assert_ne!(oldest.change_number(), *observed);
        assert_eq!(oldest.get(ADDR), 0);
    }
}
