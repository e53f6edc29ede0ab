//! Banned addresses with their banishment time.
//!
//! Expired entries are removed lazily when queried and eagerly by the
//! periodic [`sweep`](BanRegistry::sweep). Both paths only remove the exact
//! entry they judged expired, so a ban refreshed concurrently survives.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metrics::Metrics;

/// Concurrent map of `address → banishment time`.
pub struct BanRegistry {
    bans: DashMap<String, Instant>,
    ban_time_ms: AtomicU64,
    metrics: Arc<Metrics>,
}

impl BanRegistry {
    pub fn new(ban_time: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            bans: DashMap::new(),
            ban_time_ms: AtomicU64::new(ban_time.as_millis() as u64),
            metrics,
        }
    }

    pub fn ban_time(&self) -> Duration {
        Duration::from_millis(self.ban_time_ms.load(Ordering::Relaxed))
    }

    pub fn set_ban_time(&self, ban_time: Duration) {
        self.ban_time_ms
            .store(ban_time.as_millis() as u64, Ordering::Relaxed);
    }

    /// Bans `address` from now on. Re-banning refreshes the timestamp.
    pub fn ban(&self, address: &str) {
        tracing::info!(address, "Ban");
        let now = Instant::now();
        match self.bans.get_mut(address) {
            Some(mut since) => {
                // Never move a concurrent, later ban backwards.
                if *since < now {
                    *since = now;
                }
            }
            None => {
                self.bans
                    .entry(address.to_owned())
                    .and_modify(|since| {
                        if *since < now {
                            *since = now;
                        }
                    })
                    .or_insert(now);
            }
        }
        self.metrics.record_ban();
    }

    /// Returns whether `address` is banned, removing the entry if expired.
    pub fn is_banned(&self, address: &str) -> bool {
        let Some(since) = self.bans.get(address).map(|entry| *entry) else {
            return false;
        };

        if since.elapsed() > self.ban_time() {
            if self
                .bans
                .remove_if(address, |_, current| *current == since)
                .is_some()
            {
                self.metrics.record_unbans(1);
                tracing::debug!(address, "Unban");
            }
            false
        } else {
            true
        }
    }

    /// Removes every expired entry. Returns the count removed.
    pub fn sweep(&self) -> usize {
        let ban_time = self.ban_time();
        let before = self.bans.len();
        // `retain` judges and removes each entry under its shard lock, so a
        // refreshed timestamp is always the one evaluated.
        self.bans.retain(|address, since| {
            let keep = since.elapsed() <= ban_time;
            if !keep {
                tracing::trace!(address = %address, "Reenable banned address");
            }
            keep
        });
        let removed = before.saturating_sub(self.bans.len());
        self.metrics.record_unbans(removed as u64);
        removed
    }

    /// Banishment time of `address`, expired or not.
    pub fn banned_since(&self, address: &str) -> Option<Instant> {
        self.bans.get(address).map(|entry| *entry)
    }

    /// Entries currently held, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}
