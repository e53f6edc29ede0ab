//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BannerError;

/// Tunables for a single [`IpBanner`](crate::IpBanner) engine.
///
/// Durations are (de)serialized as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of buckets the find-time window is split into.
    pub bucket_count: usize,
    /// Length of the sliding window over which failures are aggregated.
    #[serde(with = "secs")]
    pub find_time: Duration,
    /// How long an address stays banned after crossing the threshold.
    #[serde(with = "secs")]
    pub ban_time: Duration,
    /// Failures strictly greater than this ban the address.
    pub max_retry: u32,
    /// Period of the expired-ban sweep.
    #[serde(with = "secs")]
    pub cleanup_interval: Duration,
    /// In-place clears a bucket map may undergo before its storage is
    /// released. `0` releases on every recycle.
    pub max_bucket_recycle_count: u32,
    /// Allocate all buckets up front instead of growing the ring on rotation.
    pub prefill_ring: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bucket_count: 6,
            find_time: Duration::from_secs(600),
            ban_time: Duration::from_secs(600),
            max_retry: 10,
            cleanup_interval: Duration::from_secs(5),
            max_bucket_recycle_count: 10,
            prefill_ring: false,
        }
    }
}

impl EngineConfig {
    /// Checks that the window, bucket and sweep settings are usable.
    pub fn validate(&self) -> Result<(), BannerError> {
        if self.bucket_count == 0 {
            return Err(BannerError::InvalidConfig(
                "bucket_count must be at least 1".to_owned(),
            ));
        }
        if self.find_time.is_zero() {
            return Err(BannerError::InvalidConfig(
                "find_time must be greater than zero".to_owned(),
            ));
        }
        if self.rotation_period() < Duration::from_millis(1) {
            return Err(BannerError::InvalidConfig(format!(
                "find_time {:?} is too short for {} buckets",
                self.find_time, self.bucket_count
            )));
        }
        if self.cleanup_interval.is_zero() {
            return Err(BannerError::InvalidConfig(
                "cleanup_interval must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Time covered by one bucket, which is also the rotation period.
    pub fn rotation_period(&self) -> Duration {
        self.find_time / self.bucket_count.max(1) as u32
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
