//! Server configuration via CLI args and environment variables.

use std::time::Duration;

use clap::Parser;

use ipbanner_core::{BannerError, EngineConfig, FailurePolicy};

/// Fail2ban-style IP banning service.
#[derive(Parser, Debug, Clone)]
#[command(name = "ipbanner-server", version, about)]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "IPBANNER_HOST")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 7878, env = "IPBANNER_PORT")]
    pub port: u16,

    /// Number of buckets the find-time window is split into.
    #[arg(long, default_value_t = 6, env = "IPBANNER_BUCKET_COUNT")]
    pub bucket_count: usize,

    /// Sliding window length in seconds.
    #[arg(long, default_value_t = 600, env = "IPBANNER_FIND_TIME")]
    pub find_time: u64,

    /// Ban duration in seconds.
    #[arg(long, default_value_t = 600, env = "IPBANNER_BAN_TIME")]
    pub ban_time: u64,

    /// Failures within the window strictly above this ban the address.
    #[arg(long, default_value_t = 10, env = "IPBANNER_MAX_RETRY")]
    pub max_retry: u32,

    /// Expired-ban sweep interval in seconds.
    #[arg(long, default_value_t = 5, env = "IPBANNER_CLEANUP_INTERVAL")]
    pub cleanup_interval: u64,

    /// In-place clears of a bucket before its storage is released.
    #[arg(long, default_value_t = 10, env = "IPBANNER_MAX_BUCKET_RECYCLE_COUNT")]
    pub max_bucket_recycle_count: u32,

    /// Allocate every bucket at startup.
    #[arg(long, env = "IPBANNER_PREFILL_RING")]
    pub prefill_ring: bool,

    /// Response status codes counted as failed authentications (comma-separated).
    #[arg(long, default_value = "401,403", env = "IPBANNER_FAILURE_STATUS_CODES")]
    pub failure_status_codes: String,

    /// Log level.
    #[arg(long, default_value = "info", env = "IPBANNER_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "IPBANNER_LOG_FORMAT")]
    pub log_format: String,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Engine settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            bucket_count: self.bucket_count,
            find_time: Duration::from_secs(self.find_time),
            ban_time: Duration::from_secs(self.ban_time),
            max_retry: self.max_retry,
            cleanup_interval: Duration::from_secs(self.cleanup_interval),
            max_bucket_recycle_count: self.max_bucket_recycle_count,
            prefill_ring: self.prefill_ring,
        }
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy, BannerError> {
        FailurePolicy::parse(&self.failure_status_codes)
    }
}
