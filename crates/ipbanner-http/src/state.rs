//! HTTP application state: wraps the engine with HTTP-specific fields.
//!
//! `AppState` derefs to [`IpBanner`], so handlers call engine methods
//! directly.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use ipbanner_core::{FailurePolicy, IpBanner};

/// Shared HTTP application state, cloneable across handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    banner: IpBanner,
    policy: FailurePolicy,
    start_time: Instant,
}

impl Deref for AppState {
    type Target = IpBanner;

    fn deref(&self) -> &IpBanner {
        &self.inner.banner
    }
}

impl AppState {
    pub fn new(banner: IpBanner, policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(AppInner {
                banner,
                policy,
                start_time: Instant::now(),
            }),
        }
    }

    /// Returns which responses count as failed authentications.
    pub fn policy(&self) -> &FailurePolicy {
        &self.inner.policy
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
