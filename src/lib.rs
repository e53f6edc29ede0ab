//! ipbanner server: a standalone fail2ban-style ban service.
//!
//! The engine lives in `ipbanner-core` and the REST surface in
//! `ipbanner-http`; this crate adds configuration and process wiring.

pub mod config;

pub use ipbanner_http::{AppState, router};

use ipbanner_core::{BannerError, IpBanner};

use config::Config;

/// Builds and starts the engine described by `config`.
///
/// Must be called within a Tokio runtime.
pub fn start(config: &Config) -> Result<AppState, BannerError> {
    let policy = config.failure_policy()?;
    let banner = IpBanner::start_with(config.engine_config())?;
    Ok(AppState::new(banner, policy))
}
