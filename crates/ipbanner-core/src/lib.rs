//! ipbanner core: adaptive, fail2ban-style IP banning.
//!
//! Observes authentication failures per source address over a sliding
//! window and temporarily bans addresses whose failure count exceeds a
//! threshold:
//!
//! - [`bucket`] / [`ring`]: the window, as a ring of per-slice counters
//!   rotated on a timer.
//! - [`tracker`]: increment-and-evaluate across the ring.
//! - [`ingest`]: unbounded queue plus a single consumer task.
//! - [`registry`]: banned addresses with lazy and swept expiry.
//! - [`engine`]: configuration, lifecycle and the public [`IpBanner`].
//!
//! **Zero transport dependencies**: the HTTP adapter lives in
//! `ipbanner-http`. Addresses are opaque strings.

pub mod bucket;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod registry;
pub mod ring;
pub mod tracker;

pub use classify::FailurePolicy;
pub use config::EngineConfig;
pub use engine::{BannerStats, IpBanner, State};
pub use error::BannerError;
pub use tracker::Verdict;
