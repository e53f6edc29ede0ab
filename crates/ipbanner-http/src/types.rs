//! Response bodies.

use serde::Serialize;

use ipbanner_core::State;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub state: State,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct BanStatus {
    pub address: String,
    pub banned: bool,
}
