//! REST endpoints of the ban service.

pub mod bans;
pub mod system;
