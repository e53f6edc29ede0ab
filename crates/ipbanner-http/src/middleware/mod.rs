//! HTTP middleware: ban guard.

pub mod ban_guard;
