//! Engine error types.
//!
//! Every variant is a programmer error surfaced at configuration or
//! lifecycle time. Reporting failures and querying bans never fail.

use crate::engine::State;

/// Error returned by configuration and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum BannerError {
    /// A configuration value is out of range or unparseable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A structural setting was changed after the ring was built.
    #[error("can not set '{setting}', engine already initialized")]
    AlreadyInitialized { setting: &'static str },

    /// A lifecycle transition was requested from the wrong state.
    #[error("engine is {actual}, expected {expected}")]
    InvalidState { expected: State, actual: State },

    /// `start()` was called outside a Tokio runtime.
    #[error("no Tokio runtime available to schedule background tasks")]
    NoRuntime,

    /// A synchronous tracker operation was called before `initialize()`.
    #[error("engine not initialized")]
    NotInitialized,
}
