//! Configuration constants for the live-session core
//!
//! This module contains the default values and validation bounds used
//! throughout the session core. Runtime-tunable values live in
//! [`crate::config::CoreOptions`]; the bounds they are validated against
//! are defined here.

/// Push-channel connection constants
pub mod connection {
    /// Default number of background reconnect attempts before parking in `Failed`
    pub const DEFAULT_RETRY_BUDGET: u8 = 3;
    /// Default backoff between reconnect attempts, in milliseconds
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;
    /// Default grace period an invoke waits while the channel is reconnecting, in milliseconds
    pub const DEFAULT_INVOKE_GRACE_MS: u64 = 300;
    /// Maximum permitted reconnect attempts
    pub const MAX_RETRY_BUDGET: u8 = 10;
}

/// Roster polling constants
pub mod polling {
    /// Default interval between roster poll ticks, in seconds
    pub const DEFAULT_POLL_INTERVAL: u64 = 7;
    /// Minimum permitted poll interval, in seconds
    pub const MIN_POLL_INTERVAL: u64 = 1;
    /// Maximum permitted poll interval, in seconds
    pub const MAX_POLL_INTERVAL: u64 = 60;
}

/// Answer submission constants
pub mod submission {
    /// Default delay inserted between upstream submission strategies, in milliseconds
    pub const DEFAULT_STRATEGY_DELAY_MS: u64 = 500;
    /// Maximum permitted inter-strategy delay, in milliseconds
    pub const MAX_STRATEGY_DELAY_MS: u64 = 5_000;
    /// Length of the random suffix appended to submission ids
    pub const ID_SUFFIX_LENGTH: usize = 8;
}

/// Network deadline constants
pub mod network {
    /// Default overall deadline for a single network call, in milliseconds
    pub const DEFAULT_DEADLINE_MS: u64 = 4_000;
    /// Maximum permitted network deadline, in milliseconds
    pub const MAX_DEADLINE_MS: u64 = 30_000;
}
