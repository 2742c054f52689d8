//! Cluster defaults
//!
//! Default values used when a setting is absent from every configuration
//! source.

/// Instance discovery defaults
pub mod discovery {
    /// SRV poll interval (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 1_000;

    /// Per-server DNS query timeout (milliseconds)
    pub const QUERY_TIMEOUT_MS: u64 = 2_000;

    /// How long stop waits for the poller to exit (seconds)
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 300;

    /// Standard DNS port
    pub const DNS_PORT: u16 = 53;
}

/// Remote invoker registry defaults
pub mod registry {
    /// Full refresh interval (seconds)
    pub const REFRESH_INTERVAL_SECS: u64 = 5;

    /// Metadata fetch timeout per connection (milliseconds)
    pub const METADATA_TIMEOUT_MS: u64 = 1_000;

    /// Upper bound on one refresh cycle (milliseconds)
    pub const TOTAL_REFRESH_TIMEOUT_MS: u64 = 3_000;

    /// Invoker table report interval (seconds)
    pub const REPORT_INTERVAL_SECS: u64 = 15;

    /// How long stop waits for background tasks (seconds)
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 60;
}

/// TCP invoker defaults
pub mod invoker {
    /// Connection timeout (milliseconds)
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Request/response round trip timeout (milliseconds)
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

    /// Largest accepted frame
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
}
