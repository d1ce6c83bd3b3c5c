//! Metric name and label definitions.
//!
//! Centralizing these keeps names consistent between the crates that record
//! them and whatever scrapes them.

/// Gateway session metrics
pub mod gateway {
    /// Session state transitions, labelled by target state
    pub const STATE_TRANSITIONS_TOTAL: &str = "dbhq_gateway_state_transitions_total";
    /// Reconnect attempts, labelled by whether a resume was attempted
    pub const RECONNECTS_TOTAL: &str = "dbhq_gateway_reconnects_total";
    /// Heartbeats sent without a matching ACK
    pub const MISSED_HEARTBEATS_TOTAL: &str = "dbhq_gateway_missed_heartbeats_total";
}

/// Event dispatch metrics
pub mod dispatch {
    /// Events accepted for processing, labelled by event kind
    pub const EVENTS_RECEIVED_TOTAL: &str = "dbhq_dispatch_events_received_total";
    /// Events dropped as re-deliveries of an already processed sequence
    pub const EVENTS_DUPLICATE_TOTAL: &str = "dbhq_dispatch_events_duplicate_total";
    /// Events skipped because they could not be decoded
    pub const EVENTS_SKIPPED_TOTAL: &str = "dbhq_dispatch_events_skipped_total";
    /// Handler failures and panics
    pub const HANDLER_FAILURES_TOTAL: &str = "dbhq_dispatch_handler_failures_total";
}

/// Action queue metrics
pub mod actions {
    pub const SUBMITTED_TOTAL: &str = "dbhq_actions_submitted_total";
    pub const SUCCEEDED_TOTAL: &str = "dbhq_actions_succeeded_total";
    pub const RETRIED_TOTAL: &str = "dbhq_actions_retried_total";
    /// Terminal failures, labelled by error kind
    pub const FAILED_TOTAL: &str = "dbhq_actions_failed_total";
    pub const CANCELLED_TOTAL: &str = "dbhq_actions_cancelled_total";
}

/// Rate limiter metrics
pub mod ratelimit {
    /// Time spent waiting for a token, in seconds
    pub const WAIT_SECONDS: &str = "dbhq_ratelimit_wait_seconds";
    /// 429 responses received, labelled by scope (route or global)
    pub const HITS_TOTAL: &str = "dbhq_ratelimit_hits_total";
}

/// State cache metrics
pub mod cache {
    /// Entries dropped by LRU pressure, labelled by entity kind
    pub const EVICTIONS_TOTAL: &str = "dbhq_cache_evictions_total";
}

/// Common label keys
pub mod labels {
    pub const EVENT: &str = "event";
    pub const ACTION: &str = "action";
    pub const ERROR_KIND: &str = "error_kind";
    pub const ENTITY: &str = "entity";
    pub const STATE: &str = "state";
    pub const SCOPE: &str = "scope";
    pub const RESUME: &str = "resume";
}

/// Histogram bucket boundaries
pub mod buckets {
    /// Rate-limit wait buckets (in seconds)
    /// Covers 1ms to 1 minute
    pub const RATE_LIMIT_WAIT: &[f64] = &[
        0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
}
