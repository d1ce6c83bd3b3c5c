//! Structured core events and the sink they are emitted to.

use std::time::Duration;

use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use dbhq_metrics::{actions, cache, counter, dispatch, gateway, histogram, labels, ratelimit};

use crate::{error::ErrorKind, event::EventKind, ids::EntityKey};

/// Something observable happened inside the core.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    EventReceived {
        epoch: u64,
        sequence: u64,
        kind: EventKind,
    },
    EventDuplicate {
        epoch: u64,
        sequence: u64,
    },
    EventSkipped {
        epoch: u64,
        sequence: u64,
        reason: String,
    },
    HandlerFailed {
        handler: String,
        kind: EventKind,
        error: String,
        panicked: bool,
    },
    ActionSubmitted {
        action_id: u64,
        action: &'static str,
        resource: String,
    },
    ActionSucceeded {
        action_id: u64,
        action: &'static str,
        attempts: u32,
    },
    ActionRetried {
        action_id: u64,
        action: &'static str,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    ActionFailed {
        action_id: u64,
        action: &'static str,
        attempts: u32,
        error_kind: ErrorKind,
        error: String,
    },
    ActionCancelled {
        action_id: u64,
        action: &'static str,
    },
    RateLimitWait {
        route: String,
        waited: Duration,
    },
    RateLimitHit {
        route: String,
        retry_after: Duration,
        global: bool,
    },
    SessionStateChanged {
        from: &'static str,
        to: &'static str,
    },
    Reconnect {
        attempt: u32,
        delay: Duration,
        resume: bool,
    },
    CacheEvicted {
        key: EntityKey,
    },
}

/// Receives every [`CoreEvent`]. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &CoreEvent);
}

/// Default sink: logs through `tracing` and, with the `metrics` feature,
/// bumps the matching counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: &CoreEvent) {
        match event {
            CoreEvent::EventReceived {
                epoch,
                sequence,
                kind,
            } => {
                debug!(epoch, sequence, event = %kind, "event received");
                #[cfg(feature = "metrics")]
                counter!(dispatch::EVENTS_RECEIVED_TOTAL, labels::EVENT => kind.as_str())
                    .increment(1);
            },
            CoreEvent::EventDuplicate { epoch, sequence } => {
                debug!(epoch, sequence, "duplicate event dropped");
                #[cfg(feature = "metrics")]
                counter!(dispatch::EVENTS_DUPLICATE_TOTAL).increment(1);
            },
            CoreEvent::EventSkipped {
                epoch,
                sequence,
                reason,
            } => {
                warn!(epoch, sequence, reason, "event skipped");
                #[cfg(feature = "metrics")]
                counter!(dispatch::EVENTS_SKIPPED_TOTAL).increment(1);
            },
            CoreEvent::HandlerFailed {
                handler,
                kind,
                error,
                panicked,
            } => {
                warn!(handler, event = %kind, panicked, error, "handler failed");
                #[cfg(feature = "metrics")]
                counter!(dispatch::HANDLER_FAILURES_TOTAL, labels::EVENT => kind.as_str())
                    .increment(1);
            },
            CoreEvent::ActionSubmitted {
                action_id,
                action,
                resource,
            } => {
                debug!(action_id, action, resource, "action submitted");
                #[cfg(feature = "metrics")]
                counter!(actions::SUBMITTED_TOTAL, labels::ACTION => *action).increment(1);
            },
            CoreEvent::ActionSucceeded {
                action_id,
                action,
                attempts,
            } => {
                debug!(action_id, action, attempts, "action succeeded");
                #[cfg(feature = "metrics")]
                counter!(actions::SUCCEEDED_TOTAL, labels::ACTION => *action).increment(1);
            },
            CoreEvent::ActionRetried {
                action_id,
                action,
                attempt,
                delay,
                error,
            } => {
                info!(action_id, action, attempt, delay_ms = delay.as_millis() as u64, error, "action retry scheduled");
                #[cfg(feature = "metrics")]
                counter!(actions::RETRIED_TOTAL, labels::ACTION => *action).increment(1);
            },
            CoreEvent::ActionFailed {
                action_id,
                action,
                attempts,
                error_kind,
                error,
            } => {
                warn!(action_id, action, attempts, error_kind = %error_kind, error, "action failed");
                #[cfg(feature = "metrics")]
                counter!(
                    actions::FAILED_TOTAL,
                    labels::ACTION => *action,
                    labels::ERROR_KIND => error_kind.as_str()
                )
                .increment(1);
            },
            CoreEvent::ActionCancelled { action_id, action } => {
                debug!(action_id, action, "action cancelled");
                #[cfg(feature = "metrics")]
                counter!(actions::CANCELLED_TOTAL, labels::ACTION => *action).increment(1);
            },
            CoreEvent::RateLimitWait { route, waited } => {
                debug!(route, waited_ms = waited.as_millis() as u64, "waited for rate limit token");
                #[cfg(feature = "metrics")]
                histogram!(ratelimit::WAIT_SECONDS).record(waited.as_secs_f64());
            },
            CoreEvent::RateLimitHit {
                route,
                retry_after,
                global,
            } => {
                warn!(route, global, retry_after_ms = retry_after.as_millis() as u64, "rate limited by remote");
                #[cfg(feature = "metrics")]
                counter!(
                    ratelimit::HITS_TOTAL,
                    labels::SCOPE => if *global { "global" } else { "route" }
                )
                .increment(1);
            },
            CoreEvent::SessionStateChanged { from, to } => {
                info!(from, to, "gateway session state changed");
                #[cfg(feature = "metrics")]
                {
                    counter!(gateway::STATE_TRANSITIONS_TOTAL, labels::STATE => *to).increment(1);
                    // Degraded is only entered on an unacknowledged heartbeat.
                    if *to == "degraded" {
                        counter!(gateway::MISSED_HEARTBEATS_TOTAL).increment(1);
                    }
                }
            },
            CoreEvent::Reconnect {
                attempt,
                delay,
                resume,
            } => {
                info!(attempt, resume, delay_ms = delay.as_millis() as u64, "gateway reconnecting");
                #[cfg(feature = "metrics")]
                counter!(
                    gateway::RECONNECTS_TOTAL,
                    labels::RESUME => if *resume { "true" } else { "false" }
                )
                .increment(1);
            },
            CoreEvent::CacheEvicted { key } => {
                debug!(key = %key, "cache entry evicted");
                #[cfg(feature = "metrics")]
                counter!(cache::EVICTIONS_TOTAL, labels::ENTITY => key.kind.as_str()).increment(1);
            },
        }
    }
}
