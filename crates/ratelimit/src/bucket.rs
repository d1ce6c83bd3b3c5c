//! Token bucket with remote overrides.
//!
//! Tokens come back in whole windows: every `refill_interval` the bucket gains
//! `refill_amount` tokens up to `capacity`. Two remote signals override the
//! local estimate: [`Bucket::observe`] adopts the advertised limit, remaining
//! count and reset time, and [`Bucket::penalize`] empties the bucket and
//! refuses every acquire until the given instant.

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use {dbhq_common::MAX_REMOTE_DELAY, tokio::time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub capacity: u32,
    pub refill_amount: u32,
    pub refill_interval: Duration,
}

impl BucketConfig {
    /// `requests` tokens per `window`, starting full.
    #[must_use]
    pub const fn per_window(requests: u32, window: Duration) -> Self {
        Self {
            capacity: requests,
            refill_amount: requests,
            refill_interval: window,
        }
    }
}

/// Point-in-time view of a bucket, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub capacity: u32,
    pub tokens: u32,
    pub blocked: bool,
}

#[derive(Debug)]
pub(crate) struct BucketState {
    capacity: u32,
    refill_amount: u32,
    refill_interval: Duration,
    tokens: u32,
    next_refill: Instant,
    blocked_until: Option<Instant>,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        if let Some(until) = self.blocked_until {
            if now < until {
                return;
            }
            // Penalty over: the remote side has opened a fresh window.
            self.blocked_until = None;
            self.tokens = self.refill_amount.min(self.capacity);
            self.next_refill = until + self.refill_interval;
        }

        if now < self.next_refill || self.refill_interval.is_zero() {
            return;
        }
        let behind = now.duration_since(self.next_refill);
        let periods = u32::try_from(behind.as_nanos() / self.refill_interval.as_nanos())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        self.tokens = self
            .tokens
            .saturating_add(periods.saturating_mul(self.refill_amount))
            .min(self.capacity);
        self.next_refill += self.refill_interval.saturating_mul(periods);
    }

    /// Time until a token could be taken; zero when one is available now.
    pub(crate) fn wait(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if let Some(until) = self.blocked_until {
            return until.duration_since(now);
        }
        if self.tokens > 0 {
            Duration::ZERO
        } else {
            self.next_refill.saturating_duration_since(now)
        }
    }

    /// Consume one token. Callers check [`BucketState::wait`] first.
    pub(crate) fn take(&mut self) {
        self.tokens = self.tokens.saturating_sub(1);
    }
}

#[derive(Debug)]
pub struct Bucket {
    state: Mutex<BucketState>,
}

impl Bucket {
    #[must_use]
    pub fn new(config: BucketConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                capacity: config.capacity,
                refill_amount: config.refill_amount,
                refill_interval: config.refill_interval,
                tokens: config.capacity,
                next_refill: Instant::now() + config.refill_interval,
                blocked_until: None,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        if state.wait(Instant::now()).is_zero() {
            state.take();
            true
        } else {
            false
        }
    }

    /// Adopt the remote side's view of this bucket.
    ///
    /// `remaining` only ever lowers the local count: a response can be older
    /// than requests already admitted locally.
    pub fn observe(&self, limit: Option<u32>, remaining: Option<u32>, reset_after: Option<Duration>) {
        let now = Instant::now();
        let mut state = self.lock();
        state.refill(now);
        if let Some(limit) = limit.filter(|l| *l > 0) {
            state.capacity = limit;
            state.refill_amount = limit;
            state.tokens = state.tokens.min(limit);
        }
        if let Some(remaining) = remaining {
            state.tokens = state.tokens.min(remaining);
        }
        if let Some(reset_after) = reset_after {
            state.next_refill = now + reset_after.min(MAX_REMOTE_DELAY);
        }
    }

    /// Drain the bucket and refuse tokens until `now + retry_after`.
    pub fn penalize(&self, retry_after: Duration) {
        let until = Instant::now() + retry_after.min(MAX_REMOTE_DELAY);
        let mut state = self.lock();
        state.tokens = 0;
        state.blocked_until = Some(state.blocked_until.map_or(until, |prev| prev.max(until)));
    }

    #[must_use]
    pub fn snapshot(&self) -> BucketSnapshot {
        let now = Instant::now();
        let mut state = self.lock();
        state.refill(now);
        BucketSnapshot {
            capacity: state.capacity,
            tokens: state.tokens,
            blocked: state.blocked_until.is_some(),
        }
    }
}
