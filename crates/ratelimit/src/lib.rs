//! Outbound rate limiting.
//!
//! Every REST call acquires a token from its route bucket and from the global
//! bucket before it is sent. Response headers feed the buckets back with the
//! remote side's own view of the budget, and an explicit 429 drains and blocks
//! the affected bucket until the mandated delay has passed.

pub mod backoff;
pub mod bucket;
pub mod headers;
pub mod limiter;
pub mod rest;

pub use {
    backoff::ExponentialBackoff,
    bucket::{BucketConfig, BucketSnapshot},
    headers::RateLimitHeaders,
    limiter::{RateLimitConfig, RateLimiter},
    rest::LimitedRest,
};
