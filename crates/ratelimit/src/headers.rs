//! Discord rate limit header parsing.

use std::{collections::HashMap, time::Duration};

use dbhq_common::delay_from_secs;

/// Rate limit metadata carried on every REST response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Requests allowed per window.
    pub limit: Option<u32>,
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
    /// Opaque bucket hash shared by routes the remote side groups together.
    pub bucket: Option<String>,
    /// Delay demanded by a 429.
    pub retry_after: Option<Duration>,
    /// The 429 applies to the whole application.
    pub global: bool,
    /// `user`, `global` or `shared`.
    pub scope: Option<String>,
}

impl RateLimitHeaders {
    /// Parse from lower-cased header names.
    #[must_use]
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        Self {
            limit: parse_u32(headers, "x-ratelimit-limit"),
            remaining: parse_u32(headers, "x-ratelimit-remaining"),
            reset_after: parse_secs(headers, "x-ratelimit-reset-after"),
            bucket: headers.get("x-ratelimit-bucket").cloned(),
            retry_after: parse_secs(headers, "retry-after"),
            global: headers
                .get("x-ratelimit-global")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: headers.get("x-ratelimit-scope").cloned(),
        }
    }

    /// Whether the response carried any bucket information at all.
    #[must_use]
    pub fn has_bucket_info(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset_after.is_some()
    }
}

fn parse_u32(headers: &HashMap<String, String>, name: &str) -> Option<u32> {
    headers.get(name)?.trim().parse().ok()
}

/// Seconds with an optional fractional part, e.g. `"1.337"`.
fn parse_secs(headers: &HashMap<String, String>, name: &str) -> Option<Duration> {
    let secs: f64 = headers.get(name)?.trim().parse().ok()?;
    delay_from_secs(secs)
}
