use std::{sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    dbhq_common::{CoreEvent, Error, Result, RouteKey, TelemetrySink},
    tokio::time::Instant,
    tracing::{debug, warn},
};

use crate::{
    bucket::{Bucket, BucketConfig, BucketSnapshot},
    headers::RateLimitHeaders,
};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Aggregate requests per second across all routes.
    pub global_per_second: u32,
    /// Budget assumed for a route until its first response advertises one.
    pub default_route: BucketConfig,
    /// Longest an `acquire` may wait before failing.
    pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_second: 50,
            default_route: BucketConfig::per_window(5, Duration::from_secs(5)),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-route buckets plus one global bucket.
///
/// A request needs a token from both. Tokens are taken from the two buckets
/// under both locks at once, so a request never holds a route token while
/// waiting on the global bucket.
pub struct RateLimiter {
    config: RateLimitConfig,
    routes: DashMap<RouteKey, Arc<Bucket>>,
    global: Bucket,
    sink: Arc<dyn TelemetrySink>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        let global = Bucket::new(BucketConfig::per_window(
            config.global_per_second.max(1),
            Duration::from_secs(1),
        ));
        Self {
            config,
            routes: DashMap::new(),
            global,
            sink,
        }
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.config.acquire_timeout
    }

    fn bucket(&self, route: &RouteKey) -> Arc<Bucket> {
        Arc::clone(
            self.routes
                .entry(route.clone())
                .or_insert_with(|| Arc::new(Bucket::new(self.config.default_route)))
                .value(),
        )
    }

    /// Pre-seed a route with a known budget, replacing any existing bucket.
    pub fn configure_route(&self, route: RouteKey, config: BucketConfig) {
        self.routes.insert(route, Arc::new(Bucket::new(config)));
    }

    /// Wait for a token on `route` and on the global bucket.
    ///
    /// Returns the time spent waiting. Fails with
    /// [`Error::RateLimitTimeout`] as soon as it is clear the token would not
    /// arrive within `timeout`, without sleeping out the remainder.
    pub async fn acquire(&self, route: &RouteKey, timeout: Duration) -> Result<Duration> {
        let bucket = self.bucket(route);
        let start = Instant::now();

        loop {
            let now = Instant::now();
            let wait = {
                let mut route_state = bucket.lock();
                let mut global_state = self.global.lock();
                let wait = route_state.wait(now).max(global_state.wait(now));
                if wait.is_zero() {
                    route_state.take();
                    global_state.take();
                }
                wait
            };

            if wait.is_zero() {
                let waited = start.elapsed();
                if !waited.is_zero() {
                    self.sink.emit(&CoreEvent::RateLimitWait {
                        route: route.to_string(),
                        waited,
                    });
                }
                return Ok(waited);
            }

            if start.elapsed() + wait > timeout {
                debug!(route = %route, wait_ms = wait.as_millis() as u64, "rate limit wait exceeds timeout");
                return Err(Error::RateLimitTimeout {
                    route: route.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant of [`RateLimiter::acquire`].
    pub fn try_acquire(&self, route: &RouteKey) -> bool {
        let bucket = self.bucket(route);
        let now = Instant::now();
        let mut route_state = bucket.lock();
        let mut global_state = self.global.lock();
        if route_state.wait(now).is_zero() && global_state.wait(now).is_zero() {
            route_state.take();
            global_state.take();
            true
        } else {
            false
        }
    }

    /// Feed response headers back into the route's bucket.
    pub fn observe(&self, route: &RouteKey, headers: &RateLimitHeaders) {
        if !headers.has_bucket_info() {
            return;
        }
        self.bucket(route)
            .observe(headers.limit, headers.remaining, headers.reset_after);
    }

    /// Apply an explicit "retry after" from the remote side.
    ///
    /// The remote signal wins over the local estimate: the bucket is drained
    /// and no token is handed out before `now + retry_after`.
    pub fn penalize(&self, route: &RouteKey, retry_after: Duration, global: bool) {
        warn!(route = %route, global, retry_after_ms = retry_after.as_millis() as u64, "remote rate limit hit");
        if global {
            self.global.penalize(retry_after);
        } else {
            self.bucket(route).penalize(retry_after);
        }
        self.sink.emit(&CoreEvent::RateLimitHit {
            route: route.to_string(),
            retry_after,
            global,
        });
    }

    #[must_use]
    pub fn route_snapshot(&self, route: &RouteKey) -> Option<BucketSnapshot> {
        self.routes.get(route).map(|b| b.snapshot())
    }

    #[must_use]
    pub fn global_snapshot(&self) -> BucketSnapshot {
        self.global.snapshot()
    }
}
