use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    dbhq_common::{RestClient, RestRequest, RestResponse, Result},
    tracing::debug,
};

use crate::{headers::RateLimitHeaders, limiter::RateLimiter};

/// A [`RestClient`] that goes through the [`RateLimiter`] on every call.
///
/// `send` is acquire, execute, observe, classify: non-2xx responses come back
/// as the matching error kind, and a 429 penalizes the bucket before the
/// error is returned.
#[derive(Clone)]
pub struct LimitedRest {
    inner: Arc<dyn RestClient>,
    limiter: Arc<RateLimiter>,
}

impl LimitedRest {
    #[must_use]
    pub fn new(inner: Arc<dyn RestClient>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn send(&self, request: &RestRequest) -> Result<RestResponse> {
        let response = self.execute(request).await?;
        response.error_for_status()
    }
}

#[async_trait]
impl RestClient for LimitedRest {
    /// Rate-limited execution without status classification.
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse> {
        self.limiter
            .acquire(&request.route, self.limiter.acquire_timeout())
            .await?;

        let response = self.inner.execute(request).await?;
        let headers = RateLimitHeaders::parse(&response.headers);
        self.limiter.observe(&request.route, &headers);

        if response.status == 429 {
            let retry_after = response
                .retry_after()
                .or(headers.retry_after)
                .unwrap_or(Duration::from_secs(1));
            self.limiter
                .penalize(&request.route, retry_after, response.is_global_limit());
        }
        debug!(route = %request.route, status = response.status, "rest call completed");
        Ok(response)
    }
}
