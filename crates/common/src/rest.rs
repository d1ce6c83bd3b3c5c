//! The thin REST boundary every outbound call goes through.

use std::{collections::HashMap, fmt, time::Duration};

use {async_trait::async_trait, serde_json::Value};

use crate::error::{Error, Result};

/// Longest remote-mandated delay taken at face value.
pub const MAX_REMOTE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Convert a remote delay in (fractional) seconds, clamped to
/// [`MAX_REMOTE_DELAY`]. Negative, NaN and infinite values are rejected.
#[must_use]
pub fn delay_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .map(|delay| delay.min(MAX_REMOTE_DELAY))
        .or_else(|| (secs.is_finite() && secs > 0.0).then_some(MAX_REMOTE_DELAY))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate-limit bucket identity: method plus path template.
///
/// The major parameter (channel, guild) stays concrete because the remote side
/// keeps separate budgets per channel and per guild; minor parameters are
/// templated, e.g. `DELETE /channels/7/messages/{message_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    #[must_use]
    pub fn new(method: Method, template: impl AsRef<str>) -> Self {
        Self(format!("{method} {}", template.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    /// Concrete path, relative to the API base URL.
    pub path: String,
    pub route: RouteKey,
    pub body: Option<Value>,
    /// Audit-log reason attached to moderation requests.
    pub reason: Option<String>,
}

impl RestRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, route: RouteKey) -> Self {
        Self {
            method,
            path: path.into(),
            route,
            body: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestResponse {
    pub status: u16,
    /// Header names are lower-cased by the client.
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RestResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Value::Null,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Remote-mandated delay from `Retry-After` or the JSON body, in seconds.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .or_else(|| self.body.get("retry_after").and_then(Value::as_f64))
            .and_then(delay_from_secs)
    }

    /// Whether a 429 applies to the whole application rather than one route.
    #[must_use]
    pub fn is_global_limit(&self) -> bool {
        self.header("x-ratelimit-global")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
            || self
                .body
                .get("global")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Turn a non-2xx response into the matching [`Error`] kind.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = self
            .body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| self.body.to_string());
        Err(Error::from_status(
            self.status,
            message,
            self.retry_after(),
            self.is_global_limit(),
        ))
    }
}

/// Executes a single HTTP request against the platform API.
///
/// `Err` is reserved for network-level failures (connect, timeout, TLS),
/// which implementations report as [`Error::TransientNetwork`]. Application
/// failures come back as `Ok` with a 4xx/5xx status so the caller can read the
/// rate-limit headers on them.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse>;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::error::ErrorKind, serde_json::json};

    #[test]
    fn route_key_keeps_major_parameter() {
        let key = RouteKey::new(Method::Delete, "/channels/7/messages/{message_id}");
        assert_eq!(key.as_str(), "DELETE /channels/7/messages/{message_id}");
    }

    #[test]
    fn retry_after_from_header_or_body() {
        let from_header = RestResponse::new(429).with_header("Retry-After", "2");
        assert_eq!(from_header.retry_after(), Some(Duration::from_secs(2)));

        let from_body = RestResponse::new(429).with_body(json!({"retry_after": 0.25, "global": true}));
        assert_eq!(from_body.retry_after(), Some(Duration::from_millis(250)));
        assert!(from_body.is_global_limit());
    }

    #[test]
    fn oversized_retry_after_is_clamped() {
        let huge = RestResponse::new(429).with_header("Retry-After", "1e20");
        assert_eq!(huge.retry_after(), Some(MAX_REMOTE_DELAY));

        let bogus = RestResponse::new(429).with_header("Retry-After", "-3");
        assert_eq!(bogus.retry_after(), None);
        assert_eq!(delay_from_secs(f64::NAN), None);
        assert_eq!(delay_from_secs(f64::INFINITY), None);
    }

    #[test]
    fn error_for_status_uses_body_message() {
        let err = RestResponse::new(403)
            .with_body(json!({"message": "Missing Permissions", "code": 50013}))
            .error_for_status()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.to_string().contains("Missing Permissions"));
    }

    #[test]
    fn success_passes_through() {
        assert!(RestResponse::new(204).error_for_status().is_ok());
    }
}
