use std::time::Duration;

use thiserror::Error;

/// Field-less discriminant of [`Error`], used for matching and telemetry labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    RateLimitTimeout,
    PermissionDenied,
    NotFound,
    Conflict,
    Rejected,
    AuthFailure,
    HandlerPanic,
    Malformed,
    Cancelled,
    ShuttingDown,
    Other,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::RateLimitTimeout => "rate_limit_timeout",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
            Self::AuthFailure => "auth_failure",
            Self::HandlerPanic => "handler_panic",
            Self::Malformed => "malformed",
            Self::Cancelled => "cancelled",
            Self::ShuttingDown => "shutting_down",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Connection reset, timeout, DNS failure, or a 5xx from the remote side.
    #[error("transient network failure: {message}")]
    TransientNetwork { message: String },

    /// The remote service asked us to back off.
    #[error("rate limited (global: {global}), retry after {retry_after:?}")]
    RateLimited { retry_after: Duration, global: bool },

    /// A local bucket could not hand out a token within the caller's deadline.
    #[error("rate limit wait for {route} would exceed {timeout:?}")]
    RateLimitTimeout { route: String, timeout: Duration },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Any other 4xx the remote side refused outright.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("handler {handler} panicked: {message}")]
    HandlerPanic { handler: String, message: String },

    #[error("malformed payload: {message}")]
    Malformed { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::TransientNetwork {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn malformed(message: impl std::fmt::Display) -> Self {
        Self::Malformed {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn auth(message: impl std::fmt::Display) -> Self {
        Self::AuthFailure {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::RateLimitTimeout { .. } => ErrorKind::RateLimitTimeout,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::AuthFailure { .. } => ErrorKind::AuthFailure,
            Self::HandlerPanic { .. } => ErrorKind::HandlerPanic,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
            Self::Message(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Other,
        }
    }

    /// Whether an outbound action failing with this error may be attempted again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::RateLimited | ErrorKind::RateLimitTimeout
        )
    }

    /// Delay mandated by the remote side, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Failures suggesting the local mirror of the target has drifted.
    #[must_use]
    pub fn should_reconcile(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Conflict)
    }

    /// Errors that must terminate a gateway session instead of reconnecting.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::AuthFailure
    }

    /// Classify a non-success HTTP status. `retry_after` is only consulted for 429.
    #[must_use]
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
        global: bool,
    ) -> Self {
        let message = message.into();
        match status {
            401 => Self::AuthFailure { message },
            403 => Self::PermissionDenied { message },
            404 => Self::NotFound { message },
            409 => Self::Conflict { message },
            429 => Self::RateLimited {
                retry_after: retry_after.unwrap_or(Duration::from_secs(1)),
                global,
            },
            408 | 500..=599 => Self::TransientNetwork {
                message: format!("status {status}: {message}"),
            },
            _ => Self::Rejected { status, message },
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// dbhq_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
