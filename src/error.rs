use std::{sync::Arc, time::Duration};

use reqwest::header::HeaderMap;

use crate::Payload;

/// Error type returned by this crate.
///
/// Every failure is classified exactly once per attempt. The value is
/// `Clone` so that a deduplicated transfer can hand the same failure to
/// every caller waiting on it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never reached the server or the connection broke mid-transfer.
    #[error("network error: {0}")]
    Network(String),
    /// The transfer did not finish within the effective timeout.
    #[error("request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// The transfer was aborted through a cancellation token.
    #[error("request was cancelled")]
    Cancelled,
    /// Non-success HTTP status with the parsed response body.
    #[error("http error {status}: {status_text}")]
    Http {
        status: u16,
        status_text: String,
        body: Payload,
        headers: HeaderMap,
    },
    /// Rejected locally by the sliding-window rate limiter; nothing was sent.
    #[error("rate limit exceeded for {key}: {limit} requests per {} ms", .window.as_millis())]
    RateLimitExceeded {
        key: String,
        limit: usize,
        window: Duration,
    },
    /// The server answered 429 Too Many Requests.
    #[error("rate limited by server")]
    ServerRateLimited {
        /// Parsed `Retry-After` header, if the server sent one in seconds.
        retry_after: Option<Duration>,
    },
    /// Error raised by an interceptor, passed through unchanged.
    #[error("application error: {0}")]
    Application(Arc<dyn std::error::Error + Send + Sync>),
    /// The descriptor could not be turned into a transfer.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A cache eviction pattern was not a valid regular expression.
    #[error("invalid cache pattern: {0}")]
    InvalidPattern(String),
    /// The payload could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Wraps an arbitrary error raised by application code, typically an interceptor.
    pub fn application<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Application(Arc::new(err))
    }

    /// Whether another attempt may succeed.
    ///
    /// Network failures, timeouts, 5xx, 408 and 429 are retryable; every
    /// other 4xx and all locally produced errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::ServerRateLimited { .. } => true,
            Self::Cancelled
            | Self::RateLimitExceeded { .. }
            | Self::Application(_)
            | Self::InvalidRequest(_)
            | Self::InvalidPattern(_)
            | Self::Decode(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether this is a local or server-side rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::ServerRateLimited { .. }
        )
    }

    /// HTTP status carried by the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::ServerRateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn status_text(&self) -> Option<&str> {
        match self {
            Self::Http { status_text, .. } => Some(status_text),
            _ => None,
        }
    }

    /// Parsed body of a non-success response.
    pub fn response_body(&self) -> Option<&Payload> {
        match self {
            Self::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Classifies a `reqwest` failure. `timeout` is the effective timeout of
    /// the attempt, reported when the underlying client timed out on its own.
    pub(crate) fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_builder() {
            return Self::InvalidRequest(err.to_string());
        }
        if err.is_timeout() {
            return Self::Timeout(timeout);
        }
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::HeaderMap;

    use super::ApiError;
    use crate::Payload;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            status_text: String::new(),
            body: Payload::Empty,
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn server_errors_and_throttling_statuses_are_retryable() {
        for status in [500, 502, 503, 504, 408, 429] {
            assert!(http(status).is_retryable(), "status {status}");
        }
    }

    #[test]
    fn client_errors_are_not_retryable() {
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!http(status).is_retryable(), "status {status}");
        }
    }

    #[test]
    fn local_rejections_are_final() {
        let limited = ApiError::RateLimitExceeded {
            key: "/goals".to_owned(),
            limit: 1,
            window: Duration::from_secs(1),
        };
        assert!(!limited.is_retryable());
        assert!(limited.is_rate_limited());
        assert!(!ApiError::Cancelled.is_retryable());
    }

    #[test]
    fn timeouts_and_network_failures_are_classified() {
        let timeout = ApiError::Timeout(Duration::from_millis(100));
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());
        assert!(timeout.status().is_none());

        let network = ApiError::Network("connection refused".to_owned());
        assert!(network.is_network_error());
        assert!(network.is_retryable());
    }
}
