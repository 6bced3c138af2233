//! Normalized failure kinds for the external-service boundaries.
//!
//! Every cloud call site (OCR, embeddings, search index) funnels its
//! failures into [`ApiError`] so that retry policy is decided from one
//! classification table instead of from each SDK's own error hierarchy.

use thiserror::Error;

use crate::retry::RetryClass;

/// A failure raised by one of the external-service boundaries.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input rejected before any network call was made. Never retried and
    /// never consumes a retry attempt.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Credentials rejected (401/403). Will not resolve on its own.
    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// Rate-limit signal (HTTP 429).
    #[error("rate limited (HTTP {status}): {message}")]
    RateLimited { status: u16, message: String },

    /// Server-side error (5xx).
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Transport-level failure: connect, timeout, DNS, broken body.
    #[error("network error: {0}")]
    Network(String),

    /// Any other client error (4xx, not 429/401/403).
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// Everything not otherwise classified (bad response shape, etc.).
    /// Treated conservatively as retryable.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ApiError {
    /// Build an `ApiError` from an HTTP response status and body text.
    pub fn from_status(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = status.as_u16();
        match code {
            401 | 403 => ApiError::Auth { status: code, message },
            429 => ApiError::RateLimited { status: code, message },
            500..=599 => ApiError::Server { status: code, message },
            400..=499 => ApiError::Client { status: code, message },
            _ => ApiError::Unexpected(format!("HTTP {}: {}", code, message)),
        }
    }

    /// Map this failure onto the retry classification table:
    /// auth/validation/client errors are final, rate limits back off
    /// exponentially, everything transient backs off linearly.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            ApiError::Validation(_) => RetryClass::NoRetry,
            ApiError::Auth { .. } => RetryClass::NoRetry,
            ApiError::Client { .. } => RetryClass::NoRetry,
            ApiError::RateLimited { .. } => RetryClass::Exponential,
            ApiError::Server { .. } => RetryClass::Linear,
            ApiError::Network(_) => RetryClass::Linear,
            ApiError::Unexpected(_) => RetryClass::Linear,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            ApiError::Network(err.to_string())
        } else {
            ApiError::Unexpected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, "bad key"),
            ApiError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, ""),
            ApiError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited { .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::Server { status: 502, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::NOT_FOUND, ""),
            ApiError::Client { status: 404, .. }
        ));
    }

    #[test]
    fn classification_table() {
        let auth = ApiError::Auth { status: 401, message: String::new() };
        assert_eq!(auth.retry_class(), RetryClass::NoRetry);

        let rate = ApiError::RateLimited { status: 429, message: String::new() };
        assert_eq!(rate.retry_class(), RetryClass::Exponential);

        let server = ApiError::Server { status: 503, message: String::new() };
        assert_eq!(server.retry_class(), RetryClass::Linear);

        let net = ApiError::Network("connection reset".into());
        assert_eq!(net.retry_class(), RetryClass::Linear);

        let client = ApiError::Client { status: 400, message: String::new() };
        assert_eq!(client.retry_class(), RetryClass::NoRetry);

        let validation = ApiError::Validation("empty text".into());
        assert_eq!(validation.retry_class(), RetryClass::NoRetry);

        let other = ApiError::Unexpected("missing field".into());
        assert_eq!(other.retry_class(), RetryClass::Linear);
    }
}
