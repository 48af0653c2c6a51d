//! Error types for strata-ai

use thiserror::Error;

/// Result type alias using strata-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a completion provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Seconds from the `retry-after` header
        retry_after: Option<u64>,
    },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Completion finished without producing any text
    #[error("Provider returned an empty completion")]
    EmptyCompletion,

    /// Request did not finish in time
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is worth retrying on the next trigger
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Sse(_) | Error::Timeout(_) => true,
            Error::Api { error_type, .. } => matches!(
                error_type.as_str(),
                "overloaded_error" | "api_error" | "rate_limit_error" | "server_error"
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        let limited = Error::RateLimited {
            message: "slow down".into(),
            retry_after: Some(5),
        };
        assert!(limited.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
        assert!(Error::Timeout(30).is_retryable());
    }

    #[test]
    fn test_retryable_api_overloaded_error_type() {
        let e = Error::api("overloaded_error", "The server is overloaded");
        assert!(e.is_retryable());
    }

    #[test]
    fn test_retryable_by_type_not_message() {
        assert!(Error::api("server_error", "bad gateway").is_retryable());
        assert!(!Error::api("invalid_request_error", "overloaded prompt").is_retryable());
    }

    #[test]
    fn test_not_retryable_auth() {
        assert!(!Error::Auth("Invalid API key".into()).is_retryable());
        assert!(!Error::api("authentication_error", "Invalid API key").is_retryable());
    }

    #[test]
    fn test_not_retryable_non_api() {
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::EmptyCompletion.is_retryable());
        assert!(!Error::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_error_type() {
        let e = Error::api("invalid_request_error", "max_tokens too large");
        assert_eq!(
            e.to_string(),
            "API error: max_tokens too large (type: invalid_request_error)"
        );
    }
}
